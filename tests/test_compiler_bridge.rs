// Drives CompilerBridge against a scripted native layer: argument layout,
// result assembly, ordering across native threads, and callback teardown.

mod common {
    pub mod fake_native;
}

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::fake_native::{diag, out, Script, ScriptedCompiler, Step};
use pawnc_e::e_native::NativeCompiler;
use pawnc_e::{CompileDiagnostic, CompilerBridge, OutputRouter};

fn bridge_for(fake: &Arc<ScriptedCompiler>) -> CompilerBridge {
    let router = OutputRouter::dedicated().expect("delivery thread");
    let native: Arc<dyn NativeCompiler> = fake.clone();
    CompilerBridge::new(native, router)
}

fn codes(diagnostics: &[CompileDiagnostic]) -> Vec<i32> {
    diagnostics.iter().map(|d| d.code).collect()
}

fn record_codes(bridge: &CompilerBridge) -> Arc<Mutex<Vec<i32>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bridge.set_error_listener(move |d| sink.lock().unwrap().push(d.code));
    seen
}

#[test]
fn test_arguments_are_program_options_then_source() {
    let fake = ScriptedCompiler::new();
    let bridge = bridge_for(&fake);
    let options = vec!["-d3".to_string(), "-i/gm/include".to_string()];
    bridge.compile("/gm/test.pwn", &options).unwrap();

    let renamed = bridge_for(&fake).with_program_name("pawncc-3.10");
    renamed.compile("/gm/other.p", &[]).unwrap();

    assert_eq!(
        fake.calls(),
        vec![
            vec!["pawncc", "-d3", "-i/gm/include", "/gm/test.pwn"],
            vec!["pawncc-3.10", "/gm/other.p"],
        ]
    );
}

#[test]
fn test_success_follows_exit_status_only() {
    let fake = ScriptedCompiler::new();
    fake.push(Script::new(0).lane(vec![diag(203, "symbol is never used")]));
    fake.push(Script::new(1));
    fake.push(Script::new(0).lane(vec![diag(0, "note")]));
    let bridge = bridge_for(&fake);

    let warned = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(warned.success);
    assert_eq!(warned.warning_count(), 1);
    assert_eq!(warned.error_count(), 0);

    let failed = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(!failed.success);
    assert!(failed.diagnostics.is_empty());

    let noted = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(noted.success);
    assert!(noted.diagnostics[0].is_info());
    assert!(!fake.has_registration());
}

#[test]
fn test_result_keeps_emission_order_and_matches_listener() {
    let fake = ScriptedCompiler::new();
    fake.push(
        Script::new(1)
            .lane(vec![diag(1, "a"), diag(2, "b"), diag(3, "c")])
            .lane(vec![diag(101, "x"), diag(202, "y"), diag(203, "z")]),
    );
    let bridge = bridge_for(&fake);
    let seen = record_codes(&bridge);

    let result = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());

    let buffered = codes(&result.diagnostics);
    assert_eq!(buffered.len(), 6);
    assert_eq!(*seen.lock().unwrap(), buffered);

    let position = |code| buffered.iter().position(|c| *c == code).unwrap();
    assert!(position(1) < position(2) && position(2) < position(3));
    assert!(position(101) < position(202) && position(202) < position(203));
    assert_eq!(result.error_count(), 4);
    assert_eq!(result.warning_count(), 2);
}

#[test]
fn test_output_listener_receives_text_in_order() {
    let fake = ScriptedCompiler::new();
    fake.push(Script::new(0).lane(vec![
        out("Pawn compiler 3.10.10\n"),
        diag(203, "unused"),
        out("Header size: 1234 bytes\n"),
    ]));
    let bridge = bridge_for(&fake);
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    bridge.set_output_listener(move |text| sink.lock().unwrap().push(text.to_string()));

    let result = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());

    assert_eq!(
        *lines.lock().unwrap(),
        vec!["Pawn compiler 3.10.10\n", "Header size: 1234 bytes\n"]
    );
    assert_eq!(codes(&result.diagnostics), vec![203]);
}

#[test]
fn test_late_emission_does_not_leak_into_next_compile() {
    let fake = ScriptedCompiler::new();
    let (gate_tx, gate_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    fake.push(
        Script::new(0)
            .lane(vec![diag(201, "first")])
            .straggler(gate_rx, vec![diag(1, "late"), out("late\n")], done_tx),
    );
    let release = Step::Run(Box::new(move || {
        gate_tx.send(()).unwrap();
        done_rx.recv().unwrap();
    }));
    fake.push(Script::new(1).lane(vec![release, diag(2, "second")]));
    let bridge = bridge_for(&fake);
    let seen = record_codes(&bridge);

    let first = bridge.compile("/gm/first.pwn", &[]).unwrap();
    let second = bridge.compile("/gm/second.pwn", &[]).unwrap();
    assert!(bridge.router().flush());

    assert_eq!(codes(&first.diagnostics), vec![201]);
    assert_eq!(codes(&second.diagnostics), vec![2]);
    assert_eq!(*seen.lock().unwrap(), vec![201, 2]);
}

#[test]
fn test_concurrent_compiles_are_serialized() {
    let fake = ScriptedCompiler::new();
    for base in [10, 20] {
        fake.push(Script::new(1).lane(vec![
            diag(base, "start"),
            Step::Sleep(Duration::from_millis(30)),
            diag(base + 1, "end"),
        ]));
    }
    let bridge = Arc::new(bridge_for(&fake));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.compile("/gm/test.pwn", &[]).unwrap())
        })
        .collect();
    let mut results: Vec<Vec<i32>> = handles
        .into_iter()
        .map(|h| codes(&h.join().unwrap().diagnostics))
        .collect();
    results.sort();

    assert_eq!(results, vec![vec![10, 11], vec![20, 21]]);
    assert_eq!(fake.max_concurrent_compiles(), 1);
}

#[test]
fn test_nothing_delivered_after_clear_callbacks() {
    let fake = ScriptedCompiler::new();
    fake.push(Script::new(0).lane(vec![diag(203, "unused")]));
    let bridge = bridge_for(&fake);
    let seen = record_codes(&bridge);
    let text = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&text);
    bridge.set_output_listener(move |t| sink.lock().unwrap().push(t.to_string()));

    bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());
    bridge.clear_callbacks();

    fake.emit_leaked(CompileDiagnostic::new(1, "x.pwn", 1, 1, "ghost"), "ghost\n");
    assert!(bridge.router().flush());

    assert_eq!(*seen.lock().unwrap(), vec![203]);
    assert!(text.lock().unwrap().is_empty());
}

#[test]
fn test_clear_callbacks_mid_compile_keeps_buffering() {
    let fake = ScriptedCompiler::new();
    let bridge = Arc::new(bridge_for(&fake));
    let seen = record_codes(&bridge);
    let clearer = Arc::clone(&bridge);
    fake.push(Script::new(1).lane(vec![
        diag(1, "before"),
        Step::Run(Box::new(move || clearer.clear_callbacks())),
        diag(2, "after"),
    ]));

    let result = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());

    assert_eq!(codes(&result.diagnostics), vec![1, 2]);
    assert!(!seen.lock().unwrap().contains(&2));
}

#[test]
fn test_clear_callbacks_is_idempotent() {
    let fake = ScriptedCompiler::new();
    let bridge = bridge_for(&fake);
    bridge.clear_callbacks();
    bridge.clear_callbacks();
    bridge.clear_error_listener();
    bridge.clear_output_listener();
    drop(bridge);
    assert!(fake.calls().is_empty());
    assert!(!fake.has_registration());
}

#[test]
fn test_listener_may_clear_callbacks_on_fatal() {
    let fake = ScriptedCompiler::new();
    fake.push(Script::new(1).lane(vec![
        diag(100, "cannot read from file"),
        Step::Sleep(Duration::from_millis(20)),
        diag(1, "expected token"),
    ]));
    let bridge = Arc::new(bridge_for(&fake));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let weak = Arc::downgrade(&bridge);
    bridge.set_error_listener(move |d| {
        sink.lock().unwrap().push(d.code);
        if d.is_fatal() {
            if let Some(bridge) = weak.upgrade() {
                bridge.clear_callbacks();
            }
        }
    });

    let result = bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());

    assert_eq!(codes(&result.diagnostics), vec![100, 1]);
    assert_eq!(*seen.lock().unwrap(), vec![100]);
}

#[test]
fn test_two_bridges_on_one_native_keep_their_own_results() {
    let fake = ScriptedCompiler::new();
    for base in [10, 20] {
        fake.push(Script::new(1).lane(vec![
            diag(base, "start"),
            Step::Sleep(Duration::from_millis(30)),
            diag(base + 1, "end"),
        ]));
    }
    let bridges = [Arc::new(bridge_for(&fake)), Arc::new(bridge_for(&fake))];
    let seen: Vec<_> = bridges.iter().map(|bridge| record_codes(bridge)).collect();

    let handles: Vec<_> = bridges
        .iter()
        .map(|bridge| {
            let bridge = Arc::clone(bridge);
            thread::spawn(move || bridge.compile("/gm/test.pwn", &[]).unwrap())
        })
        .collect();
    let idle = bridge_for(&fake);
    idle.clear_callbacks();
    drop(idle);

    let results: Vec<Vec<i32>> = handles
        .into_iter()
        .map(|h| codes(&h.join().unwrap().diagnostics))
        .collect();
    for (bridge, (result, seen)) in bridges.iter().zip(results.iter().zip(&seen)) {
        assert!(bridge.router().flush());
        assert_eq!(*seen.lock().unwrap(), *result);
    }
    let mut sorted = results.clone();
    sorted.sort();
    assert_eq!(sorted, vec![vec![10, 11], vec![20, 21]]);
    assert_eq!(fake.max_concurrent_compiles(), 1);
}

#[test]
fn test_listener_registered_after_clear_receives_events() {
    let fake = ScriptedCompiler::new();
    fake.push(Script::new(0).lane(vec![diag(204, "assigned but never used")]));
    let bridge = bridge_for(&fake);
    bridge.clear_callbacks();
    let seen = record_codes(&bridge);

    bridge.compile("/gm/test.pwn", &[]).unwrap();
    assert!(bridge.router().flush());
    assert_eq!(*seen.lock().unwrap(), vec![204]);
}

#[test]
fn test_interior_nul_is_rejected_before_native_call() {
    let fake = ScriptedCompiler::new();
    let bridge = bridge_for(&fake);
    assert!(bridge.compile("/gm/te\0st.pwn", &[]).is_err());
    assert!(bridge.compile("/gm/test.pwn", &["-d\03".to_string()]).is_err());
    assert!(fake.calls().is_empty());
}
