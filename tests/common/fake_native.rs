//! A scripted stand-in for the pawncc library.
//!
//! Each `compile` call pops the next [`Script`]. Every lane of the script runs
//! on its own thread, the way the real compiler reports from internal threads,
//! and all lanes finish before `compile` returns. Lanes look up the registered
//! sink on every step, so they see teardown exactly when the library would.
//! A straggler keeps emitting after `compile` has returned, through the sink it
//! cached when the call started, like a native thread that outlives the call.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pawnc_e::e_native::{NativeArgs, NativeCompiler, NativeSink};
use pawnc_e::CompileDiagnostic;

pub enum Step {
    Output(String),
    Diagnostic(CompileDiagnostic),
    Sleep(Duration),
    Run(Box<dyn FnOnce() + Send>),
}

pub fn out(message: &str) -> Step {
    Step::Output(message.to_string())
}

pub fn diag(code: i32, message: &str) -> Step {
    Step::Diagnostic(CompileDiagnostic::new(code, "/gm/test.pwn", code, code + 1, message))
}

pub struct Straggler {
    gate: Receiver<()>,
    steps: Vec<Step>,
    done: Sender<()>,
}

pub struct Script {
    exit_code: i32,
    lanes: Vec<Vec<Step>>,
    straggler: Option<Straggler>,
}

impl Script {
    pub fn new(exit_code: i32) -> Self {
        Script {
            exit_code,
            lanes: Vec::new(),
            straggler: None,
        }
    }

    pub fn lane(mut self, steps: Vec<Step>) -> Self {
        self.lanes.push(steps);
        self
    }

    /// Emit `steps` once `gate` fires, after `compile` has already returned.
    pub fn straggler(mut self, gate: Receiver<()>, steps: Vec<Step>, done: Sender<()>) -> Self {
        self.straggler = Some(Straggler { gate, steps, done });
        self
    }
}

type SinkSlot = Mutex<Option<Arc<dyn NativeSink>>>;

#[derive(Default)]
pub struct ScriptedCompiler {
    scripts: Mutex<VecDeque<Script>>,
    flight: Mutex<()>,
    registered: SinkSlot,
    /// Survives the end of the call, to play a native layer that ignores teardown.
    leaked: SinkSlot,
    calls: Mutex<Vec<Vec<String>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedCompiler::default())
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_registration(&self) -> bool {
        self.registered.lock().unwrap().is_some()
    }

    pub fn max_concurrent_compiles(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Emit through the most recent sink even though its call has ended.
    pub fn emit_leaked(&self, diagnostic: CompileDiagnostic, message: &str) {
        if let Some(sink) = self.leaked.lock().unwrap().clone() {
            sink.on_output(message.to_string());
            sink.on_diagnostic(diagnostic);
        }
    }

    fn run_lane(&self, steps: Vec<Step>) {
        for step in steps {
            match step {
                Step::Run(action) => action(),
                Step::Sleep(duration) => thread::sleep(duration),
                event => {
                    let sink = self.registered.lock().unwrap().clone();
                    if let Some(sink) = sink {
                        emit(&sink, event);
                    }
                }
            }
        }
    }
}

fn emit(sink: &Arc<dyn NativeSink>, step: Step) {
    match step {
        Step::Output(message) => sink.on_output(message),
        Step::Diagnostic(record) => sink.on_diagnostic(record),
        Step::Sleep(duration) => thread::sleep(duration),
        Step::Run(action) => action(),
    }
}

impl NativeCompiler for ScriptedCompiler {
    fn compile(&self, args: NativeArgs, sink: Arc<dyn NativeSink>) -> i32 {
        let _flight = self.flight.lock().unwrap();
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(args.to_strings());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::new(0));
        *self.registered.lock().unwrap() = Some(Arc::clone(&sink));
        *self.leaked.lock().unwrap() = Some(Arc::clone(&sink));

        thread::scope(|scope| {
            for lane in script.lanes {
                scope.spawn(move || self.run_lane(lane));
            }
        });

        if let Some(straggler) = script.straggler {
            let cached = Arc::clone(&sink);
            thread::spawn(move || {
                if straggler.gate.recv().is_ok() {
                    for step in straggler.steps {
                        emit(&cached, step);
                    }
                }
                let _ = straggler.done.send(());
            });
        }

        *self.registered.lock().unwrap() = None;
        self.active.fetch_sub(1, Ordering::SeqCst);
        script.exit_code
    }
}
