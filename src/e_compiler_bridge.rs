use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace};

use crate::e_compile_result::CompilationResult;
use crate::e_diagnostic::CompileDiagnostic;
use crate::e_native::{NativeArgs, NativeCompiler, NativeSink};
use crate::e_output_router::{ListenerHandle, OutputRouter, RouterSender};

/// Program name placed in `argv[0]` unless configured otherwise.
pub const DEFAULT_PROGRAM_NAME: &str = "pawncc";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BufferState {
    generation: u64,
    open: bool,
    records: Vec<CompileDiagnostic>,
}

/// Diagnostics collected for the invocation currently in flight.
///
/// Each reset opens a new generation. Records tagged with any other
/// generation, or arriving after the snapshot closed the buffer, are dropped.
#[derive(Debug, Default)]
struct DiagnosticBuffer {
    state: Mutex<BufferState>,
}

impl DiagnosticBuffer {
    fn reset(&self) -> u64 {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.open = true;
        state.records.clear();
        state.generation
    }

    /// Append and, while still holding the lock, hand the record to `route`
    /// so routed order matches buffered order.
    fn append(
        &self,
        generation: u64,
        diagnostic: CompileDiagnostic,
        route: impl FnOnce(&CompileDiagnostic),
    ) -> bool {
        let mut state = lock(&self.state);
        if !state.open || state.generation != generation {
            trace!(
                "discarding stray diagnostic from generation {} (current {}): {}",
                generation,
                state.generation,
                diagnostic
            );
            return false;
        }
        route(&diagnostic);
        state.records.push(diagnostic);
        true
    }

    fn snapshot(&self, generation: u64) -> Vec<CompileDiagnostic> {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return Vec::new();
        }
        state.open = false;
        std::mem::take(&mut state.records)
    }
}

/// The sink registered with the native layer for one invocation.
///
/// Routing stops when the invocation finishes or the bridge's callbacks are
/// cleared; buffering is governed by the generation alone.
struct InvocationSink {
    generation: u64,
    buffer: Arc<DiagnosticBuffer>,
    router: RouterSender,
    live: AtomicBool,
}

impl InvocationSink {
    fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl NativeSink for InvocationSink {
    fn on_output(&self, message: String) {
        if self.is_live() {
            self.router.post_output(message);
        } else {
            trace!("output after teardown: {:?}", message);
        }
    }

    fn on_diagnostic(&self, diagnostic: CompileDiagnostic) {
        let live = self.is_live();
        self.buffer.append(self.generation, diagnostic, |d| {
            if live {
                self.router.post_diagnostic(d.clone());
            }
        });
    }
}

/// Owns the native compiler for one caller: listener registration, the
/// diagnostic buffer and result assembly.
///
/// `compile` is single-flight. Concurrent callers queue on an internal lock
/// instead of interleaving their diagnostics.
pub struct CompilerBridge {
    native: Arc<dyn NativeCompiler>,
    router: OutputRouter,
    program_name: String,
    buffer: Arc<DiagnosticBuffer>,
    in_flight: Mutex<()>,
    active_sink: Mutex<Option<Arc<InvocationSink>>>,
}

impl CompilerBridge {
    pub fn new(native: Arc<dyn NativeCompiler>, router: OutputRouter) -> Self {
        CompilerBridge {
            native,
            router,
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            buffer: Arc::new(DiagnosticBuffer::default()),
            in_flight: Mutex::new(()),
            active_sink: Mutex::new(None),
        }
    }

    pub fn with_program_name(mut self, program_name: impl Into<String>) -> Self {
        self.program_name = program_name.into();
        self
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn router(&self) -> &OutputRouter {
        &self.router
    }

    /// Register the handler for free-text compiler output, replacing any
    /// previous one. Delivered on the router's delivery context.
    pub fn set_output_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.router.set_output_listener(listener)
    }

    pub fn clear_output_listener(&self) {
        self.router.clear_output_listener();
    }

    /// Register the handler for diagnostics as they are emitted.
    pub fn set_error_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&CompileDiagnostic) + Send + Sync + 'static,
    {
        self.router.set_diagnostic_listener(listener)
    }

    pub fn clear_error_listener(&self) {
        self.router.clear_diagnostic_listener();
    }

    /// Compile `source_path` and block until the native call returns.
    ///
    /// Run this off the delivery context: listeners are only reached once the
    /// delivery context gets to dispatch. The only error is an argument that
    /// cannot be passed to C; compiler failure is `success == false`.
    pub fn compile(
        &self,
        source_path: &str,
        options: &[String],
    ) -> anyhow::Result<CompilationResult> {
        let args = NativeArgs::for_source(&self.program_name, options, source_path)?;
        let _flight = lock(&self.in_flight);

        let generation = self.buffer.reset();
        let sink = Arc::new(InvocationSink {
            generation,
            buffer: Arc::clone(&self.buffer),
            router: self.router.sender(),
            live: AtomicBool::new(true),
        });
        *lock(&self.active_sink) = Some(Arc::clone(&sink));

        info!("compiling {} (generation {})", source_path, generation);
        debug!("compiler arguments: {:?}", args.to_strings());
        let status = self
            .native
            .compile(args, Arc::clone(&sink) as Arc<dyn NativeSink>);

        let diagnostics = self.buffer.snapshot(generation);
        sink.retire();
        {
            let mut active = lock(&self.active_sink);
            if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, &sink)) {
                *active = None;
            }
        }

        let result = CompilationResult::from_status(status, diagnostics);
        info!(
            "compile finished with status {}: {} error(s), {} warning(s)",
            status,
            result.error_count(),
            result.warning_count()
        );
        Ok(result)
    }

    /// Unregister both listeners and stop routing from the native
    /// registration. Events the native layer still emits afterwards reach no
    /// listener. During a compile the registration itself stays until the
    /// native call returns, so the result is still complete. Safe to call at
    /// any time, any number of times, including from a listener.
    pub fn clear_callbacks(&self) {
        self.router.clear_listeners();
        if let Some(sink) = lock(&self.active_sink).take() {
            sink.retire();
        }
        debug!("compiler callbacks cleared");
    }
}

impl Drop for CompilerBridge {
    fn drop(&mut self) {
        self.clear_callbacks();
    }
}

impl std::fmt::Debug for CompilerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerBridge")
            .field("program_name", &self.program_name)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
