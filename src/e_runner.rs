use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::trace;
#[cfg(feature = "concurrent")]
use threadpool::ThreadPool;

use crate::e_compile_result::CompilationResult;
use crate::e_compiler_bridge::CompilerBridge;
use crate::e_output_router::{DeliveryPump, PumpStatus};

/// How long the delivery loop waits for an event before checking on the compile.
const PUMP_INTERVAL: Duration = Duration::from_millis(25);

/// Runs blocking compiles away from the delivery context.
pub struct CompileWorker {
    #[cfg(feature = "concurrent")]
    pool: ThreadPool,
}

impl CompileWorker {
    pub fn new() -> Self {
        CompileWorker {
            #[cfg(feature = "concurrent")]
            pool: ThreadPool::with_name("pawnc-compile".to_string(), 1),
        }
    }

    #[cfg(feature = "concurrent")]
    fn execute<F>(&self, job: F) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(job);
        Ok(())
    }

    #[cfg(not(feature = "concurrent"))]
    fn execute<F>(&self, job: F) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new()
            .name("pawnc-compile".to_string())
            .spawn(job)
            .context("failed to spawn compile thread")?;
        Ok(())
    }

    /// Start compiling `source` in the background.
    pub fn submit(
        &self,
        bridge: Arc<CompilerBridge>,
        source: &Path,
        options: Vec<String>,
    ) -> anyhow::Result<Receiver<anyhow::Result<CompilationResult>>> {
        let source = source
            .to_str()
            .with_context(|| format!("source path {} is not valid UTF-8", source.display()))?
            .to_string();
        let (tx, rx) = mpsc::channel();
        self.execute(move || {
            let _ = tx.send(bridge.compile(&source, &options));
        })?;
        Ok(rx)
    }

    /// Compile on the worker while the calling thread serves as the delivery
    /// context, draining `pump` until the result is in.
    ///
    /// Every event the compiler emitted before returning is dispatched before
    /// this returns.
    pub fn compile_and_deliver(
        &self,
        bridge: Arc<CompilerBridge>,
        pump: &DeliveryPump,
        source: &Path,
        options: Vec<String>,
    ) -> anyhow::Result<CompilationResult> {
        let rx = self.submit(bridge, source, options)?;
        loop {
            match rx.try_recv() {
                Ok(result) => {
                    let late = pump.pump_pending();
                    trace!("delivered {} trailing event(s)", late);
                    return result;
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(anyhow!("compile worker stopped without a result"))
                }
                Err(TryRecvError::Empty) => {}
            }
            if pump.pump_timeout(PUMP_INTERVAL) == PumpStatus::Closed {
                return rx
                    .recv()
                    .map_err(|_| anyhow!("compile worker stopped without a result"))?;
            }
        }
    }
}

impl Default for CompileWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileWorker").finish_non_exhaustive()
    }
}
