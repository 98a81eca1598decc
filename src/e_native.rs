//! The foreign-function boundary to the pawncc shared library.
//!
//! Everything that crosses into native code is owned here: argument strings
//! are copied into NUL-terminated buffers that live for the whole call, and
//! strings coming back through callbacks are copied out before the callback
//! returns. The library's callback slots are process-global C function
//! pointers without a user-data argument, so the sink they forward to is kept
//! in one process-wide registry, and compiles are serialized process-wide.

use std::env;
use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{anyhow, Context};
use libloading::{Library, Symbol};
use log::{debug, info, trace, warn};
use once_cell::sync::{Lazy, OnceCell};

use crate::e_diagnostic::CompileDiagnostic;

/// Receives events from the native compiler. Called on native-owned threads.
pub trait NativeSink: Send + Sync {
    fn on_output(&self, message: String);
    fn on_diagnostic(&self, diagnostic: CompileDiagnostic);
}

/// A compiler entry point.
///
/// `sink` is registered for both callbacks exactly for the duration of the
/// call: installed before the native entry point runs and dropped before
/// `compile` returns. The native compiler is not reentrant and its callback
/// slots are global, so implementations run one call at a time across every
/// caller, not just per bridge.
///
/// [`PawnLibrary`] is the real implementation; tests substitute scripted ones.
pub trait NativeCompiler: Send + Sync {
    /// Run one compilation and return the native exit status.
    fn compile(&self, args: NativeArgs, sink: Arc<dyn NativeSink>) -> i32;
}

/// Owned argument vector, one NUL-terminated buffer per argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeArgs {
    buffers: Vec<Vec<u8>>,
}

impl NativeArgs {
    /// `[program] ++ options ++ [source]`
    pub fn for_source(program: &str, options: &[String], source: &str) -> anyhow::Result<Self> {
        Self::from_args(
            std::iter::once(program)
                .chain(options.iter().map(String::as_str))
                .chain(std::iter::once(source)),
        )
    }

    pub fn from_args<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let buffers = args
            .into_iter()
            .map(|arg| {
                let arg = arg.as_ref();
                CString::new(arg)
                    .map(CString::into_bytes_with_nul)
                    .with_context(|| format!("argument {:?} contains a NUL byte", arg))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(NativeArgs { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The arguments without their terminators.
    pub fn to_strings(&self) -> Vec<String> {
        self.buffers
            .iter()
            .map(|buffer| String::from_utf8_lossy(&buffer[..buffer.len() - 1]).into_owned())
            .collect()
    }

    /// The last argument, which is where the source file goes.
    pub fn source(&self) -> Option<PathBuf> {
        if self.buffers.len() < 2 {
            return None;
        }
        self.to_strings().pop().map(PathBuf::from)
    }

    /// Pointers into the owned buffers followed by a terminating null, valid
    /// for as long as `self` is neither moved nor dropped.
    fn argv(&mut self) -> Vec<*mut c_char> {
        self.buffers
            .iter_mut()
            .map(|buffer| buffer.as_mut_ptr().cast::<c_char>())
            .chain(std::iter::once(ptr::null_mut()))
            .collect()
    }
}

type RawOutputCallback = unsafe extern "C" fn(message: *const c_char);
type RawErrorCallback = unsafe extern "C" fn(
    number: c_int,
    filename: *const c_char,
    firstline: c_int,
    lastline: c_int,
    message: *const c_char,
);
type PcCompileFn = unsafe extern "C" fn(argc: c_int, argv: *mut *mut c_char) -> c_int;
type SetOutputCallbackFn = unsafe extern "C" fn(callback: Option<RawOutputCallback>);
type SetErrorCallbackFn = unsafe extern "C" fn(callback: Option<RawErrorCallback>);
type ClearCallbacksFn = unsafe extern "C" fn();

fn same_sink(a: &Arc<dyn NativeSink>, b: &Arc<dyn NativeSink>) -> bool {
    ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// The sink the C callbacks currently forward to.
#[derive(Default)]
struct SinkRegistry {
    current: RwLock<Option<Arc<dyn NativeSink>>>,
}

impl SinkRegistry {
    fn current(&self) -> Option<Arc<dyn NativeSink>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, sink: Arc<dyn NativeSink>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Drop the registration only if `sink` is still the one installed.
    fn release(&self, sink: &Arc<dyn NativeSink>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|installed| same_sink(installed, sink)) {
            *current = None;
            true
        } else {
            false
        }
    }
}

static SINKS: Lazy<SinkRegistry> = Lazy::new(SinkRegistry::default);
/// Held from sink installation through `pc_compile` to teardown.
static FLIGHT: Mutex<()> = Mutex::new(());
static LOADED: OnceCell<Arc<PawnLibrary>> = OnceCell::new();

/// Copy a native string out; NULL reads as empty, invalid UTF-8 lossily.
unsafe fn owned_string(raw: *const c_char) -> String {
    if raw.is_null() {
        String::new()
    } else {
        CStr::from_ptr(raw).to_string_lossy().into_owned()
    }
}

unsafe extern "C" fn output_trampoline(message: *const c_char) {
    let message = owned_string(message);
    let Some(sink) = SINKS.current() else {
        trace!("output callback with no sink registered");
        return;
    };
    // Unwinding into C is undefined; swallow here.
    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_output(message))).is_err() {
        warn!("output sink panicked inside a native callback");
    }
}

unsafe extern "C" fn error_trampoline(
    number: c_int,
    filename: *const c_char,
    firstline: c_int,
    lastline: c_int,
    message: *const c_char,
) {
    let diagnostic = CompileDiagnostic::new(
        number,
        owned_string(filename),
        firstline,
        lastline,
        owned_string(message),
    );
    let Some(sink) = SINKS.current() else {
        trace!("error callback with no sink registered: {}", diagnostic);
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_diagnostic(diagnostic))).is_err() {
        warn!("diagnostic sink panicked inside a native callback");
    }
}

/// Platform file name of the compiler library, e.g. `libpawnc.so`.
pub fn default_library_name() -> PathBuf {
    PathBuf::from(libloading::library_filename("pawnc"))
}

#[derive(Clone, Copy)]
struct PawnApi {
    pc_compile: PcCompileFn,
    set_output_callback: SetOutputCallbackFn,
    set_error_callback: SetErrorCallbackFn,
    clear_callbacks: ClearCallbacksFn,
}

/// The pawncc shared library, loaded at most once per process.
pub struct PawnLibrary {
    path: PathBuf,
    api: PawnApi,
    // Keeps the function pointers in `api` valid.
    _library: Option<Library>,
}

impl PawnLibrary {
    /// Load the library, or return the already loaded one.
    ///
    /// The compiler keeps global state, so a second load from a different path
    /// is refused rather than silently mixing two copies.
    pub fn load(path: &Path) -> anyhow::Result<Arc<Self>> {
        let library = LOADED.get_or_try_init(|| Self::open(path).map(Arc::new))?;
        if library.path != path {
            return Err(anyhow!(
                "compiler library already loaded from {}, refusing {}",
                library.path.display(),
                path.display()
            ));
        }
        Ok(Arc::clone(library))
    }

    fn open(path: &Path) -> anyhow::Result<Self> {
        info!("loading compiler library {}", path.display());
        // SAFETY: loading runs the library's initializers; pawncc has none with
        // preconditions.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load compiler library {}", path.display()))?;
        // SAFETY: the signatures match the exported C declarations.
        let api = unsafe {
            PawnApi {
                pc_compile: symbol(&library, b"pc_compile\0")?,
                set_output_callback: symbol(&library, b"pawnc_set_output_callback\0")?,
                set_error_callback: symbol(&library, b"pawnc_set_error_callback\0")?,
                clear_callbacks: symbol(&library, b"pawnc_clear_callbacks\0")?,
            }
        };
        Ok(PawnLibrary {
            path: path.to_path_buf(),
            api,
            _library: Some(library),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> anyhow::Result<T> {
    let symbol: Symbol<'_, T> = library.get(name).with_context(|| {
        format!(
            "compiler library does not export {}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        )
    })?;
    Ok(*symbol)
}

impl NativeCompiler for PawnLibrary {
    fn compile(&self, mut args: NativeArgs, sink: Arc<dyn NativeSink>) -> i32 {
        let Ok(argc) = c_int::try_from(args.len()) else {
            warn!("too many compiler arguments: {}", args.len());
            return -1;
        };
        let _flight = FLIGHT.lock().unwrap_or_else(PoisonError::into_inner);

        SINKS.install(Arc::clone(&sink));
        // SAFETY: the trampolines have the exact callback signatures.
        unsafe {
            (self.api.set_output_callback)(Some(output_trampoline));
            (self.api.set_error_callback)(Some(error_trampoline));
        }

        let status = {
            let source_dir = args
                .source()
                .and_then(|source| source.parent().map(Path::to_path_buf));
            let _cwd = WorkingDirGuard::enter(source_dir.as_deref());
            let mut argv = args.argv();
            debug!("calling pc_compile with {} args", argc);
            // SAFETY: argv points into `args`, which outlives the call, and
            // ends with a null entry.
            unsafe { (self.api.pc_compile)(argc, argv.as_mut_ptr()) }
        };
        debug!("pc_compile returned {}", status);

        // SAFETY: no arguments; idempotent on the native side.
        unsafe { (self.api.clear_callbacks)() };
        SINKS.release(&sink);
        status
    }
}

impl std::fmt::Debug for PawnLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PawnLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Switches the process into the source directory so relative includes
/// resolve, and switches back on drop.
pub(crate) struct WorkingDirGuard {
    previous: Option<PathBuf>,
}

impl WorkingDirGuard {
    pub(crate) fn enter(dir: Option<&Path>) -> Self {
        let Some(dir) = dir.filter(|dir| !dir.as_os_str().is_empty()) else {
            return WorkingDirGuard { previous: None };
        };
        let previous = match env::current_dir() {
            Ok(previous) => previous,
            Err(e) => {
                warn!("cannot read the working directory: {}", e);
                return WorkingDirGuard { previous: None };
            }
        };
        match env::set_current_dir(dir) {
            Ok(()) => {
                info!("changed to directory {}", dir.display());
                WorkingDirGuard {
                    previous: Some(previous),
                }
            }
            Err(e) => {
                warn!("failed to change to directory {}: {}", dir.display(), e);
                WorkingDirGuard { previous: None }
            }
        }
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = env::set_current_dir(&previous) {
                warn!("failed to restore directory {}: {}", previous.display(), e);
            }
        }
    }
}
