//! Crash-time diagnostics stream.
//!
//! Fatal errors can be reported from threads the runtime never registered
//! (native threads started inside the compiler library) and from contexts
//! where the world is in an unknown state. This path therefore takes no
//! locks of its own: one thread wins an atomic election and resolves the
//! output target, every other thread sleeps in short steps until the target
//! is published.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::config::{BridgeConfig, DEFAULT_ERROR_FILE};

/// Election value meaning "nobody has started resolving the target".
const UNSET: i64 = -1;

/// Sleep between polls while another thread resolves the target.
const FOLLOWER_POLL: Duration = Duration::from_millis(50);

static NEXT_THREAD_ID: AtomicI64 = AtomicI64::new(1);

thread_local! {
    static THREAD_ID: Cell<i64> = const { Cell::new(UNSET) };
}

/// Small process-unique id of the calling thread. Works for threads that
/// were never attached to the bridge, and during thread-local teardown
/// (where a fresh id is handed out on every call).
pub fn current_thread_id() -> i64 {
    THREAD_ID
        .try_with(|id| {
            if id.get() == UNSET {
                id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
            }
            id.get()
        })
        .unwrap_or_else(|_| NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
}

/// Where crash diagnostics go.
///
/// The console variants hold a private duplicate of the descriptor so that
/// writes skip the standard library's stream locks. `None` means the
/// descriptor could not be duplicated and the locked stream is used.
#[derive(Debug)]
pub enum CrashTarget {
    Stdout(Option<File>),
    Stderr(Option<File>),
    File { file: File, path: PathBuf },
}

impl CrashTarget {
    fn stdout() -> Self {
        CrashTarget::Stdout(duplicate_console(Console::Stdout))
    }

    fn stderr() -> Self {
        CrashTarget::Stderr(duplicate_console(Console::Stderr))
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            CrashTarget::Stdout(Some(file))
            | CrashTarget::Stderr(Some(file))
            | CrashTarget::File { file, .. } => {
                let mut file: &File = file;
                file.write_all(buf)?;
                file.flush()
            }
            CrashTarget::Stdout(None) => {
                let mut out = io::stdout();
                out.write_all(buf)?;
                out.flush()
            }
            CrashTarget::Stderr(None) => {
                let mut err = io::stderr();
                err.write_all(buf)?;
                err.flush()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Console {
    Stdout,
    Stderr,
}

#[cfg(unix)]
fn duplicate_console(console: Console) -> Option<File> {
    use std::os::fd::AsFd;

    let owned = match console {
        Console::Stdout => io::stdout().as_fd().try_clone_to_owned(),
        Console::Stderr => io::stderr().as_fd().try_clone_to_owned(),
    };
    owned.ok().map(File::from)
}

#[cfg(windows)]
fn duplicate_console(console: Console) -> Option<File> {
    use std::os::windows::io::AsHandle;

    let owned = match console {
        Console::Stdout => io::stdout().as_handle().try_clone_to_owned(),
        Console::Stderr => io::stderr().as_handle().try_clone_to_owned(),
    };
    owned.ok().map(File::from)
}

#[cfg(not(any(unix, windows)))]
fn duplicate_console(_console: Console) -> Option<File> {
    None
}

/// Process-wide crash log.
#[derive(Debug)]
pub struct CrashLog {
    init_thread: AtomicI64,
    target: OnceLock<CrashTarget>,
    to_stdout: bool,
    to_stderr: bool,
    file_override: Option<String>,
}

impl CrashLog {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            init_thread: AtomicI64::new(UNSET),
            target: OnceLock::new(),
            to_stdout: config.error_file_to_stdout,
            to_stderr: config.error_file_to_stderr,
            file_override: config.native_library_error_file.clone(),
        }
    }

    /// Write `buf` to the crash stream, resolving the stream first if no
    /// thread has done so yet.
    ///
    /// Write errors are ignored: there is nowhere left to report them.
    pub fn write(&self, buf: &[u8]) {
        let target = self.target();
        let _ = target.write_all(buf);
    }

    /// The resolved target, resolving or waiting for it as needed.
    pub fn target(&self) -> &CrashTarget {
        let me = current_thread_id();
        if self.init_thread.load(Ordering::Acquire) == UNSET
            && self
                .init_thread
                .compare_exchange(UNSET, me, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let resolved = self.resolve();
            // Only the election winner ever sets the target.
            let _ = self.target.set(resolved);
        }
        loop {
            if let Some(target) = self.target.get() {
                return target;
            }
            // The winner may be a thread the runtime does not know about, so
            // no runtime lock can be used to wait for it.
            std::thread::sleep(FOLLOWER_POLL);
        }
    }

    /// Id of the thread that won the election, if any thread has tried.
    pub fn init_thread(&self) -> Option<i64> {
        match self.init_thread.load(Ordering::Acquire) {
            UNSET => None,
            id => Some(id),
        }
    }

    /// Path of the crash file, once a file target has been resolved.
    pub fn file_path(&self) -> Option<&Path> {
        match self.target.get() {
            Some(CrashTarget::File { path, .. }) => Some(path),
            _ => None,
        }
    }

    fn resolve(&self) -> CrashTarget {
        if self.to_stdout {
            return CrashTarget::stdout();
        }
        if self.to_stderr {
            return CrashTarget::stderr();
        }
        let name = expand_pid(self.file_override.as_deref().unwrap_or(DEFAULT_ERROR_FILE));
        match create_log_file(Path::new(&name)) {
            Ok((file, path)) => {
                tracing::info!(path = %path.display(), "Crash log file created");
                CrashTarget::File { file, path }
            }
            Err(error) => {
                tracing::warn!(%error, file = %name, "Falling back to console for crash log");
                let target = CrashTarget::stdout();
                let notice = format!(
                    "Can't open compiler library error report file. Error: {error}\n\
                     Compiler library error report will be written to console.\n"
                );
                let _ = target.write_all(notice.as_bytes());
                target
            }
        }
    }
}

/// Replace every `%p` with the process id.
fn expand_pid(pattern: &str) -> String {
    pattern.replace("%p", &std::process::id().to_string())
}

/// Create (truncating) the crash file. A relative name that cannot be created
/// in the working directory is retried in the temp directory.
fn create_log_file(path: &Path) -> io::Result<(File, PathBuf)> {
    match File::create(path) {
        Ok(file) => Ok((file, path.to_path_buf())),
        Err(error) if path.is_relative() => {
            let fallback = std::env::temp_dir().join(path);
            File::create(&fallback)
                .map(|file| (file, fallback))
                .map_err(|_| error)
        }
        Err(error) => Err(error),
    }
}
