//! Bridge configuration.
//!
//! Every option the bridge recognizes lives here. Parsing is left to the
//! embedding (the `jitbridge` binary maps its CLI flags onto this struct).

use std::path::PathBuf;

/// Base name of the external compiler library, without platform prefix or
/// suffix (`libjitcompiler.so`, `jitcompiler.dll`, ...).
pub const SHARED_LIBRARY_NAME: &str = "jitcompiler";

/// Default crash-log file name. `%p` expands to the process id.
pub const DEFAULT_ERROR_FILE: &str = "bridge_err_pid%p_compiler.log";

/// Highest event log level. Levels above this are clamped when sizing the
/// verbose buffer.
pub const MAX_EVENT_LOG_LEVEL: u8 = 4;

/// Configuration for the compiler bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Run the compiler from a native library. Selects two runtime instances
    /// (compiler side and managed side) instead of one shared instance.
    pub use_native_library: bool,
    /// Directories searched first for the compiler library
    /// (platform path-list syntax).
    pub native_library_path: Option<String>,
    /// Fallback directory holding runtime libraries.
    pub runtime_library_dir: PathBuf,
    /// Length of every per-thread counter block. Zero disables the registry.
    pub counter_size: usize,
    /// Leave compiler threads out of counter collection and retirement.
    pub counters_exclude_compiler: bool,
    /// Master switch for the in-memory event log.
    pub log_events: bool,
    /// Highest level recorded in the event log (0 disables it).
    pub event_log_level: u8,
    /// Capacity of the level-1 event buffer; the verbose buffer grows by 10x
    /// per level above 1.
    pub event_log_base_capacity: usize,
    /// Highest level echoed to the console trace.
    pub trace_level: u8,
    /// Write crash diagnostics to stdout.
    pub error_file_to_stdout: bool,
    /// Write crash diagnostics to stderr (checked after stdout).
    pub error_file_to_stderr: bool,
    /// Crash-log file path override. `%p` expands to the process id.
    pub native_library_error_file: Option<String>,
}

impl BridgeConfig {
    /// Whether the counter registry is active.
    pub fn counters_enabled(&self) -> bool {
        self.counter_size > 0
    }

    /// Capacity of the verbose event buffer for the configured level.
    pub fn verbose_event_capacity(&self) -> usize {
        let mut count = self.event_log_base_capacity;
        let mut level = 1;
        while level < self.event_log_level && level < MAX_EVENT_LOG_LEVEL {
            count = count.saturating_mul(10);
            level = level.saturating_add(1);
        }
        count
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            use_native_library: false,
            native_library_path: None,
            runtime_library_dir: default_runtime_library_dir(),
            counter_size: 0,
            counters_exclude_compiler: true,
            log_events: true,
            event_log_level: 1,
            event_log_base_capacity: 250,
            trace_level: 0,
            error_file_to_stdout: false,
            error_file_to_stderr: false,
            native_library_error_file: None,
        }
    }
}

/// Directory of the running executable, or the working directory if that
/// cannot be determined.
pub fn default_runtime_library_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
