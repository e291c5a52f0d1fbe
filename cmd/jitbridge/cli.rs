use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Parser};
use jitbridge::BridgeConfig;
use jitbridge::config::default_runtime_library_dir;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "jitbridge",
    author = "Lambdaclass",
    version,
    about = "Compiler bridge diagnostics host"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "native-library",
        action = ArgAction::SetTrue,
        help = "Run the compiler from a native shared library.",
        long_help = "Uses separate compiler-side and managed-side runtime instances.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_NATIVE_LIBRARY"
    )]
    pub use_native_library: bool,
    #[arg(
        long = "native-library-path",
        value_name = "PATH_LIST",
        help = "Directories searched for the compiler library.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_NATIVE_LIBRARY_PATH"
    )]
    pub native_library_path: Option<String>,
    #[arg(
        long = "runtime-library-dir",
        value_name = "DIR",
        help = "Fallback directory for the compiler library. Defaults to the executable's directory.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_RUNTIME_LIBRARY_DIR"
    )]
    pub runtime_library_dir: Option<PathBuf>,
    #[arg(
        long = "load-library",
        action = ArgAction::SetTrue,
        help = "Load the compiler library at startup.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_LOAD_LIBRARY"
    )]
    pub load_library: bool,
    #[arg(
        long = "counters.size",
        default_value_t = 0,
        value_name = "COUNT",
        help = "Number of per-thread performance counters.",
        help_heading = "Counter options",
        env = "JITBRIDGE_COUNTER_SIZE"
    )]
    pub counter_size: usize,
    #[arg(
        long = "counters.include-compiler",
        action = ArgAction::SetTrue,
        help = "Include compiler threads in counter totals.",
        help_heading = "Counter options",
        env = "JITBRIDGE_COUNTERS_INCLUDE_COMPILER"
    )]
    pub counters_include_compiler: bool,
    #[arg(
        long = "threads",
        default_value_t = 4,
        value_name = "THREADS",
        help = "Worker threads attached during the counter exercise.",
        help_heading = "Counter options"
    )]
    pub threads: usize,
    #[arg(
        long = "increments",
        default_value_t = 1000,
        value_name = "N",
        help = "Increments each worker applies to every counter.",
        help_heading = "Counter options"
    )]
    pub increments: u32,
    #[arg(
        long = "resize",
        value_name = "COUNT",
        help = "Resize every counter block after the workers finish.",
        help_heading = "Counter options"
    )]
    pub resize: Option<usize>,
    #[arg(
        long = "events.disable",
        action = ArgAction::SetTrue,
        help = "Disable the in-memory event log.",
        help_heading = "Event log options",
        env = "JITBRIDGE_EVENTS_DISABLE"
    )]
    pub events_disable: bool,
    #[arg(
        long = "events.level",
        default_value_t = 1,
        value_name = "LEVEL",
        help = "Highest level recorded in the event log.",
        long_help = "0 disables recording, 1 records major events, 2-4 add verbose events.",
        help_heading = "Event log options",
        env = "JITBRIDGE_EVENT_LOG_LEVEL"
    )]
    pub event_log_level: u8,
    #[arg(
        long = "events.capacity",
        default_value_t = 250,
        value_name = "ENTRIES",
        help = "Capacity of the level-1 event buffer.",
        help_heading = "Event log options",
        env = "JITBRIDGE_EVENT_LOG_CAPACITY"
    )]
    pub event_log_capacity: usize,
    #[arg(
        long = "events.trace",
        default_value_t = 0,
        value_name = "LEVEL",
        help = "Highest event level echoed to the console.",
        help_heading = "Event log options",
        env = "JITBRIDGE_TRACE_LEVEL"
    )]
    pub trace_level: u8,
    #[arg(
        long = "events",
        action = ArgAction::SetTrue,
        help = "Print the event logs before exiting.",
        help_heading = "Event log options"
    )]
    pub print_events: bool,
    #[arg(
        long = "error-file",
        value_name = "FILE",
        help = "Crash log file. %p expands to the process id.",
        help_heading = "Crash log options",
        env = "JITBRIDGE_ERROR_FILE"
    )]
    pub error_file: Option<String>,
    #[arg(
        long = "error-file.stdout",
        action = ArgAction::SetTrue,
        help = "Write crash diagnostics to stdout.",
        help_heading = "Crash log options",
        env = "JITBRIDGE_ERROR_FILE_TO_STDOUT"
    )]
    pub error_file_to_stdout: bool,
    #[arg(
        long = "error-file.stderr",
        action = ArgAction::SetTrue,
        help = "Write crash diagnostics to stderr.",
        help_heading = "Crash log options",
        env = "JITBRIDGE_ERROR_FILE_TO_STDERR"
    )]
    pub error_file_to_stderr: bool,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "JITBRIDGE_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Log options"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Log options",
        env = "JITBRIDGE_LOG_COLOR"
    )]
    pub log_color: LogColor,
}

impl Options {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            use_native_library: self.use_native_library,
            native_library_path: self.native_library_path.clone(),
            runtime_library_dir: self
                .runtime_library_dir
                .clone()
                .unwrap_or_else(default_runtime_library_dir),
            counter_size: self.counter_size,
            counters_exclude_compiler: !self.counters_include_compiler,
            log_events: !self.events_disable,
            event_log_level: self.event_log_level,
            event_log_base_capacity: self.event_log_capacity,
            trace_level: self.trace_level,
            error_file_to_stdout: self.error_file_to_stdout,
            error_file_to_stderr: self.error_file_to_stderr,
            native_library_error_file: self.error_file.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{}'. Expected: auto, always, or never",
                s
            )),
        }
    }
}
