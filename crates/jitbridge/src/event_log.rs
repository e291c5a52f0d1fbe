//! Leveled event log and console trace.
//!
//! Every call feeds two independent sinks:
//!
//! - an in-memory circular log, kept only when event logging is enabled and
//!   the level is within `event_log_level`. Level 1 goes to the coarse
//!   buffer, levels 2..=4 to the verbose buffer;
//! - a plain-text console trace, written when the level is within
//!   `trace_level`.
//!
//! Messages are passed as [`fmt::Arguments`], so a call rejected by both
//! sinks never formats anything.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::BridgeConfig;

lazy_static::lazy_static! {
    /// Reference point for entry timestamps.
    static ref PROCESS_START: Instant = Instant::now();
}

/// Placeholder tag for threads without a resolvable name.
pub const UNKNOWN_THREAD: &str = "?";

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    /// Seconds since the bridge's process-start reference.
    pub timestamp: f64,
    /// Name of the logging thread, or [`UNKNOWN_THREAD`].
    pub thread: String,
    pub message: String,
}

/// Fixed-capacity ring of events; the oldest entry is dropped when full.
#[derive(Debug)]
struct RingLog {
    name: &'static str,
    capacity: usize,
    entries: Mutex<VecDeque<EventEntry>>,
}

impl RingLog {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    fn push(&self, entry: EventEntry) {
        if self.capacity == 0 {
            return;
        }
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn snapshot(&self) -> Vec<EventEntry> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let entries = self.entries.lock().unwrap();
        entries.iter().cloned().collect()
    }
}

/// The bridge's event log and console trace.
pub struct EventLog {
    events: Option<RingLog>,
    verbose_events: Option<RingLog>,
    log_level: u8,
    trace_level: u8,
    console: Mutex<Box<dyn Write + Send>>,
}

impl EventLog {
    /// Build the log from configuration, tracing to stdout.
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_console(config, Box::new(io::stdout()))
    }

    /// Build the log with a custom console writer for the trace sink.
    pub fn with_console(config: &BridgeConfig, console: Box<dyn Write + Send>) -> Self {
        // Touch the start reference so the first entry does not pay for it.
        let _ = *PROCESS_START;

        let log_level = if config.log_events {
            config.event_log_level
        } else {
            0
        };
        let events = (log_level > 0)
            .then(|| RingLog::new("Compiler Bridge Events", config.event_log_base_capacity));
        let verbose_events = (log_level > 1).then(|| {
            RingLog::new(
                "Verbose Compiler Bridge Events",
                config.verbose_event_capacity(),
            )
        });

        tracing::debug!(
            log_level,
            trace_level = config.trace_level,
            capacity = events.as_ref().map(|l| l.capacity).unwrap_or(0),
            verbose_capacity = verbose_events.as_ref().map(|l| l.capacity).unwrap_or(0),
            "Event log initialized"
        );

        Self {
            events,
            verbose_events,
            log_level,
            trace_level: config.trace_level,
            console: Mutex::new(console),
        }
    }

    /// A log that records and traces nothing.
    pub fn disabled() -> Self {
        Self {
            events: None,
            verbose_events: None,
            log_level: 0,
            trace_level: 0,
            console: Mutex::new(Box::new(io::sink())),
        }
    }

    /// Whether either sink accepts `level`.
    pub fn is_enabled(&self, level: u8) -> bool {
        self.accepts_log(level) || self.accepts_trace(level)
    }

    fn accepts_log(&self, level: u8) -> bool {
        level > 0 && level <= self.log_level
    }

    fn accepts_trace(&self, level: u8) -> bool {
        level > 0 && level <= self.trace_level
    }

    /// Record an event at `level` in the in-memory log.
    pub fn log(&self, level: u8, args: fmt::Arguments<'_>) {
        if self.accepts_log(level) {
            self.record(level, fmt::format(args));
        }
    }

    /// Echo an event at `level` to the console trace.
    pub fn trace(&self, level: u8, args: fmt::Arguments<'_>) {
        if self.accepts_trace(level) {
            self.write_trace(level, args);
        }
    }

    /// Feed both sinks. The message is formatted at most once.
    pub fn event(&self, level: u8, args: fmt::Arguments<'_>) {
        let log = self.accepts_log(level);
        let trace = self.accepts_trace(level);
        match (log, trace) {
            (false, false) => {}
            (true, false) => self.record(level, fmt::format(args)),
            (false, true) => self.write_trace(level, args),
            (true, true) => {
                let message = fmt::format(args);
                self.write_trace(level, format_args!("{message}"));
                self.record(level, message);
            }
        }
    }

    fn record(&self, level: u8, message: String) {
        let ring = if level == 1 {
            self.events.as_ref()
        } else {
            self.verbose_events.as_ref()
        };
        let Some(ring) = ring else {
            return;
        };
        ring.push(EventEntry {
            timestamp: PROCESS_START.elapsed().as_secs_f64(),
            thread: current_thread_tag(),
            message,
        });
    }

    fn write_trace(&self, level: u8, args: fmt::Arguments<'_>) {
        let thread = current_thread_tag();
        let width = usize::from(level);
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut console = self.console.lock().unwrap();
        // Console failures must not disturb the caller.
        let _ = writeln!(console, "BridgeTrace-{level}[{thread}]:{:width$}{args}", "");
        let _ = console.flush();
    }

    pub fn event1(&self, args: fmt::Arguments<'_>) {
        self.event(1, args);
    }

    pub fn event2(&self, args: fmt::Arguments<'_>) {
        self.event(2, args);
    }

    pub fn event3(&self, args: fmt::Arguments<'_>) {
        self.event(3, args);
    }

    pub fn event4(&self, args: fmt::Arguments<'_>) {
        self.event(4, args);
    }

    /// Entries of the level-1 buffer, oldest first.
    pub fn events(&self) -> Vec<EventEntry> {
        self.events.as_ref().map(RingLog::snapshot).unwrap_or_default()
    }

    /// Entries of the verbose buffer, oldest first.
    pub fn verbose_events(&self) -> Vec<EventEntry> {
        self.verbose_events
            .as_ref()
            .map(RingLog::snapshot)
            .unwrap_or_default()
    }

    /// Dump both buffers in a human readable form.
    pub fn print_on(&self, out: &mut dyn Write) -> io::Result<()> {
        for ring in [self.events.as_ref(), self.verbose_events.as_ref()]
            .into_iter()
            .flatten()
        {
            let entries = ring.snapshot();
            writeln!(out, "{} ({} events):", ring.name, entries.len())?;
            if entries.is_empty() {
                writeln!(out, "No events")?;
            }
            for entry in entries {
                writeln!(
                    out,
                    "Event: {:.3} Thread {}: {}",
                    entry.timestamp, entry.thread, entry.message
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("log_level", &self.log_level)
            .field("trace_level", &self.trace_level)
            .field("events", &self.events)
            .field("verbose_events", &self.verbose_events)
            .finish_non_exhaustive()
    }
}

fn current_thread_tag() -> String {
    std::thread::current()
        .name()
        .unwrap_or(UNKNOWN_THREAD)
        .to_owned()
}

/// Log an event at an explicit level: `bridge_event!(log, 2, "x = {}", x)`.
#[macro_export]
macro_rules! bridge_event {
    ($log:expr, $level:expr, $($arg:tt)+) => {
        $log.event($level, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! bridge_event1 {
    ($log:expr, $($arg:tt)+) => {
        $log.event1(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! bridge_event2 {
    ($log:expr, $($arg:tt)+) => {
        $log.event2(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! bridge_event3 {
    ($log:expr, $($arg:tt)+) => {
        $log.event3(format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! bridge_event4 {
    ($log:expr, $($arg:tt)+) => {
        $log.event4(format_args!($($arg)+))
    };
}
