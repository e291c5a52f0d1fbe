//! Compiler bridge core: lifecycle and diagnostics for an external JIT
//! compiler attached to a managed-language runtime.
//!
//! The bridge owns the process-wide state the compiler needs: the runtime
//! instance(s) it talks to, the lazily loaded compiler shared library,
//! per-thread performance counters, the in-memory event logs and the crash
//! log used on fatal errors.
//!
//! # Architecture
//!
//! ```text
//! bridge     - CompilerBridge: init, shutdown, box caches, unloading hooks
//!   ├── loader     - compiler library resolution and one-time loading
//!   ├── counters   - per-thread counter blocks, retired pool, resize
//!   │     └── safepoint - global pause used by counter resizing
//!   ├── runtime    - runtime instances and metadata handle tables
//!   ├── thread     - attached threads and the compiled-code thread layout
//!   ├── event_log  - bounded event logs and console tracing
//!   └── crash_log  - single-writer fatal error log
//! ```
//!
//! # Feature Flags
//!
//! - `test-utils`: exposes allocation fault injection on the counter
//!   registry for downstream tests.

pub mod bridge;
pub mod config;
pub mod counters;
pub mod crash_log;
pub mod error;
pub mod event_log;
pub mod loader;
pub mod runtime;
pub mod safepoint;
pub mod thread;

// Re-exports for convenience
pub use bridge::{BOX_CACHE_CLASSES, BridgeBuilder, BridgeLock, CompilerBridge, HostRuntime};
pub use config::BridgeConfig;
pub use error::{BridgeError, CounterError, LoadError};
pub use event_log::EventLog;
pub use thread::{BridgeThread, CompileTask, ThreadKind};

#[cfg(test)]
mod tests;
