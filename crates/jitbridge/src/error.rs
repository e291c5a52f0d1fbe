//! Error types for the compiler bridge.

use std::path::PathBuf;

/// Errors returned by the library loader.
///
/// The loader never terminates the process itself; the bridge decides what a
/// failed load means for the embedding.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No candidate path could be built for the compiler library.
    #[error("unable to create path to compiler shared library{}", describe_search(.search_path))]
    PathResolution {
        /// Override directories that were searched, if any.
        search_path: Option<String>,
    },

    /// The OS loader rejected the resolved library.
    #[error("unable to load compiler shared library from {}: {reason}", .path.display())]
    Open {
        /// Path handed to the OS loader.
        path: PathBuf,
        /// OS error text.
        reason: String,
    },
}

fn describe_search(search_path: &Option<String>) -> String {
    match search_path {
        Some(dirs) => format!(" based on value of native library path ({dirs})"),
        None => String::new(),
    }
}

/// Errors returned by the counter registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    /// Collection buffer length differs from the configured counter count.
    #[error("wrong counter buffer length: {actual} (configured {expected})")]
    LengthMismatch { expected: usize, actual: usize },

    /// A new counter array could not be allocated; no block was changed.
    #[error("could not allocate counter array of {requested} entries")]
    AllocationFailed { requested: usize },
}

/// Errors surfaced by the lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The embedding runtime reported a failure (class initialization,
    /// compiler creation).
    #[error("host runtime error: {0}")]
    Host(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Counter(#[from] CounterError),

    /// The bridge has been shut down and accepts no further compiler work.
    #[error("compiler bridge is shutting down")]
    AlreadyShutDown,
}
