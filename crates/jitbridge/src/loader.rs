//! Lazy loading of the external compiler library.
//!
//! The library is resolved and opened at most once per process. Lookups of
//! an already loaded library are lock-free; the first load runs under the
//! bridge lock and re-checks for a library installed by a racing thread.
//!
//! A failed load is returned as a [`LoadError`]. Whether that is fatal is the
//! caller's decision.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::bridge::{BridgeGuard, BridgeLock};
use crate::config::{BridgeConfig, SHARED_LIBRARY_NAME};
use crate::error::LoadError;
use crate::event_log::EventLog;

/// Type-erased handle returned by a [`LibraryOpener`].
pub struct NativeHandle(Box<dyn Any + Send + Sync>);

impl NativeHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Box::new(inner))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle").finish_non_exhaustive()
    }
}

/// Opens a shared library at a resolved path.
pub trait LibraryOpener: Send + Sync {
    /// Open `path`, returning the OS error text on failure.
    fn open(&self, path: &Path) -> Result<NativeHandle, String>;
}

/// [`LibraryOpener`] backed by the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlOpener;

impl LibraryOpener for DlOpener {
    fn open(&self, path: &Path) -> Result<NativeHandle, String> {
        // SAFETY: the compiler library's initializers are trusted to be
        // sound; loading it is the documented purpose of this opener.
        #[allow(unsafe_code)]
        let library = unsafe { libloading::Library::new(path) };
        library.map(NativeHandle::new).map_err(|e| e.to_string())
    }
}

/// The loaded compiler library. Never unloaded.
#[derive(Debug)]
pub struct LoadedLibrary {
    handle: NativeHandle,
    path: PathBuf,
}

impl LoadedLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    /// The underlying library when opened by [`DlOpener`].
    pub fn as_library(&self) -> Option<&libloading::Library> {
        self.handle.downcast_ref()
    }
}

/// Resolves and opens the compiler library once.
pub struct LibraryLoader {
    library: OnceLock<LoadedLibrary>,
    search_path: Option<String>,
    default_dir: PathBuf,
    library_name: String,
    opener: Box<dyn LibraryOpener>,
    events: Arc<EventLog>,
    open_attempts: AtomicUsize,
}

impl LibraryLoader {
    pub fn new(config: &BridgeConfig, events: Arc<EventLog>) -> Self {
        Self::with_opener(config, events, Box::new(DlOpener))
    }

    pub fn with_opener(
        config: &BridgeConfig,
        events: Arc<EventLog>,
        opener: Box<dyn LibraryOpener>,
    ) -> Self {
        Self {
            library: OnceLock::new(),
            search_path: config.native_library_path.clone(),
            default_dir: config.runtime_library_dir.clone(),
            library_name: SHARED_LIBRARY_NAME.to_owned(),
            opener,
            events,
            open_attempts: AtomicUsize::new(0),
        }
    }

    /// Use a different library base name.
    pub fn with_library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    /// The loaded library, if any. Never blocks.
    pub fn cached(&self) -> Option<&LoadedLibrary> {
        self.library.get()
    }

    /// Return the loaded library, loading it first when `load` is set and
    /// nothing is cached.
    ///
    /// With `load == false` this is equivalent to [`cached`](Self::cached).
    pub fn get_library(
        &self,
        load: bool,
        lock: &BridgeLock,
    ) -> Result<Option<&LoadedLibrary>, LoadError> {
        if let Some(library) = self.library.get() {
            return Ok(Some(library));
        }
        if !load {
            return Ok(None);
        }
        let guard = lock.lock();
        self.load_locked(&guard).map(Some)
    }

    /// Load the library. The caller holds the bridge lock.
    pub fn load_locked(&self, _held: &BridgeGuard<'_>) -> Result<&LoadedLibrary, LoadError> {
        // Another thread may have loaded it while we waited for the lock.
        if let Some(library) = self.library.get() {
            return Ok(library);
        }

        let path = self.resolve_path()?;
        self.open_attempts.fetch_add(1, Ordering::Relaxed);
        let handle = self.opener.open(&path).map_err(|reason| LoadError::Open {
            path: path.clone(),
            reason,
        })?;

        crate::bridge_event1!(
            self.events,
            "loaded compiler shared library from {}",
            path.display()
        );
        tracing::info!(path = %path.display(), "Loaded compiler shared library");

        Ok(self.library.get_or_init(|| LoadedLibrary { handle, path }))
    }

    /// How many times the opener has been invoked.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::Relaxed)
    }

    /// Pick the library file: the first override directory holding it, or
    /// the runtime library directory when no override is configured.
    pub fn resolve_path(&self) -> Result<PathBuf, LoadError> {
        let file_name = libloading::library_filename(&self.library_name);
        let found = match &self.search_path {
            Some(dirs) => std::env::split_paths(dirs)
                .map(|dir| dir.join(&file_name))
                .find(|candidate| candidate.is_file()),
            None => Some(self.default_dir.join(&file_name)).filter(|p| p.is_file()),
        };
        found.ok_or_else(|| LoadError::PathResolution {
            search_path: self.search_path.clone(),
        })
    }
}

impl std::fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryLoader")
            .field("library", &self.library.get())
            .field("search_path", &self.search_path)
            .field("default_dir", &self.default_dir)
            .field("library_name", &self.library_name)
            .finish_non_exhaustive()
    }
}
