//! Shared test doubles for bridge-level tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashSet;

use crate::bridge::{BridgeBuilder, CompilerBridge, HostRuntime};
use crate::config::{BridgeConfig, SHARED_LIBRARY_NAME};
use crate::loader::{LibraryOpener, NativeHandle};
use crate::runtime::RuntimeInstance;

/// Host that records every call made by the bridge.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub ready: AtomicBool,
    pub fail_compiler: AtomicBool,
    pub initialized: Mutex<FxHashSet<String>>,
    pub initialize_calls: AtomicUsize,
    pub compilers_created: Mutex<Vec<i32>>,
}

impl RecordingHost {
    pub fn ready() -> Arc<Self> {
        let host = Self::default();
        host.ready.store(true, Ordering::Relaxed);
        Arc::new(host)
    }

    pub fn is_initialized(&self, class: &str) -> bool {
        let initialized = self.initialized.lock().unwrap();
        initialized.contains(class)
    }
}

impl HostRuntime for RecordingHost {
    fn is_module_system_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn is_class_initialized(&self, class: &str) -> bool {
        self.is_initialized(class)
    }

    fn initialize_class(&self, class: &str) -> Result<(), String> {
        self.initialize_calls.fetch_add(1, Ordering::Relaxed);
        let mut initialized = self.initialized.lock().unwrap();
        initialized.insert(class.to_owned());
        Ok(())
    }

    fn create_compiler(&self, runtime: &RuntimeInstance) -> Result<(), String> {
        if self.fail_compiler.load(Ordering::Relaxed) {
            return Err("compiler factory threw".to_owned());
        }
        let mut created = self.compilers_created.lock().unwrap();
        created.push(runtime.id());
        Ok(())
    }
}

/// Opener that counts calls and sleeps to widen race windows.
#[derive(Debug, Default)]
pub struct SlowOpener {
    pub opens: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl LibraryOpener for SlowOpener {
    fn open(&self, path: &Path) -> Result<NativeHandle, String> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(NativeHandle::new(path.to_path_buf()))
    }
}

/// A directory holding an (empty) compiler library file.
pub fn library_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let file = dir
        .path()
        .join(libloading::library_filename(SHARED_LIBRARY_NAME));
    std::fs::write(file, b"").unwrap();
    dir
}

/// Config with the event log quiet on the console.
pub fn quiet_config() -> BridgeConfig {
    BridgeConfig {
        trace_level: 0,
        ..Default::default()
    }
}

pub fn builder(config: BridgeConfig, host: Arc<dyn HostRuntime>) -> BridgeBuilder {
    CompilerBridge::builder(config, host).with_trace_console(Box::new(std::io::sink()))
}
