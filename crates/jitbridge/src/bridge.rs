//! Lifecycle manager for the compiler bridge.
//!
//! [`CompilerBridge`] is the single context object holding every
//! process-wide piece of bridge state: runtime instances, the loaded
//! library, the counter registry, the event log and the crash log. The
//! embedding runtime builds it once at startup and passes it (usually as an
//! `Arc`) to every thread that needs it.
//!
//! Initialization order: event log, crash log, counter registry, library
//! loader, runtime instances, published thread layout.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::BridgeConfig;
use crate::counters::CounterRegistry;
use crate::crash_log::CrashLog;
use crate::error::BridgeError;
use crate::event_log::EventLog;
use crate::loader::{LibraryLoader, LibraryOpener, LoadedLibrary};
use crate::runtime::{Metadata, MetadataHandles, RuntimeInstance, RuntimeRole};
use crate::safepoint::{GlobalPause, Safepoint};
use crate::thread::{BridgeThread, PublishedField, ThreadKind, published_layout};

/// Box cache classes primed by [`CompilerBridge::ensure_box_caches_initialized`].
pub const BOX_CACHE_CLASSES: [&str; 6] = [
    "Boolean",
    "Byte$ByteCache",
    "Short$ShortCache",
    "Character$CharacterCache",
    "Integer$IntegerCache",
    "Long$LongCache",
];

/// Services the embedding runtime provides to the bridge.
pub trait HostRuntime: Send + Sync {
    /// Whether module and class loading have progressed far enough to bring
    /// the compiler bridge up.
    fn is_module_system_ready(&self) -> bool;

    fn is_class_initialized(&self, class: &str) -> bool;

    /// Run class initialization. The host serializes concurrent requests
    /// for the same class.
    fn initialize_class(&self, class: &str) -> Result<(), String>;

    /// Create the compiler object inside the compiler-side runtime.
    fn create_compiler(&self, runtime: &RuntimeInstance) -> Result<(), String>;
}

/// The bridge's coarse lock. Guards library loading and the shutdown
/// transition.
#[derive(Debug, Default)]
pub struct BridgeLock(Mutex<()>);

/// Proof that the bridge lock is held.
#[derive(Debug)]
pub struct BridgeGuard<'a> {
    _held: MutexGuard<'a, ()>,
}

impl BridgeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> BridgeGuard<'_> {
        // The guarded data is `()`, so a poisoned lock is still usable.
        BridgeGuard {
            _held: self.0.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Optional collaborators for [`CompilerBridge`] construction.
pub struct BridgeBuilder {
    config: BridgeConfig,
    host: Arc<dyn HostRuntime>,
    opener: Option<Box<dyn LibraryOpener>>,
    trace_console: Option<Box<dyn std::io::Write + Send>>,
}

impl BridgeBuilder {
    /// Open the compiler library with `opener` instead of the OS loader.
    pub fn with_opener(mut self, opener: Box<dyn LibraryOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Send console trace lines to `console` instead of stdout.
    pub fn with_trace_console(mut self, console: Box<dyn std::io::Write + Send>) -> Self {
        self.trace_console = Some(console);
        self
    }

    pub fn build(self) -> CompilerBridge {
        let BridgeBuilder {
            config,
            host,
            opener,
            trace_console,
        } = self;

        let events = Arc::new(match trace_console {
            Some(console) => EventLog::with_console(&config, console),
            None => EventLog::new(&config),
        });
        let crash_log = CrashLog::new(&config);
        let safepoint = Arc::new(Safepoint::new());
        let pause: Arc<dyn GlobalPause> = safepoint.clone();
        let counters = CounterRegistry::new(
            config.counter_size,
            config.counters_exclude_compiler,
            pause,
        );
        let loader = match opener {
            Some(opener) => LibraryLoader::with_opener(&config, Arc::clone(&events), opener),
            None => LibraryLoader::new(&config, Arc::clone(&events)),
        };

        let (compiler_runtime, java_runtime) = if config.use_native_library {
            (
                Arc::new(RuntimeInstance::new(0, RuntimeRole::Compiler)),
                Arc::new(RuntimeInstance::new(-1, RuntimeRole::Managed)),
            )
        } else {
            let shared = Arc::new(RuntimeInstance::new(0, RuntimeRole::Shared));
            (Arc::clone(&shared), shared)
        };

        let layout = published_layout();
        for field in &layout {
            tracing::debug!(
                field = field.name,
                offset = field.offset.in_bytes(),
                "Published thread state field"
            );
        }

        tracing::info!(
            native_library = config.use_native_library,
            counter_size = config.counter_size,
            event_log_level = config.event_log_level,
            trace_level = config.trace_level,
            "Compiler bridge globals initialized"
        );

        CompilerBridge {
            config,
            host,
            lock: BridgeLock::new(),
            events,
            crash_log,
            loader,
            counters,
            safepoint,
            compiler_runtime,
            java_runtime,
            published_layout: layout,
            is_initialized: AtomicBool::new(false),
            box_caches_initialized: AtomicBool::new(false),
            in_shutdown: AtomicBool::new(false),
            next_thread_id: AtomicU64::new(1),
        }
    }
}

/// Process-wide compiler bridge state.
pub struct CompilerBridge {
    config: BridgeConfig,
    host: Arc<dyn HostRuntime>,
    lock: BridgeLock,
    events: Arc<EventLog>,
    crash_log: CrashLog,
    loader: LibraryLoader,
    counters: CounterRegistry,
    safepoint: Arc<Safepoint>,
    compiler_runtime: Arc<RuntimeInstance>,
    java_runtime: Arc<RuntimeInstance>,
    published_layout: Vec<PublishedField>,
    is_initialized: AtomicBool,
    box_caches_initialized: AtomicBool,
    in_shutdown: AtomicBool,
    next_thread_id: AtomicU64,
}

impl CompilerBridge {
    /// Build every global piece of bridge state. Call once.
    pub fn initialize_globals(config: BridgeConfig, host: Arc<dyn HostRuntime>) -> Self {
        Self::builder(config, host).build()
    }

    pub fn builder(config: BridgeConfig, host: Arc<dyn HostRuntime>) -> BridgeBuilder {
        BridgeBuilder {
            config,
            host,
            opener: None,
            trace_console: None,
        }
    }

    /// Whether the host is ready for the bridge to be brought up.
    pub fn can_initialize(&self) -> bool {
        self.host.is_module_system_ready()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn crash_log(&self) -> &CrashLog {
        &self.crash_log
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// Global pause used for counter resizing. Mutator threads enter it
    /// around writes to their own counters.
    pub fn safepoint(&self) -> &Arc<Safepoint> {
        &self.safepoint
    }

    pub fn lock(&self) -> &BridgeLock {
        &self.lock
    }

    pub fn compiler_runtime(&self) -> &Arc<RuntimeInstance> {
        &self.compiler_runtime
    }

    pub fn java_runtime(&self) -> &Arc<RuntimeInstance> {
        &self.java_runtime
    }

    /// Whether the compiler side and managed side are separate instances.
    pub fn has_separate_runtimes(&self) -> bool {
        !Arc::ptr_eq(&self.compiler_runtime, &self.java_runtime)
    }

    /// Offsets registered for introspection tooling.
    pub fn published_layout(&self) -> &[PublishedField] {
        &self.published_layout
    }

    /// Ask the compiler-side runtime to create its compiler.
    pub fn initialize_compiler(&self) -> Result<(), BridgeError> {
        if self.in_shutdown() {
            return Err(BridgeError::AlreadyShutDown);
        }
        self.host
            .create_compiler(&self.compiler_runtime)
            .map_err(BridgeError::Host)?;
        self.mark_compiler_initialized();
        crate::bridge_event1!(self.events, "initialized compiler");
        Ok(())
    }

    /// Record that the compiler was brought up outside
    /// [`initialize_compiler`](Self::initialize_compiler).
    pub fn mark_compiler_initialized(&self) {
        self.is_initialized.store(true, Ordering::Release);
    }

    pub fn is_compiler_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::Acquire)
    }

    /// Initialize the box cache classes once.
    ///
    /// Racing callers may both reach the host; the host's class
    /// initialization makes that harmless.
    pub fn ensure_box_caches_initialized(&self) -> Result<(), BridgeError> {
        if self.box_caches_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        for class in BOX_CACHE_CLASSES {
            if !self.host.is_class_initialized(class) {
                self.host.initialize_class(class).map_err(BridgeError::Host)?;
            }
        }
        self.box_caches_initialized.store(true, Ordering::Release);
        crate::bridge_event2!(self.events, "box caches initialized");
        Ok(())
    }

    /// Stop accepting compiler work and shut both runtimes down.
    pub fn shutdown(&self) {
        {
            let _guard = self.lock.lock();
            self.in_shutdown.store(true, Ordering::Release);
            crate::bridge_event1!(self.events, "shutting down compiler bridge");
        }
        tracing::info!("Compiler bridge shutting down");
        if self.has_separate_runtimes() {
            self.java_runtime.shutdown();
        }
        self.compiler_runtime.shutdown();
    }

    pub fn in_shutdown(&self) -> bool {
        self.in_shutdown.load(Ordering::Acquire)
    }

    /// Register the calling thread with the bridge.
    pub fn attach_thread(&self, name: impl Into<String>, kind: ThreadKind) -> Arc<BridgeThread> {
        let counters = self.counters.attach(kind == ThreadKind::Compiler);
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(BridgeThread::new(name, kind, counters, id));
        crate::bridge_event3!(
            self.events,
            "attached {:?} thread {}",
            kind,
            thread.name()
        );
        thread
    }

    /// Unregister a terminating thread, retiring its counters.
    pub fn detach_thread(&self, thread: &BridgeThread) {
        self.counters.free(thread.counters());
        crate::bridge_event3!(self.events, "detached thread {}", thread.name());
    }

    /// Record progress of a blocking compilation running on `thread`.
    pub fn compilation_tick<'a>(&self, thread: &'a BridgeThread) -> &'a BridgeThread {
        if thread.is_compiler_thread()
            && let Some(task) = thread.task()
            && let Some(state) = &task.blocking_state
        {
            state.inc_compilation_ticks();
        }
        thread
    }

    /// Forward a class-unloading notification to every distinct runtime.
    pub fn do_unloading(&self, unloading_occurred: bool) {
        if !unloading_occurred {
            return;
        }
        self.java_runtime.metadata_handles().do_unloading();
        if self.has_separate_runtimes() {
            self.compiler_runtime.metadata_handles().do_unloading();
        }
    }

    /// Visit the metadata held by every distinct runtime.
    pub fn metadata_walk(&self, visitor: &mut dyn FnMut(&Metadata)) {
        self.java_runtime.metadata_handles().metadata_do(visitor);
        if self.has_separate_runtimes() {
            self.compiler_runtime.metadata_handles().metadata_do(visitor);
        }
    }

    /// The compiler library, loading it if `load` is set. A failed load
    /// terminates the process.
    pub fn get_library(&self, load: bool) -> Option<&LoadedLibrary> {
        match self.loader.get_library(load, &self.lock) {
            Ok(library) => library,
            Err(error) => self.fatal(format_args!("{error}")),
        }
    }

    pub fn loader(&self) -> &LibraryLoader {
        &self.loader
    }

    /// Sum all counters into `out`. A buffer of the wrong length
    /// terminates the process.
    pub fn collect_counters(&self, out: &mut [i64]) {
        if let Err(error) = self.counters.collect(out) {
            self.fatal(format_args!("{error}"));
        }
    }

    /// Resize every counter block. Returns `false`, with nothing changed, if
    /// the new arrays could not be allocated.
    pub fn resize_counters(&self, new_size: usize) -> bool {
        self.counters.resize_all(new_size).is_ok()
    }

    /// Drop the counts of retired threads.
    pub fn free_global_counters(&self) {
        self.counters.free_global();
    }

    /// Write raw crash diagnostics. Safe from threads not attached to the
    /// bridge.
    pub fn fatal_log(&self, buf: &[u8]) {
        self.crash_log.write(buf);
    }

    /// Report an unrecoverable error and abort.
    pub fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        let message = fmt::format(args);
        tracing::error!(%message, "Fatal compiler bridge error");
        self.crash_log
            .write(format!("# Fatal error in compiler bridge: {message}\n").as_bytes());
        std::process::abort()
    }
}

impl fmt::Debug for CompilerBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerBridge")
            .field("compiler_runtime", &self.compiler_runtime)
            .field("java_runtime", &self.java_runtime)
            .field("loader", &self.loader)
            .field("counters", &self.counters)
            .field("in_shutdown", &self.in_shutdown())
            .finish_non_exhaustive()
    }
}
