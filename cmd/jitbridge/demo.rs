//! Host runtime stand-in and the counter exercise run by the binary.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use jitbridge::runtime::RuntimeInstance;
use jitbridge::thread::published_layout;
use jitbridge::{CompilerBridge, HostRuntime, ThreadKind};
use tracing::{debug, info};

/// Host that is always ready and initializes classes by recording them.
#[derive(Debug, Default)]
pub struct DemoHost {
    initialized: Mutex<Vec<String>>,
}

impl HostRuntime for DemoHost {
    fn is_module_system_ready(&self) -> bool {
        true
    }

    fn is_class_initialized(&self, class: &str) -> bool {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let initialized = self.initialized.lock().unwrap();
        initialized.iter().any(|c| c == class)
    }

    fn initialize_class(&self, class: &str) -> Result<(), String> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut initialized = self.initialized.lock().unwrap();
        if !initialized.iter().any(|c| c == class) {
            debug!(class, "Initializing class");
            initialized.push(class.to_owned());
        }
        Ok(())
    }

    fn create_compiler(&self, runtime: &RuntimeInstance) -> Result<(), String> {
        info!(runtime = runtime.id(), "Compiler created");
        Ok(())
    }
}

/// Attach `threads` workers that bump every counter `increments` times,
/// detach half of them, then optionally resize. Returns the collected
/// totals.
pub fn run_counter_exercise(
    bridge: &Arc<CompilerBridge>,
    threads: usize,
    increments: u32,
    resize: Option<usize>,
) -> Vec<i64> {
    let workers: Vec<_> = (0..threads)
        .map(|i| {
            let bridge = Arc::clone(bridge);
            std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    let thread = bridge.attach_thread(format!("worker-{i}"), ThreadKind::Managed);
                    for _ in 0..increments {
                        let _running = bridge.safepoint().enter();
                        for index in 0..thread.counters().len() {
                            thread.counters().increment(index);
                        }
                    }
                    thread
                })
        })
        .filter_map(Result::ok)
        .collect();

    let attached: Vec<_> = workers
        .into_iter()
        .filter_map(|handle| handle.join().ok())
        .collect();
    for thread in attached.iter().step_by(2) {
        bridge.detach_thread(thread);
    }

    if let Some(new_size) = resize {
        let resized = bridge.resize_counters(new_size);
        info!(new_size, resized, "Counter resize requested");
    }

    let mut totals = vec![0; bridge.counters().size()];
    bridge.collect_counters(&mut totals);

    for thread in attached.iter().skip(1).step_by(2) {
        bridge.detach_thread(thread);
    }
    totals
}

pub fn print_report(
    out: &mut dyn Write,
    bridge: &CompilerBridge,
    totals: &[i64],
    print_events: bool,
) -> io::Result<()> {
    writeln!(out, "counters: {totals:?}")?;
    writeln!(out, "published thread layout:")?;
    for field in published_layout() {
        writeln!(out, "  {:<24} {}", field.name, field.offset.in_bytes())?;
    }
    if print_events {
        bridge.events().print_on(out)?;
    }
    Ok(())
}
