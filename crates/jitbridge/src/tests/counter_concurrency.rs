//! Counter tests driven through the bridge: attach/detach accounting,
//! collection while threads retire, and resizing under a global pause.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use serial_test::serial;

    use crate::config::BridgeConfig;
    use crate::tests::test_helpers::{RecordingHost, builder, quiet_config};
    use crate::thread::ThreadKind;

    fn counting_config(size: usize) -> BridgeConfig {
        BridgeConfig {
            counter_size: size,
            ..quiet_config()
        }
    }

    #[test]
    fn test_detached_thread_counts_survive() {
        let bridge = builder(counting_config(4), RecordingHost::ready()).build();
        let worker = bridge.attach_thread("worker", ThreadKind::Managed);
        for _ in 0..5 {
            worker.counters().increment(0);
        }
        bridge.detach_thread(&worker);

        let other = bridge.attach_thread("other", ThreadKind::Managed);
        other.counters().increment(0);

        let mut out = [0i64; 4];
        bridge.collect_counters(&mut out);
        assert_eq!(out, [6, 0, 0, 0]);
    }

    #[test]
    fn test_compiler_threads_excluded_by_default() {
        let bridge = builder(counting_config(2), RecordingHost::ready()).build();
        let compiler = bridge.attach_thread("compiler", ThreadKind::Compiler);
        let managed = bridge.attach_thread("main", ThreadKind::Managed);
        compiler.counters().add(1, 100);
        managed.counters().add(1, 3);

        bridge.detach_thread(&compiler);
        let mut out = [0i64; 2];
        bridge.collect_counters(&mut out);
        assert_eq!(out, [0, 3]);
    }

    #[test]
    fn test_compiler_threads_included_when_configured() {
        let config = BridgeConfig {
            counters_exclude_compiler: false,
            ..counting_config(1)
        };
        let bridge = builder(config, RecordingHost::ready()).build();
        let compiler = bridge.attach_thread("compiler", ThreadKind::Compiler);
        compiler.counters().add(0, 7);

        assert_eq!(bridge.counters().totals(), vec![7]);
        bridge.detach_thread(&compiler);
        assert_eq!(bridge.counters().retired(), vec![7]);
    }

    #[test]
    fn test_thread_state_points_at_counter_block() {
        let bridge = builder(counting_config(1), RecordingHost::ready()).build();
        let thread = bridge.attach_thread("main", ThreadKind::Managed);
        let address = Arc::as_ptr(thread.counters()).addr();
        assert_eq!(thread.with_state(|s| s.bridge.counters), address);
        assert_eq!(thread.with_state(|s| s.bridge.pending_deoptimization), -1);
    }

    #[test]
    fn test_resize_through_bridge() {
        let bridge = builder(counting_config(4), RecordingHost::ready()).build();
        let thread = bridge.attach_thread("main", ThreadKind::Managed);
        for (index, delta) in [1, 2, 3, 4].into_iter().enumerate() {
            thread.counters().add(index, delta);
        }

        assert!(bridge.resize_counters(8));
        assert_eq!(thread.counters().snapshot(), vec![1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(bridge.counters().retired().len(), 8);
        assert_eq!(bridge.safepoint().pause_count(), 1);

        assert!(bridge.resize_counters(2));
        let mut out = [0i64; 2];
        bridge.collect_counters(&mut out);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_failed_resize_leaves_counters_untouched() {
        let bridge = builder(counting_config(2), RecordingHost::ready()).build();
        let thread = bridge.attach_thread("main", ThreadKind::Managed);
        thread.counters().add(1, 9);
        bridge.attach_thread("second", ThreadKind::Managed);

        // Three arrays are needed (pool and two blocks); only two succeed.
        bridge.counters().set_allocation_budget(Some(2));
        assert!(!bridge.resize_counters(16));
        bridge.counters().set_allocation_budget(None);

        assert_eq!(bridge.counters().size(), 2);
        assert_eq!(thread.counters().snapshot(), vec![0, 9]);
    }

    #[test]
    fn test_free_global_resets_pool() {
        let bridge = builder(counting_config(3), RecordingHost::ready()).build();
        let thread = bridge.attach_thread("main", ThreadKind::Managed);
        thread.counters().add(2, 5);
        bridge.detach_thread(&thread);
        assert_eq!(bridge.counters().retired(), vec![0, 0, 5]);

        bridge.free_global_counters();
        assert_eq!(bridge.counters().retired(), vec![0, 0, 0]);
    }

    #[test]
    #[serial]
    fn test_collect_while_threads_retire() {
        const THREADS: i64 = 8;
        const INCREMENTS: i64 = 2_000;

        let bridge = Arc::new(builder(counting_config(1), RecordingHost::ready()).build());
        let done = Arc::new(AtomicBool::new(false));

        let collector = {
            let bridge = Arc::clone(&bridge);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut previous = 0;
                while !done.load(Ordering::Acquire) {
                    let mut out = [0i64; 1];
                    bridge.collect_counters(&mut out);
                    // Totals never go backwards and never exceed the work done.
                    assert!(out[0] >= previous);
                    assert!(out[0] <= THREADS * INCREMENTS);
                    previous = out[0];
                }
            })
        };

        let workers: Vec<_> = (0..THREADS)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    let thread = bridge.attach_thread(format!("worker-{i}"), ThreadKind::Managed);
                    for _ in 0..INCREMENTS {
                        let _running = bridge.safepoint().enter();
                        thread.counters().increment(0);
                    }
                    bridge.detach_thread(&thread);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        collector.join().unwrap();

        assert_eq!(bridge.counters().retired(), vec![THREADS * INCREMENTS]);
        assert_eq!(bridge.counters().live_count(), 0);
    }

    #[test]
    #[serial]
    fn test_resize_while_threads_increment() {
        const THREADS: usize = 4;
        const INCREMENTS: i64 = 1_000;

        let bridge = Arc::new(builder(counting_config(2), RecordingHost::ready()).build());
        let attached: Vec<_> = (0..THREADS)
            .map(|i| bridge.attach_thread(format!("worker-{i}"), ThreadKind::Managed))
            .collect();

        let workers: Vec<_> = attached
            .iter()
            .cloned()
            .map(|thread| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    for _ in 0..INCREMENTS {
                        let _running = bridge.safepoint().enter();
                        assert!(thread.counters().increment(0));
                    }
                })
            })
            .collect();

        for size in [4, 8, 3, 6] {
            assert!(bridge.resize_counters(size));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(bridge.counters().size(), 6);
        let totals = bridge.counters().totals();
        assert_eq!(totals.len(), 6);
        assert_eq!(totals[0], INCREMENTS * i64::try_from(THREADS).unwrap());
        for thread in &attached {
            assert_eq!(thread.counters().len(), 6);
        }
    }
}
