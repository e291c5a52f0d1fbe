//! Concurrent loading of the compiler library.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    use crate::config::BridgeConfig;
    use crate::tests::test_helpers::{RecordingHost, SlowOpener, builder, library_dir, quiet_config};

    #[test]
    fn test_racing_loads_open_once() {
        let dir = library_dir();
        let opens = Arc::new(AtomicUsize::new(0));
        let config = BridgeConfig {
            runtime_library_dir: dir.path().to_path_buf(),
            ..quiet_config()
        };
        let bridge = Arc::new(
            builder(config, RecordingHost::ready())
                .with_opener(Box::new(SlowOpener {
                    opens: Arc::clone(&opens),
                    delay: Duration::from_millis(20),
                }))
                .build(),
        );

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    bridge
                        .get_library(true)
                        .map(|library| std::ptr::from_ref(library).addr())
                })
            })
            .collect();
        let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(loaded[0].is_some());
        assert_eq!(loaded[0], loaded[1]);
        assert_eq!(bridge.loader().open_attempts(), 1);

        let logged = bridge.events().events();
        let loads = logged
            .iter()
            .filter(|e| e.message.starts_with("loaded compiler shared library from "))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_lookup_without_load_never_opens() {
        let dir = library_dir();
        let opens = Arc::new(AtomicUsize::new(0));
        let config = BridgeConfig {
            runtime_library_dir: dir.path().to_path_buf(),
            ..quiet_config()
        };
        let bridge = builder(config, RecordingHost::ready())
            .with_opener(Box::new(SlowOpener {
                opens: Arc::clone(&opens),
                delay: Duration::ZERO,
            }))
            .build();

        assert!(bridge.get_library(false).is_none());
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        let path = bridge.get_library(true).unwrap().path().to_path_buf();
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(bridge.get_library(false).is_some());
    }
}
