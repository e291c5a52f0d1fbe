//! Process-terminating paths of the bridge. Each test re-runs itself in a
//! child process that hits the fatal path, then inspects the exit status and
//! the crash log the child left behind.

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::{Command, ExitStatus};

    use crate::bridge::CompilerBridge;
    use crate::config::{BridgeConfig, SHARED_LIBRARY_NAME};
    use crate::loader::{DlOpener, LibraryOpener};
    use crate::tests::test_helpers::{RecordingHost, library_dir};

    const CASE_VAR: &str = "JITBRIDGE_TEST_FATAL_CASE";
    const DIR_VAR: &str = "JITBRIDGE_TEST_FATAL_DIR";
    const CRASH_LOG: &str = "crash.log";

    /// In the child: build a bridge that searches and logs into `dir`, then
    /// trigger the requested fatal path.
    fn trigger_fatal(case: &str, dir: &Path) {
        let config = BridgeConfig {
            native_library_path: Some(dir.to_string_lossy().into_owned()),
            native_library_error_file: Some(dir.join(CRASH_LOG).to_string_lossy().into_owned()),
            counter_size: 4,
            ..Default::default()
        };
        let bridge = CompilerBridge::initialize_globals(config, RecordingHost::ready());
        match case {
            "load" => {
                bridge.get_library(true);
            }
            "collect" => {
                let mut out = [0i64; 3];
                bridge.collect_counters(&mut out);
            }
            _ => {}
        }
    }

    /// Returns `true` when running as the child of [`run_child`].
    fn run_as_child() -> bool {
        match (std::env::var(CASE_VAR), std::env::var(DIR_VAR)) {
            (Ok(case), Ok(dir)) => {
                trigger_fatal(&case, Path::new(&dir));
                true
            }
            _ => false,
        }
    }

    /// Re-run `test_name` alone in a child process with the fatal switch set.
    fn run_child(test_name: &str, case: &str, dir: &Path) -> (ExitStatus, String) {
        let output = Command::new(std::env::current_exe().unwrap())
            .args(["--exact", test_name, "--nocapture", "--test-threads=1"])
            .env(CASE_VAR, case)
            .env(DIR_VAR, dir)
            .output()
            .unwrap();
        let crash_log = std::fs::read_to_string(dir.join(CRASH_LOG)).unwrap_or_default();
        (output.status, crash_log)
    }

    fn assert_aborted(status: ExitStatus) {
        assert!(!status.success(), "child exited normally: {status:?}");
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(status.signal(), Some(6), "child did not abort: {status:?}");
        }
    }

    #[test]
    fn test_library_open_failure_aborts_with_path_and_reason() {
        if run_as_child() {
            return;
        }
        let dir = library_dir();
        let library = dir
            .path()
            .join(libloading::library_filename(SHARED_LIBRARY_NAME));
        let reason = DlOpener.open(&library).unwrap_err();

        let (status, crash_log) = run_child(
            "tests::fatal_paths::tests::test_library_open_failure_aborts_with_path_and_reason",
            "load",
            dir.path(),
        );

        assert_aborted(status);
        assert!(
            crash_log.contains(&library.display().to_string()),
            "{crash_log}"
        );
        assert!(crash_log.contains(&reason), "{crash_log}");
    }

    #[test]
    fn test_missing_library_aborts_naming_search_path() {
        if run_as_child() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let (status, crash_log) = run_child(
            "tests::fatal_paths::tests::test_missing_library_aborts_naming_search_path",
            "load",
            dir.path(),
        );

        assert_aborted(status);
        assert!(
            crash_log.contains("unable to create path to compiler shared library"),
            "{crash_log}"
        );
        assert!(
            crash_log.contains(&dir.path().display().to_string()),
            "{crash_log}"
        );
    }

    #[test]
    fn test_wrong_collect_length_aborts() {
        if run_as_child() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let (status, crash_log) = run_child(
            "tests::fatal_paths::tests::test_wrong_collect_length_aborts",
            "collect",
            dir.path(),
        );

        assert_aborted(status);
        assert!(
            crash_log.contains("wrong counter buffer length: 3 (configured 4)"),
            "{crash_log}"
        );
    }
}
