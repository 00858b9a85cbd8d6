// End-to-end shutdown sequences driven by real SIGINT/SIGTERM deliveries.
// Signals are only raised while a coordinator is alive (or inside a child
// process), otherwise the default action would kill the test process.

use serial_test::serial;
use sigdrain::{
    clear_log_file, set_log_file, wait_for_shutdown, CancelCause, Context, ShutdownCoordinator,
    ShutdownHook, ShutdownSignal,
};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[test]
#[serial]
fn test_wait_blocks_until_counter_drains() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("sigdrain.log");
    set_log_file(&log_path).unwrap();

    let coordinator = ShutdownCoordinator::init().unwrap();
    let wg = coordinator.wait_group().clone();
    wg.add(1);
    wg.add(1);

    let returned = Arc::new(AtomicBool::new(false));
    let waiter = {
        let notifier = coordinator.notifier().clone();
        let wg = wg.clone();
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let report = wait_for_shutdown(&notifier, &wg, Vec::new());
            returned.store(true, Ordering::SeqCst);
            report
        })
    };

    ShutdownSignal::Terminate.raise().unwrap();
    assert_eq!(
        coordinator.notifier().recv_timeout(Duration::from_secs(5)),
        Some(ShutdownSignal::Terminate)
    );

    wg.done();
    thread::sleep(Duration::from_millis(100));
    assert!(!returned.load(Ordering::SeqCst), "wait returned with one task outstanding");

    wg.done();
    let report = waiter.join().unwrap();
    assert!(returned.load(Ordering::SeqCst));
    assert_eq!(report.signal, Some(ShutdownSignal::Terminate));
    assert!(report.drained);
    assert_eq!(report.outstanding, 0);

    drop(coordinator);
    clear_log_file();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let received = contents
        .find("Received signal SIGTERM. Waiting for running tasks to finish...")
        .expect("signal receipt not logged");
    let finished = contents.find("Shutting down...").expect("completion not logged");
    assert!(received < finished);
}

#[test]
#[serial]
fn test_signal_unblocks_idle_wait() {
    let coordinator = ShutdownCoordinator::init().unwrap();

    let waiter = {
        let notifier = coordinator.notifier().clone();
        let wg = coordinator.wait_group().clone();
        thread::spawn(move || wait_for_shutdown(&notifier, &wg, Vec::new()))
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    ShutdownSignal::Interrupt.raise().unwrap();

    let report = waiter.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.signal, Some(ShutdownSignal::Interrupt));
    assert!(report.drained);
}

#[test]
#[serial]
fn test_sigint_cancels_derived_context() {
    let coordinator = ShutdownCoordinator::init().unwrap();
    let ctx = coordinator
        .cancellable_context(&Context::background())
        .unwrap();
    let sibling = coordinator
        .cancellable_context(&Context::background())
        .unwrap();
    assert!(!ctx.is_cancelled());

    ShutdownSignal::Interrupt.raise().unwrap();

    let cause = ctx.wait_timeout(Duration::from_secs(5));
    assert_eq!(cause, Some(CancelCause::Signal(ShutdownSignal::Interrupt)));
    assert_eq!(
        sibling.wait_timeout(Duration::from_secs(5)),
        Some(CancelCause::Signal(ShutdownSignal::Interrupt))
    );

    // Later signals never revert or replace the cancellation.
    ShutdownSignal::Terminate.raise().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while coordinator.notifier().deliveries() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(coordinator.notifier().deliveries(), 2);
    assert_eq!(ctx.cause(), Some(CancelCause::Signal(ShutdownSignal::Interrupt)));
    assert_eq!(coordinator.notifier().try_recv(), Some(ShutdownSignal::Interrupt));
}

#[test]
#[serial]
fn test_hooks_run_once_in_order_on_signal() {
    let coordinator = ShutdownCoordinator::init().unwrap();
    let calls = Arc::new(std::sync::Mutex::new(Vec::new()));

    for name in ["close-listener", "flush-queue"] {
        let calls = Arc::clone(&calls);
        coordinator.on_shutdown(move || calls.lock().unwrap().push(name));
    }

    let guard = coordinator.wait_group().enter();
    let hook_calls = Arc::clone(&calls);
    let worker = thread::spawn(move || {
        // Finish the in-flight unit only after the hooks have run.
        while hook_calls.lock().unwrap().len() < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        drop(guard);
    });

    ShutdownSignal::Terminate.raise().unwrap();
    let stop_accepting: ShutdownHook<'_> = Box::new(|| calls.lock().unwrap().push("stop-accepting"));
    let report = coordinator.wait_for_shutdown(vec![stop_accepting]);
    worker.join().unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["close-listener", "flush-queue", "stop-accepting"]
    );
    assert_eq!(report.hooks_run, 3);
    assert!(report.drained);
}

#[test]
#[serial]
fn test_subset_of_signals() {
    let config = sigdrain::ShutdownConfig {
        signals: vec!["SIGTERM".to_string()],
        ..sigdrain::ShutdownConfig::default()
    };
    let coordinator = ShutdownCoordinator::with_config(config).unwrap();

    ShutdownSignal::Terminate.raise().unwrap();
    assert_eq!(
        coordinator.notifier().recv_timeout(Duration::from_secs(5)),
        Some(ShutdownSignal::Terminate)
    );
}

#[test]
#[serial]
fn test_new_coordinator_receives_signals_after_drop() {
    drop(ShutdownCoordinator::init().unwrap());

    let coordinator = ShutdownCoordinator::init().unwrap();
    ShutdownSignal::Interrupt.raise().unwrap();
    assert_eq!(
        coordinator.notifier().recv_timeout(Duration::from_secs(5)),
        Some(ShutdownSignal::Interrupt)
    );
}

/// Set in the child process spawned by `test_sigterm_after_drop_terminates_process`
const CHILD_ENV: &str = "SIGDRAIN_TEST_CHILD";

#[test]
#[serial]
fn test_sigterm_after_drop_terminates_process() {
    if std::env::var_os(CHILD_ENV).is_some() {
        drop(ShutdownCoordinator::init().unwrap());
        ShutdownSignal::Terminate.raise().unwrap();
        thread::sleep(Duration::from_secs(5));
        // Still alive: the signal was swallowed.
        std::process::exit(0);
    }

    let status = Command::new(std::env::current_exe().unwrap())
        .args([
            "test_sigterm_after_drop_terminates_process",
            "--exact",
            "--test-threads=1",
        ])
        .env(CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert_eq!(status.signal(), Some(ShutdownSignal::Terminate.as_raw()));
}
