use crate::config::ShutdownConfig;
use crate::context::{CancelCause, Context};
use crate::logging::log;
use crate::signal::{self, ShutdownSignal, SignalNotifier};
use crate::wait_group::WaitGroup;

use nix::unistd::getpid;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

/// Set while a coordinator owns the process signal registration
static COORDINATOR_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Cleanup callback run once shutdown starts
///
/// Hooks should initiate cleanup (stop accepting, close listeners), not wait
/// for it; the drain wait that follows covers completion.
pub type ShutdownHook<'a> = Box<dyn FnOnce() + 'a>;

/// Outcome of a completed `wait_for_shutdown`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Signal that started the shutdown; `None` if the channel was closed instead
    pub signal: Option<ShutdownSignal>,
    /// Hooks invoked, including those that panicked
    pub hooks_run: usize,
    pub hooks_panicked: usize,
    /// `false` if the drain deadline expired with work still in flight
    pub drained: bool,
    /// Work units still registered when the call returned
    pub outstanding: usize,
}

/// Blocks until shutdown is signalled, runs `hooks`, then waits for the work to drain
///
/// Uses the default settings: no drain deadline, hook panics isolated.
pub fn wait_for_shutdown(
    notifier: &SignalNotifier,
    wait_group: &WaitGroup,
    hooks: Vec<ShutdownHook<'_>>,
) -> ShutdownReport {
    wait_for_shutdown_with(notifier, wait_group, hooks, &ShutdownConfig::default())
}

/// `wait_for_shutdown` honoring the drain deadline and panic policy in `config`
///
/// # Panics
/// Re-raises a hook panic when `config.isolate_hook_panics` is false
pub fn wait_for_shutdown_with(
    notifier: &SignalNotifier,
    wait_group: &WaitGroup,
    hooks: Vec<ShutdownHook<'_>>,
    config: &ShutdownConfig,
) -> ShutdownReport {
    let signal = notifier.recv();
    match signal {
        Some(sig) => {
            let _ = log(&format!(
                "Received signal {}. Waiting for running tasks to finish...",
                sig
            ));
        }
        None => {
            let _ = log("Signal channel closed. Waiting for running tasks to finish...");
        }
    }

    let (hooks_run, hooks_panicked) = run_hooks(hooks, config.isolate_hook_panics);

    let drained = match config.drain_timeout() {
        Some(timeout) => wait_group.wait_timeout(timeout),
        None => {
            wait_group.wait();
            true
        }
    };
    let outstanding = wait_group.count();

    if drained {
        let _ = log("Shutting down...");
    } else {
        let _ = log(&format!(
            "Drain deadline of {}s expired with {} task(s) still running. Shutting down...",
            config.drain_timeout_secs.unwrap_or_default(),
            outstanding
        ));
    }

    ShutdownReport {
        signal,
        hooks_run,
        hooks_panicked,
        drained,
        outstanding,
    }
}

/// Derives a child of `parent` that cancels itself when shutdown is signalled
///
/// Returns immediately. A dedicated listener thread blocks on `notifier` and
/// cancels the child with `CancelCause::Signal` once a signal is recorded; it
/// exits without cancelling if the channel is closed first.
///
/// # Errors
/// If the listener thread cannot be spawned
pub fn cancellable_context(notifier: &SignalNotifier, parent: &Context) -> io::Result<Context> {
    let (ctx, cancel) = Context::with_cancel(parent);
    let notifier = notifier.clone();

    thread::Builder::new()
        .name("sigdrain-cancel".to_string())
        .spawn(move || {
            if let Some(sig) = notifier.recv() {
                cancel.cancel_with(CancelCause::Signal(sig));
            }
        })?;

    Ok(ctx)
}

fn run_hooks(hooks: Vec<ShutdownHook<'_>>, isolate: bool) -> (usize, usize) {
    let mut run = 0;
    let mut panicked = 0;

    for (index, hook) in hooks.into_iter().enumerate() {
        run += 1;
        if !isolate {
            hook();
            continue;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
            panicked += 1;
            let _ = log(&format!(
                "Shutdown hook #{} panicked: {}",
                index + 1,
                panic_message(payload.as_ref())
            ));
        }
    }

    (run, panicked)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Process-wide graceful shutdown facility
///
/// Workflow:
/// 1. The process entry point builds one coordinator (`init`)
/// 2. Workers register in-flight work on its `WaitGroup` and watch a
///    `Context` from `cancellable_context`
/// 3. The entry point parks in `wait_for_shutdown`; on SIGTERM/SIGINT the
///    hooks run in order, then the call blocks until the work drains
///
/// The OS handlers are installed on first use and stay installed for the
/// rest of the process. Dropping the coordinator only detaches its notifier
/// and closes it; from then on SIGTERM/SIGINT get their default action
/// (termination) until another coordinator is created.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    notifier: SignalNotifier,
    wait_group: WaitGroup,
    hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ShutdownCoordinator {
    /// Registers SIGTERM/SIGINT handling with default settings
    ///
    /// # Errors
    /// - `AlreadyExists` if another coordinator is alive in this process
    /// - If the OS refuses the signal handler registration
    pub fn init() -> io::Result<Self> {
        Self::with_config(ShutdownConfig::default())
    }

    /// Registers handling for the signals listed in `config`
    pub fn with_config(config: ShutdownConfig) -> io::Result<Self> {
        let kinds = config.shutdown_signals()?;

        if COORDINATOR_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a shutdown coordinator is already active in this process",
            ));
        }
        let slot = scopeguard::guard((), |_| COORDINATOR_ACTIVE.store(false, Ordering::SeqCst));

        let notifier = SignalNotifier::new();
        signal::attach(&kinds, notifier.clone())?;

        let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
        let _ = log(&format!(
            "PID {} listening for {} (drain deadline: {})",
            getpid(),
            names.join(", "),
            match config.drain_timeout_secs {
                Some(secs) => format!("{}s", secs),
                None => "none".to_string(),
            }
        ));

        scopeguard::ScopeGuard::into_inner(slot);
        Ok(Self {
            config,
            notifier,
            wait_group: WaitGroup::new(),
            hooks: Mutex::new(Vec::new()),
        })
    }

    /// Notification channel fed by the signal listener
    pub fn notifier(&self) -> &SignalNotifier {
        &self.notifier
    }

    /// Counter for in-flight work
    pub fn wait_group(&self) -> &WaitGroup {
        &self.wait_group
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Registers a hook to run when shutdown starts, ahead of call-site hooks
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.push(Box::new(hook));
    }

    /// Starts shutdown as if `sig` had been delivered by the OS
    ///
    /// Returns `false` if shutdown was already under way.
    pub fn trigger(&self, sig: ShutdownSignal) -> bool {
        self.notifier.notify(sig)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.notifier.try_recv().is_some()
    }

    /// See [`wait_for_shutdown`]; hooks from `on_shutdown` run first
    pub fn wait_for_shutdown(&self, hooks: Vec<ShutdownHook<'_>>) -> ShutdownReport {
        let registered = {
            let mut guard = match self.hooks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };

        let mut all: Vec<ShutdownHook<'_>> = Vec::with_capacity(registered.len() + hooks.len());
        for hook in registered {
            all.push(hook);
        }
        all.extend(hooks);

        wait_for_shutdown_with(&self.notifier, &self.wait_group, all, &self.config)
    }

    /// See [`cancellable_context`]
    pub fn cancellable_context(&self, parent: &Context) -> io::Result<Context> {
        cancellable_context(&self.notifier, parent)
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        // Detach first so a late signal takes the default action instead of
        // landing in a closed channel.
        signal::detach();
        self.notifier.close();
        COORDINATOR_ACTIVE.store(false, Ordering::SeqCst);
    }
}
