use crate::logging::log;

use nix::sys::signal::{self, Signal};
use once_cell::sync::{Lazy, OnceCell};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Termination signal kinds that start a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Maps a raw signal number delivered by the OS
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            SIGINT => Some(ShutdownSignal::Interrupt),
            SIGTERM => Some(ShutdownSignal::Terminate),
            _ => None,
        }
    }

    /// Parses a signal name as written in config files ("SIGINT", "term", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "INT" => Some(ShutdownSignal::Interrupt),
            "TERM" => Some(ShutdownSignal::Terminate),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => SIGINT,
            ShutdownSignal::Terminate => SIGTERM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }

    fn as_nix(self) -> Signal {
        match self {
            ShutdownSignal::Interrupt => Signal::SIGINT,
            ShutdownSignal::Terminate => Signal::SIGTERM,
        }
    }

    /// Delivers this signal to the current process
    ///
    /// Without a registered handler the default action (termination) applies.
    pub fn raise(self) -> io::Result<()> {
        signal::raise(self.as_nix()).map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to raise {}: {}", self.name(), e),
            )
        })
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    received: Option<ShutdownSignal>,
    closed: bool,
    deliveries: usize,
}

#[derive(Debug, Default)]
struct NotifierInner {
    state: Mutex<NotifierState>,
    changed: Condvar,
}

/// Latched one-shot notification channel carrying the first shutdown signal
///
/// Cloning yields another handle to the same channel. Once a signal has been
/// recorded every receiver sees it, however many there are and whenever they
/// start waiting. Later signals never replace the recorded one.
#[derive(Debug, Clone, Default)]
pub struct SignalNotifier {
    inner: Arc<NotifierInner>,
}

impl SignalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NotifierState> {
        // The state is plain fields; a panic elsewhere cannot leave it half-written.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a shutdown signal and wakes every waiter
    ///
    /// Returns `true` if this call latched the channel, `false` if a signal
    /// was already recorded or the channel is closed.
    pub fn notify(&self, sig: ShutdownSignal) -> bool {
        let mut state = self.state();
        state.deliveries += 1;
        if state.closed || state.received.is_some() {
            return false;
        }
        state.received = Some(sig);
        drop(state);
        self.inner.changed.notify_all();
        true
    }

    /// Closes the channel; blocked receivers that have not seen a signal get `None`
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.changed.notify_all();
    }

    /// Returns the recorded signal without blocking
    pub fn try_recv(&self) -> Option<ShutdownSignal> {
        self.state().received
    }

    /// Blocks until a signal is recorded
    ///
    /// # Returns
    /// * `Some(signal)` - the first signal delivered
    /// * `None` - the channel was closed before any signal arrived
    pub fn recv(&self) -> Option<ShutdownSignal> {
        let mut state = self.state();
        loop {
            if let Some(sig) = state.received {
                return Some(sig);
            }
            if state.closed {
                return None;
            }
            state = match self.inner.changed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Like `recv`, but gives up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ShutdownSignal> {
        // A timeout past the end of `Instant` is no timeout at all.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.recv();
        };
        let mut state = self.state();
        loop {
            if let Some(sig) = state.received {
                return Some(sig);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = match self.inner.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Number of `notify` calls so far, latched or not
    pub fn deliveries(&self) -> usize {
        self.state().deliveries
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// Where a delivered signal ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Latched the attached notifier
    Delivered,
    /// The attached notifier already holds a signal
    AlreadyLatched,
    /// No coordinator handles this kind; the default action applies
    Unhandled,
}

struct Route {
    notifier: SignalNotifier,
    kinds: Vec<ShutdownSignal>,
}

/// Notifier currently receiving OS deliveries
static ROUTE: Lazy<Mutex<Option<Route>>> = Lazy::new(|| Mutex::new(None));

/// Handlers installed so far; they stay installed until the process exits
struct Registration {
    handle: Handle,
    installed: Mutex<Vec<ShutdownSignal>>,
}

static REGISTRATION: OnceCell<Registration> = OnceCell::new();

fn route() -> MutexGuard<'static, Option<Route>> {
    match ROUTE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn registration() -> io::Result<&'static Registration> {
    REGISTRATION.get_or_try_init(|| {
        let mut signals = Signals::new(std::iter::empty::<i32>())?;
        let handle = signals.handle();

        // The handler itself only records the signal number; everything else
        // happens on this thread.
        thread::Builder::new()
            .name("sigdrain-signals".to_string())
            .spawn(move || {
                for raw in signals.forever() {
                    deliver(raw);
                }
            })?;

        Ok(Registration {
            handle,
            installed: Mutex::new(Vec::new()),
        })
    })
}

fn deliver(raw: i32) {
    let Some(sig) = ShutdownSignal::from_raw(raw) else {
        return;
    };
    match dispatch(sig) {
        Dispatch::Delivered => {}
        Dispatch::AlreadyLatched => {
            let _ = log(&format!(
                "Received signal {} while shutdown is already in progress",
                sig
            ));
        }
        Dispatch::Unhandled => {
            if let Err(e) = signal_hook::low_level::emulate_default_handler(raw) {
                let _ = log(&format!("Failed to apply default action for {}: {}", sig, e));
            }
        }
    }
}

/// Routes a delivered signal to the attached notifier
pub(crate) fn dispatch(sig: ShutdownSignal) -> Dispatch {
    match route().as_ref() {
        Some(route) if route.kinds.contains(&sig) => {
            if route.notifier.notify(sig) {
                Dispatch::Delivered
            } else {
                Dispatch::AlreadyLatched
            }
        }
        _ => Dispatch::Unhandled,
    }
}

/// Installs handlers for `kinds` (once per process) and routes them to `notifier`
///
/// # Errors
/// If the OS refuses the handler registration
pub(crate) fn attach(kinds: &[ShutdownSignal], notifier: SignalNotifier) -> io::Result<()> {
    let registration = registration().map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to start signal listener: {}", e))
    })?;

    {
        let mut installed = match registration.installed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for kind in kinds {
            if installed.contains(kind) {
                continue;
            }
            registration.handle.add_signal(kind.as_raw()).map_err(|e| {
                io::Error::new(e.kind(), format!("Failed to register {} handler: {}", kind, e))
            })?;
            installed.push(*kind);
        }
    }

    *route() = Some(Route {
        notifier,
        kinds: kinds.to_vec(),
    });
    Ok(())
}

/// Stops routing; later deliveries get the default action
pub(crate) fn detach() {
    *route() = None;
}
