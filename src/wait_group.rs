use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    count: Mutex<usize>,
    zero: Condvar,
}

/// Counter of in-flight work units
///
/// Producers call `add` (or `enter`) before starting a unit and `done` when it
/// finishes; `wait` blocks until the count returns to zero. Clones share the
/// same counter.
///
/// # Panics
/// `done` without a matching `add` is a caller bug and panics instead of
/// letting the counter go negative.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_guard(&self) -> MutexGuard<'_, usize> {
        match self.inner.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers `n` new units of work
    pub fn add(&self, n: usize) {
        let mut count = self.count_guard();
        *count = count
            .checked_add(n)
            .unwrap_or_else(|| panic!("sigdrain: WaitGroup counter overflow"));
    }

    /// Marks one unit of work as finished
    pub fn done(&self) {
        let mut count = self.count_guard();
        if *count == 0 {
            // Release the lock first so the panic does not poison it.
            drop(count);
            panic!("sigdrain: negative WaitGroup counter");
        }
        *count -= 1;
        if *count == 0 {
            self.inner.zero.notify_all();
        }
    }

    /// Registers one unit of work and returns a guard that finishes it on drop
    ///
    /// The guard also fires while unwinding, so a panicking worker does not
    /// leave the counter stuck above zero.
    pub fn enter(&self) -> WorkGuard {
        self.add(1);
        WorkGuard {
            group: self.clone(),
        }
    }

    /// Number of units currently in flight
    pub fn count(&self) -> usize {
        *self.count_guard()
    }

    /// Blocks until the counter reaches zero
    pub fn wait(&self) {
        let mut count = self.count_guard();
        while *count > 0 {
            count = match self.inner.zero.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Blocks until the counter reaches zero or `timeout` elapses
    ///
    /// # Returns
    /// `true` if the counter reached zero, `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut count = self.count_guard();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.inner.zero.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// One unit of registered work; finishes it when dropped
#[derive(Debug)]
#[must_use = "dropping the guard immediately finishes the unit of work"]
pub struct WorkGuard {
    group: WaitGroup,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}
