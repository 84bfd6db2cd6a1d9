use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::util::lock_unpoisoned;

/// Cloneable cancellation handle shared between a caller and an exchange.
///
/// Firing it wakes any retry sleep in progress and abandons an attempt that
/// is still waiting on the transport; the exchange then returns
/// [`Error::Cancelled`](crate::Error::Cancelled) without issuing another
/// attempt.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        *cancelled = true;
        drop(cancelled);
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.cancelled)
    }

    /// Blocks for up to `timeout`; returns `true` if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = match self.inner.condvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::CancelSignal;

    #[test]
    fn wait_times_out_when_never_cancelled() {
        let signal = CancelSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn cancel_from_another_thread_wakes_waiter_early() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(signal.is_cancelled());
        canceller.join().expect("canceller thread should finish");
    }
}
