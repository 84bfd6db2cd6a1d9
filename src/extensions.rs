use std::time::Duration;

use crate::cancel::CancelSignal;

/// Performs the retry wait between attempts.
pub trait Sleeper: Send + Sync {
    /// Waits for `delay`. Returns `false` when `cancel` fired before the
    /// delay elapsed.
    fn sleep(&self, delay: Duration, cancel: Option<&CancelSignal>) -> bool;
}

#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, cancel: Option<&CancelSignal>) -> bool {
        match cancel {
            Some(cancel) => !cancel.wait_timeout(delay),
            None => {
                std::thread::sleep(delay);
                true
            }
        }
    }
}
