//! Auto-reset signal/wait event.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A single-slot, auto-reset event.
///
/// `signal` releases exactly one waiter; a signal delivered while nobody
/// waits is remembered until the next wait consumes it. This matches the
/// default pump's single-waiter assumption: the loop thread is the only
/// waiter, any thread may signal.
#[derive(Default)]
pub struct WaitableEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl WaitableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event, waking the waiter if there is one.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Block until signaled, then consume the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Block until signaled or until `timeout` elapses. Returns whether
    /// the event was signaled (and consumed).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                // A signal may still have slipped in before the timeout.
                break;
            }
        }
        let was_signaled = *signaled;
        *signaled = false;
        was_signaled
    }
}
