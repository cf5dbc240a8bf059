//! Default message pump.
//!
//! The plainest waiting strategy: cycle the delegate callbacks and block
//! on a [`WaitableEvent`] when all of them report no work, with the wait
//! bounded by the next scheduled delayed-work time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::pump::{MessagePump, PumpDelegate};
use crate::waitable_event::WaitableEvent;

/// Pump that waits on a reusable signal/wait event.
pub struct DefaultPump {
    /// Cleared by `quit`, reset to true when the innermost `run` exits so
    /// outer (nested) frames keep running.
    keep_running: AtomicBool,

    event: WaitableEvent,

    /// Earliest target time of the delayed queue, as last reported by the
    /// delegate or by `schedule_delayed_work`.
    delayed_work_time: Mutex<Option<Instant>>,
}

impl DefaultPump {
    pub fn new() -> Self {
        Self {
            keep_running: AtomicBool::new(true),
            event: WaitableEvent::new(),
            delayed_work_time: Mutex::new(None),
        }
    }

    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }
}

impl Default for DefaultPump {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePump for DefaultPump {
    fn run(&self, delegate: &dyn PumpDelegate) {
        debug_assert!(self.keep_running(), "quit called outside of run");

        loop {
            let mut did_work = delegate.do_work();
            if !self.keep_running() {
                break;
            }

            let mut next_delayed = *self.delayed_work_time.lock();
            did_work |= delegate.do_delayed_work(&mut next_delayed);
            *self.delayed_work_time.lock() = next_delayed;
            if !self.keep_running() {
                break;
            }

            if did_work {
                continue;
            }

            did_work = delegate.do_idle_work();
            if !self.keep_running() {
                break;
            }

            if did_work {
                continue;
            }

            match *self.delayed_work_time.lock() {
                None => self.event.wait(),
                Some(run_at) => {
                    let now = Instant::now();
                    if run_at > now {
                        self.event.wait_timeout(run_at - now);
                    } else {
                        // A due time in the past means the delegate will
                        // pick the task up on the next pass.
                        *self.delayed_work_time.lock() = None;
                    }
                }
            }
        }

        debug!("default pump exiting run");
        self.keep_running.store(true, Ordering::Release);
    }

    fn quit(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    fn schedule_work(&self) {
        self.event.signal();
    }

    fn schedule_delayed_work(&self, run_at: Instant) {
        *self.delayed_work_time.lock() = Some(run_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Delegate that counts passes and quits the pump after a fixed number.
    struct QuitAfter<'a> {
        pump: &'a DefaultPump,
        remaining: Cell<u32>,
    }

    impl PumpDelegate for QuitAfter<'_> {
        fn do_work(&self) -> bool {
            let left = self.remaining.get();
            if left == 0 {
                return false;
            }
            self.remaining.set(left - 1);
            true
        }

        fn do_delayed_work(&self, next_delayed_work_time: &mut Option<Instant>) -> bool {
            *next_delayed_work_time = None;
            false
        }

        fn do_idle_work(&self) -> bool {
            self.pump.quit();
            false
        }
    }

    #[test]
    fn test_run_cycles_until_idle_quit() {
        let pump = DefaultPump::new();
        let delegate = QuitAfter {
            pump: &pump,
            remaining: Cell::new(3),
        };
        pump.run(&delegate);
        assert_eq!(delegate.remaining.get(), 0);
        // keep_running was reset; the pump can run again.
        let delegate = QuitAfter {
            pump: &pump,
            remaining: Cell::new(1),
        };
        pump.run(&delegate);
        assert_eq!(delegate.remaining.get(), 0);
    }
}
