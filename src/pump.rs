//! The message pump contract.
//!
//! A pump owns the wait/wake mechanism for one run loop and drives the
//! loop through the three [`PumpDelegate`] callbacks. Concrete strategies
//! ([`DefaultPump`](crate::pump_default::DefaultPump),
//! [`IoPump`](crate::pump_io::IoPump)) are independent implementations of
//! the same trait; they share no base state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// The callbacks a pump invokes to let the loop do its work.
///
/// The pump calls these in order, looping: on any `true` it restarts from
/// `do_work`; only when all three return `false` does it block.
pub trait PumpDelegate {
    /// Run one immediate task, or reclassify delayed ones. Returns whether
    /// anything happened.
    fn do_work(&self) -> bool;

    /// Run one due delayed task. `next_delayed_work_time` receives the
    /// target time of the next scheduled task, if any, so the pump can
    /// bound its wait. Returns whether a task actually ran.
    fn do_delayed_work(&self, next_delayed_work_time: &mut Option<Instant>) -> bool;

    /// Run deferred work that only makes sense when the loop is otherwise
    /// idle, or ask the pump to quit if a quit was requested.
    fn do_idle_work(&self) -> bool;
}

/// Strategy object that waits for and dispatches work.
pub trait MessagePump: Send + Sync {
    /// Drive the delegate until [`MessagePump::quit`] is called. Re-entrant:
    /// a task may call back into the loop's `run`, which lands here again
    /// on the same pump.
    fn run(&self, delegate: &dyn PumpDelegate);

    /// Abort the innermost `run` as soon as the current delegate pass
    /// completes. Only meaningful from the loop's own thread.
    fn quit(&self);

    /// Wake the pump because immediate work arrived. Callable from any
    /// thread.
    fn schedule_work(&self);

    /// Tell the pump the earliest target time of the delayed queue so it
    /// can arrange a timed wake. Called from the loop's thread only.
    fn schedule_delayed_work(&self, run_at: Instant);
}

/// Wake-coalescing flag.
///
/// Guarantees at most one in-flight wake token: `set` reports whether a
/// token is already pending, `clear` is called exactly once when the token
/// is consumed.
#[derive(Debug, Default)]
pub struct WorkPendingFlag {
    pending: AtomicBool,
}

impl WorkPendingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark work pending. Returns `true` if a wake token was already in
    /// flight, in which case the caller must not issue another.
    pub fn set(&self) -> bool {
        self.pending.swap(true, Ordering::AcqRel)
    }

    /// Consume the wake token.
    pub fn clear(&self) {
        let was_pending = self.pending.swap(false, Ordering::AcqRel);
        debug_assert!(was_pending, "cleared a wake token that was never set");
    }
}

/// Convenience alias for the shared pump handle.
pub type PumpHandle = Arc<dyn MessagePump>;
