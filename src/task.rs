//! Pending task definitions.
//!
//! A [`PendingTask`] wraps a one-shot closure together with the scheduling
//! metadata the loop needs: when it was posted, when it may run at the
//! earliest, its per-loop sequence number, and whether it may execute
//! inside a nested run.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// The unit of work: invocable exactly once, no return value.
pub type TaskClosure = Box<dyn FnOnce() + Send>;

/// A task waiting in one of the loop's queues.
///
/// A `PendingTask` is owned by exactly one queue at a time; it moves
/// between queues, it is never copied.
pub struct PendingTask {
    /// The closure to run. Consumed by [`PendingTask::invoke`].
    work: TaskClosure,

    /// When the task was posted. Informational, handed to task observers.
    pub posted_at: Instant,

    /// Earliest allowed run time. `None` means run as soon as possible.
    pub run_at: Option<Instant>,

    /// Sequence number, assigned when the task enters the delayed queue.
    /// Strictly increasing per loop, breaks `run_at` ties.
    pub sequence: u64,

    /// Whether the task may execute while a nested run frame is active.
    pub nestable: bool,
}

impl PendingTask {
    /// Create a new pending task.
    pub fn new(work: TaskClosure, run_at: Option<Instant>, nestable: bool) -> Self {
        Self {
            work,
            posted_at: Instant::now(),
            run_at,
            sequence: 0,
            nestable,
        }
    }

    /// Consume the task and run its closure.
    pub(crate) fn invoke(self) {
        (self.work)();
    }
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTask")
            .field("posted_at", &self.posted_at)
            .field("run_at", &self.run_at)
            .field("sequence", &self.sequence)
            .field("nestable", &self.nestable)
            .finish_non_exhaustive()
    }
}

/// Compute the target run time for a posted delay.
///
/// A zero delay means immediate execution, represented as `None`.
pub(crate) fn delayed_run_time(delay: Duration) -> Option<Instant> {
    if delay > Duration::ZERO {
        Some(Instant::now() + delay)
    } else {
        None
    }
}

/// Delayed-queue entry.
///
/// Orders by `run_at` ascending, then `sequence` ascending, so that the
/// entry with the earliest target time (ties broken by arrival) compares
/// smallest. The delayed queue stores these under `std::cmp::Reverse` to
/// turn `BinaryHeap` into a min-heap.
pub(crate) struct DelayedEntry {
    pub run_at: Instant,
    pub sequence: u64,
    pub task: PendingTask,
}

impl DelayedEntry {
    pub fn new(task: PendingTask) -> Self {
        let run_at = task
            .run_at
            .expect("only tasks with a target run time enter the delayed queue");
        Self {
            run_at,
            sequence: task.sequence,
            task,
        }
    }
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.sequence == other.sequence
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run_at
            .cmp(&other.run_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TaskClosure {
        Box::new(|| {})
    }

    #[test]
    fn test_immediate_task_has_no_run_time() {
        let task = PendingTask::new(noop(), delayed_run_time(Duration::ZERO), true);
        assert!(task.run_at.is_none());
        assert!(task.nestable);
        assert_eq!(task.sequence, 0);
    }

    #[test]
    fn test_delayed_run_time_is_in_the_future() {
        let before = Instant::now();
        let run_at = delayed_run_time(Duration::from_millis(50)).unwrap();
        assert!(run_at >= before + Duration::from_millis(50));
    }

    #[test]
    fn test_entry_ordering_by_run_time() {
        let now = Instant::now();
        let mut early = PendingTask::new(noop(), Some(now), true);
        early.sequence = 1;
        let mut late = PendingTask::new(noop(), Some(now + Duration::from_secs(1)), true);
        late.sequence = 0;

        let early = DelayedEntry::new(early);
        let late = DelayedEntry::new(late);
        assert!(early < late);
    }

    #[test]
    fn test_entry_ordering_ties_by_sequence() {
        let now = Instant::now();
        let mut first = PendingTask::new(noop(), Some(now), true);
        first.sequence = 3;
        let mut second = PendingTask::new(noop(), Some(now), true);
        second.sequence = 4;

        let first = DelayedEntry::new(first);
        let second = DelayedEntry::new(second);
        assert!(first < second);
    }
}
