//! The loop's queues.
//!
//! Three kinds of storage back the scheduler:
//!
//! - [`IncomingQueue`] is the only cross-thread queue. A single mutex
//!   guards it and is held for O(1): one append on the producer side, one
//!   `VecDeque` swap on the consumer side.
//! - [`DelayedQueue`] is a thread-confined min-heap keyed by
//!   (`run_at` ascending, `sequence` ascending).
//! - The work queue and the deferred non-nestable queue are plain
//!   `VecDeque`s owned directly by the loop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{RunLoopError, RunLoopResult};
use crate::metrics::RunLoopMetrics;
use crate::pump::MessagePump;
use crate::task::{DelayedEntry, PendingTask};

struct IncomingState {
    queue: VecDeque<PendingTask>,
    /// Strong reference handed to posters so a wake call can outlive the
    /// loop object itself.
    pump: Option<Arc<dyn MessagePump>>,
    /// Cleared once destruction begins; later posts are rejected.
    accepting: bool,
}

/// The cross-thread incoming queue.
///
/// Shared between the loop and every [`LoopProxy`](crate::proxy::LoopProxy).
pub(crate) struct IncomingQueue {
    inner: Mutex<IncomingState>,
    metrics: Arc<RunLoopMetrics>,
}

impl IncomingQueue {
    pub fn new(metrics: Arc<RunLoopMetrics>) -> Self {
        Self {
            inner: Mutex::new(IncomingState {
                queue: VecDeque::new(),
                pump: None,
                accepting: true,
            }),
            metrics,
        }
    }

    pub fn set_pump(&self, pump: Arc<dyn MessagePump>) {
        self.inner.lock().pump = Some(pump);
    }

    /// Append a task and wake the pump.
    ///
    /// The wake call is made only when the queue was empty before this
    /// append; a non-empty queue means an earlier poster already triggered
    /// one, and a wake is not consumed until the loop fully drains. The
    /// strong pump reference is taken under the lock but the wake itself
    /// happens after the lock is released, so a task that destroys the
    /// loop from inside its own execution cannot deadlock the poster.
    pub fn post(&self, task: PendingTask) -> RunLoopResult<()> {
        let pump = {
            let mut inner = self.inner.lock();
            if !inner.accepting {
                drop(inner);
                warn!("task posted to a terminated run loop");
                return Err(RunLoopError::Terminated);
            }
            let was_empty = inner.queue.is_empty();
            inner.queue.push_back(task);
            if was_empty { inner.pump.clone() } else { None }
        };

        self.metrics.record_task_posted();
        if let Some(pump) = pump {
            pump.schedule_work();
        }
        Ok(())
    }

    /// Swap the accumulated batch into `target`. Returns whether anything
    /// was moved. `target` must be empty.
    pub fn swap_into(&self, target: &mut VecDeque<PendingTask>) -> bool {
        debug_assert!(target.is_empty());
        let mut inner = self.inner.lock();
        if inner.queue.is_empty() {
            return false;
        }
        std::mem::swap(&mut inner.queue, target);
        true
    }

    /// Stop accepting posts and release the pump reference. Returns any
    /// tasks that arrived since the last swap so the caller can drop them
    /// outside the lock.
    pub fn shutdown(&self) -> VecDeque<PendingTask> {
        let mut inner = self.inner.lock();
        inner.accepting = false;
        inner.pump = None;
        std::mem::take(&mut inner.queue)
    }
}

/// Thread-confined priority queue of delayed tasks.
///
/// `BinaryHeap` is a max-heap, so entries are stored under `Reverse`;
/// popping always yields the earliest `run_at`, ties broken by sequence.
#[derive(Default)]
pub(crate) struct DelayedQueue {
    heap: BinaryHeap<Reverse<DelayedEntry>>,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task that already carries its sequence number. Returns
    /// whether the task became the new earliest entry.
    pub fn push(&mut self, task: PendingTask) -> bool {
        let sequence = task.sequence;
        debug!(sequence, run_at = ?task.run_at, "task moved to delayed queue");
        self.heap.push(Reverse(DelayedEntry::new(task)));
        self.heap
            .peek()
            .is_some_and(|Reverse(top)| top.sequence == sequence)
    }

    /// Target run time of the earliest entry.
    pub fn peek_run_at(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.run_at)
    }

    pub fn pop(&mut self) -> Option<PendingTask> {
        self.heap.pop().map(|Reverse(entry)| entry.task)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
