//! Cross-thread posting handle.

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use crate::error::RunLoopResult;
use crate::task::{PendingTask, delayed_run_time};
use crate::task_queue::IncomingQueue;

/// A clonable, thread-safe handle for posting tasks to a [`RunLoop`] that
/// may already have been destroyed.
///
/// A proxy can outlive its loop: once the loop begins destruction every
/// post fails with [`RunLoopError::Terminated`], so posters never need to
/// track the loop's lifetime themselves.
///
/// [`RunLoop`]: crate::run_loop::RunLoop
/// [`RunLoopError::Terminated`]: crate::error::RunLoopError::Terminated
#[derive(Clone)]
pub struct LoopProxy {
    incoming: Arc<IncomingQueue>,
    owner: ThreadId,
}

impl LoopProxy {
    pub(crate) fn new(incoming: Arc<IncomingQueue>, owner: ThreadId) -> Self {
        Self { incoming, owner }
    }

    /// Post a task for immediate execution.
    pub fn post<F>(&self, work: F) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.incoming
            .post(PendingTask::new(Box::new(work), None, true))
    }

    /// Post a task to run no earlier than `delay` from now.
    pub fn post_delayed<F>(&self, work: F, delay: Duration) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.incoming
            .post(PendingTask::new(Box::new(work), delayed_run_time(delay), true))
    }

    /// Post a task that must not run inside a nested run frame.
    pub fn post_non_nestable<F>(&self, work: F) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.incoming
            .post(PendingTask::new(Box::new(work), None, false))
    }

    /// Post a delayed task that must not run inside a nested run frame.
    pub fn post_non_nestable_delayed<F>(&self, work: F, delay: Duration) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.incoming.post(PendingTask::new(
            Box::new(work),
            delayed_run_time(delay),
            false,
        ))
    }

    /// Whether the calling thread is the loop's thread.
    pub fn belongs_to_current_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }
}
