//! Run loop core implementation.
//!
//! A [`RunLoop`] is bound to the thread that creates it and stays there
//! for its whole life. Work arrives through the cross-thread incoming
//! queue, gets batched into the thread-local work queue, and is executed
//! by the pump through the [`PumpDelegate`] callbacks. `run` is
//! re-entrant: a task may call it again, pushing a nested run frame, and
//! non-nestable tasks encountered while nested are deferred until the
//! stack unwinds back to depth 1.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::config::RunLoopConfig;
use crate::error::{RunLoopError, RunLoopResult};
use crate::metrics::RunLoopMetrics;
use crate::observer::{DestructionObserver, ObserverHandle, TaskObserver};
use crate::proxy::LoopProxy;
use crate::pump::{MessagePump, PumpDelegate};
use crate::pump_default::DefaultPump;
use crate::task::{PendingTask, delayed_run_time};
use crate::task_queue::{DelayedQueue, IncomingQueue};

thread_local! {
    /// The thread's current loop, if any. Set on construction, cleared on
    /// destruction; exposed only through [`RunLoop::current`].
    static CURRENT: RefCell<Option<Weak<LoopCore>>> = const { RefCell::new(None) };
}

/// One active `run` invocation.
struct RunState {
    run_depth: u32,
    quit_requested: Cell<bool>,
}

/// Pops the run-state frame even when the pump unwinds abnormally.
struct FrameGuard<'a> {
    core: &'a LoopCore,
}

impl<'a> FrameGuard<'a> {
    fn push(core: &'a LoopCore, quit_requested: bool) -> Self {
        let run_depth = core.run_depth() + 1;
        core.run_states.borrow_mut().push(RunState {
            run_depth,
            quit_requested: Cell::new(quit_requested),
        });
        Self { core }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.core.run_states.borrow_mut().pop();
    }
}

struct LoopCore {
    /// The thread this loop belongs to. Checked on every owner-thread call.
    owner: ThreadId,

    pump: Arc<dyn MessagePump>,

    /// The only cross-thread queue, shared with every proxy.
    incoming: Arc<IncomingQueue>,

    /// Thread-local FIFO, refilled by swapping with `incoming`.
    work_queue: RefCell<std::collections::VecDeque<PendingTask>>,

    /// Min-heap of delayed tasks.
    delayed_queue: RefCell<DelayedQueue>,

    /// Non-nestable tasks postponed during a nested run.
    deferred_non_nestable: RefCell<std::collections::VecDeque<PendingTask>>,

    /// Stack of active run frames; the top defines the nesting context.
    run_states: RefCell<Vec<RunState>>,

    /// Cleared while a task body executes, so re-entrant work is off by
    /// default until a nested frame opts back in.
    nestable_tasks_allowed: Cell<bool>,

    /// Next sequence number handed to a task entering the delayed queue.
    next_sequence: Cell<u64>,

    /// Last sampled time, throttles due-checks in `do_delayed_work`.
    recent_time: Cell<Option<Instant>>,

    task_observers: RefCell<Vec<ObserverHandle<dyn TaskObserver>>>,
    destruction_observers: RefCell<Vec<ObserverHandle<dyn DestructionObserver>>>,

    metrics: Arc<RunLoopMetrics>,
    config: RunLoopConfig,
}

/// The thread-affine task scheduler.
///
/// Cheap to clone on its own thread (tasks typically reach it through
/// [`RunLoop::current`]); cross-thread posting goes through a
/// [`LoopProxy`] obtained from [`RunLoop::proxy`].
#[derive(Clone)]
pub struct RunLoop {
    core: Rc<LoopCore>,
}

impl RunLoop {
    /// Create a loop driven by the [`DefaultPump`].
    ///
    /// Panics if the thread already has a run loop.
    pub fn new(config: RunLoopConfig) -> Self {
        Self::with_pump(config, Arc::new(DefaultPump::new()))
    }

    /// Create a loop driven by the given pump.
    pub fn with_pump(config: RunLoopConfig, pump: Arc<dyn MessagePump>) -> Self {
        let metrics = Arc::new(RunLoopMetrics::new());
        let incoming = Arc::new(IncomingQueue::new(metrics.clone()));
        incoming.set_pump(pump.clone());

        let core = Rc::new(LoopCore {
            owner: thread::current().id(),
            pump,
            incoming,
            work_queue: RefCell::new(std::collections::VecDeque::new()),
            delayed_queue: RefCell::new(DelayedQueue::new()),
            deferred_non_nestable: RefCell::new(std::collections::VecDeque::new()),
            run_states: RefCell::new(Vec::new()),
            nestable_tasks_allowed: Cell::new(true),
            next_sequence: Cell::new(0),
            recent_time: Cell::new(None),
            task_observers: RefCell::new(Vec::new()),
            destruction_observers: RefCell::new(Vec::new()),
            metrics,
            config,
        });

        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            assert!(
                slot.as_ref().and_then(Weak::upgrade).is_none(),
                "only one run loop per thread"
            );
            *slot = Some(Rc::downgrade(&core));
        });

        debug!("run loop created");
        Self { core }
    }

    /// The calling thread's current loop, if one exists.
    pub fn current() -> Option<RunLoop> {
        CURRENT
            .with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
            .map(|core| RunLoop { core })
    }

    /// Get a posting handle usable from any thread.
    pub fn proxy(&self) -> LoopProxy {
        LoopProxy::new(self.core.incoming.clone(), self.core.owner)
    }

    /// Get the loop's metrics.
    pub fn metrics(&self) -> &Arc<RunLoopMetrics> {
        &self.core.metrics
    }

    // ========================================================================
    // Task posting
    // ========================================================================

    /// Post a task for immediate execution.
    pub fn post<F>(&self, work: F) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.core
            .incoming
            .post(PendingTask::new(Box::new(work), None, true))
    }

    /// Post a task to run no earlier than `delay` from now.
    pub fn post_delayed<F>(&self, work: F, delay: Duration) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.incoming.post(PendingTask::new(
            Box::new(work),
            delayed_run_time(delay),
            true,
        ))
    }

    /// Post a task that must not run inside a nested run frame.
    pub fn post_non_nestable<F>(&self, work: F) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.core
            .incoming
            .post(PendingTask::new(Box::new(work), None, false))
    }

    /// Post a delayed task that must not run inside a nested run frame.
    pub fn post_non_nestable_delayed<F>(&self, work: F, delay: Duration) -> RunLoopResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.incoming.post(PendingTask::new(
            Box::new(work),
            delayed_run_time(delay),
            false,
        ))
    }

    // ========================================================================
    // Run control
    // ========================================================================

    /// Run until quit. Re-entrant: calling this from inside a task pushes
    /// a nested run frame.
    pub fn run(&self) {
        self.check_calling_thread();
        let _frame = FrameGuard::push(&self.core, false);
        if self.core.run_depth() == 1 {
            self.core.metrics.mark_start();
        }
        debug!(depth = self.core.run_depth(), "entering run");
        let pump = self.core.pump.clone();
        pump.run(&*self.core);
        debug!("leaving run");
    }

    /// Run until no immediate work remains, then return.
    pub fn run_until_idle(&self) {
        self.check_calling_thread();
        let _frame = FrameGuard::push(&self.core, true);
        if self.core.run_depth() == 1 {
            self.core.metrics.mark_start();
        }
        debug!(depth = self.core.run_depth(), "entering run_until_idle");
        let pump = self.core.pump.clone();
        pump.run(&*self.core);
    }

    /// Request a cooperative quit of the innermost run frame. The pump
    /// finishes its current delegate pass before honoring it.
    pub fn quit(&self) -> RunLoopResult<()> {
        self.check_calling_thread();
        let states = self.core.run_states.borrow();
        match states.last() {
            Some(frame) => {
                frame.quit_requested.set(true);
                Ok(())
            }
            None => {
                error!("quit called with no active run frame");
                Err(RunLoopError::NotRunning)
            }
        }
    }

    /// Ask the pump to abort its wait/dispatch immediately, bypassing the
    /// cooperative flag.
    pub fn quit_now(&self) -> RunLoopResult<()> {
        self.check_calling_thread();
        if self.core.run_states.borrow().is_empty() {
            error!("quit_now called with no active run frame");
            return Err(RunLoopError::NotRunning);
        }
        self.core.pump.quit();
        Ok(())
    }

    /// Whether more than one run frame is active.
    pub fn is_nested(&self) -> bool {
        self.check_calling_thread();
        self.core.run_depth() > 1
    }

    /// Allow or forbid task execution from a re-entrant context. Execution
    /// is forbidden while a task body is on the stack unless a nested
    /// frame opts back in with this.
    pub fn set_nestable_tasks_allowed(&self, allowed: bool) {
        self.check_calling_thread();
        if self.core.nestable_tasks_allowed.get() != allowed {
            self.core.nestable_tasks_allowed.set(allowed);
            if allowed {
                // Work may have piled up while execution was forbidden.
                self.core.pump.schedule_work();
            }
        }
    }

    /// Whether task execution from a re-entrant context is allowed.
    pub fn nestable_tasks_allowed(&self) -> bool {
        self.check_calling_thread();
        self.core.nestable_tasks_allowed.get()
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Add a task observer.
    pub fn add_task_observer(&self, id: impl Into<String>, observer: Arc<dyn TaskObserver>) {
        self.check_calling_thread();
        self.core
            .task_observers
            .borrow_mut()
            .push(ObserverHandle::new(id, observer));
    }

    /// Remove a task observer by id.
    pub fn remove_task_observer(&self, id: &str) {
        self.check_calling_thread();
        self.core
            .task_observers
            .borrow_mut()
            .retain(|h| h.id() != id);
    }

    /// Add a destruction observer.
    pub fn add_destruction_observer(
        &self,
        id: impl Into<String>,
        observer: Arc<dyn DestructionObserver>,
    ) {
        self.check_calling_thread();
        self.core
            .destruction_observers
            .borrow_mut()
            .push(ObserverHandle::new(id, observer));
    }

    /// Remove a destruction observer by id.
    pub fn remove_destruction_observer(&self, id: &str) {
        self.check_calling_thread();
        self.core
            .destruction_observers
            .borrow_mut()
            .retain(|h| h.id() != id);
    }

    fn check_calling_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.core.owner,
            "run loop used from a thread other than its owner"
        );
    }
}

impl LoopCore {
    fn run_depth(&self) -> u32 {
        self.run_states
            .borrow()
            .last()
            .map(|frame| frame.run_depth)
            .unwrap_or(0)
    }

    /// Refill the work queue from the incoming queue. One O(1) swap under
    /// the lock moves the whole batch.
    fn reload_work_queue(&self) {
        let mut work = self.work_queue.borrow_mut();
        if !work.is_empty() {
            return;
        }
        if self.incoming.swap_into(&mut work) {
            self.metrics.record_queue_reload();
        }
    }

    /// Assign the next sequence number and move the task into the delayed
    /// queue. Returns whether it became the new earliest entry.
    fn add_to_delayed_queue(&self, mut task: PendingTask) -> bool {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        task.sequence = sequence;
        self.delayed_queue.borrow_mut().push(task)
    }

    /// Run the task inline, or defer it when non-nestable work meets a
    /// nested frame. Returns whether the task ran.
    fn defer_or_run_task(&self, task: PendingTask) -> bool {
        if task.nestable || self.run_depth() == 1 {
            self.run_task(task);
            return true;
        }
        debug!("deferring non-nestable task during nested run");
        self.deferred_non_nestable.borrow_mut().push_back(task);
        false
    }

    fn run_task(&self, task: PendingTask) {
        debug_assert!(self.nestable_tasks_allowed.get());
        self.nestable_tasks_allowed.set(false);

        let posted_at = task.posted_at;
        for observer in self.snapshot_task_observers() {
            observer.will_process_task(posted_at);
        }

        let started = Instant::now();
        task.invoke();
        if self.config.metrics_enabled {
            self.metrics
                .record_run_time(started.elapsed().as_micros() as u64);
        }
        self.metrics.record_task_run();

        for observer in self.snapshot_task_observers() {
            observer.did_process_task(posted_at);
        }

        self.nestable_tasks_allowed.set(true);
    }

    /// Observers may add or remove observers from their callbacks, so the
    /// borrow must not be held across the calls.
    fn snapshot_task_observers(&self) -> Vec<Arc<dyn TaskObserver>> {
        self.task_observers
            .borrow()
            .iter()
            .map(|handle| handle.observer().clone())
            .collect()
    }

    /// Replay one deferred non-nestable task, FIFO, only at depth 1.
    fn process_next_deferred_task(&self) -> bool {
        if self.run_depth() != 1 || !self.nestable_tasks_allowed.get() {
            return false;
        }
        let Some(task) = self.deferred_non_nestable.borrow_mut().pop_front() else {
            return false;
        };
        self.metrics.record_deferred_task_replayed();
        self.run_task(task);
        true
    }

    /// Discard queued work during shutdown. Tasks with a target run time
    /// move to the delayed queue instead of being dropped, so their drop
    /// glue runs in the final discard with delayed semantics intact.
    fn delete_pending_tasks(&mut self) -> bool {
        let mut work = std::mem::take(self.work_queue.get_mut());
        let mut did_work = !work.is_empty();
        let mut discarded = 0u64;
        for task in work.drain(..) {
            if task.run_at.is_some() {
                self.add_to_delayed_queue(task);
            } else {
                discarded += 1;
                drop(task);
            }
        }

        let deferred = std::mem::take(self.deferred_non_nestable.get_mut());
        did_work |= !deferred.is_empty();
        discarded += deferred.len() as u64;
        drop(deferred);

        self.metrics.record_tasks_discarded(discarded);
        did_work
    }
}

impl PumpDelegate for LoopCore {
    fn do_work(&self) -> bool {
        if !self.nestable_tasks_allowed.get() {
            return false;
        }

        loop {
            self.reload_work_queue();
            if self.work_queue.borrow().is_empty() {
                break;
            }

            loop {
                // The borrow is scoped to the pop: running the task may
                // re-enter this loop.
                let Some(task) = self.work_queue.borrow_mut().pop_front() else {
                    break;
                };
                if let Some(run_at) = task.run_at {
                    if self.add_to_delayed_queue(task) {
                        self.pump.schedule_delayed_work(run_at);
                    }
                } else if self.defer_or_run_task(task) {
                    return true;
                }
            }
        }

        false
    }

    fn do_delayed_work(&self, next_delayed_work_time: &mut Option<Instant>) -> bool {
        if !self.nestable_tasks_allowed.get() || self.delayed_queue.borrow().is_empty() {
            self.recent_time.set(None);
            *next_delayed_work_time = None;
            return false;
        }

        // Resample the clock only when the earliest entry is beyond the
        // cached time; this keeps idle passes from hitting the clock for
        // far-off deadlines.
        let next_run_time = self
            .delayed_queue
            .borrow()
            .peek_run_at()
            .expect("delayed queue is non-empty");
        if self
            .recent_time
            .get()
            .is_none_or(|recent| next_run_time > recent)
        {
            let now = Instant::now();
            self.recent_time.set(Some(now));
            if next_run_time > now {
                *next_delayed_work_time = Some(next_run_time);
                return false;
            }
        }

        let task = self
            .delayed_queue
            .borrow_mut()
            .pop()
            .expect("delayed queue is non-empty");
        if let Some(next) = self.delayed_queue.borrow().peek_run_at() {
            *next_delayed_work_time = Some(next);
        }

        let ran = self.defer_or_run_task(task);
        if ran {
            self.metrics.record_delayed_task_run();
        }
        ran
    }

    fn do_idle_work(&self) -> bool {
        if self.process_next_deferred_task() {
            return true;
        }

        let quit_requested = self
            .run_states
            .borrow()
            .last()
            .is_some_and(|frame| frame.quit_requested.get());
        if quit_requested {
            self.pump.quit();
        }

        false
    }
}

impl Drop for LoopCore {
    fn drop(&mut self) {
        if thread::current().id() != self.owner {
            error!("run loop destroyed on a thread other than its owner");
            debug_assert!(false, "run loop destroyed on the wrong thread");
        }
        debug_assert!(
            self.run_states.get_mut().is_empty(),
            "run loop destroyed with active run frames"
        );

        // Discarded tasks may post further tasks from their drop glue, so
        // keep draining until an iteration does no work, up to the bound.
        let max_iterations = self.config.drain.max_iterations;
        let mut did_work = false;
        for _ in 0..max_iterations {
            self.delete_pending_tasks();
            self.reload_work_queue();
            did_work = self.delete_pending_tasks();
            if !did_work {
                break;
            }
        }
        if did_work {
            error!(max_iterations, "shutdown drain did not settle");
            debug_assert!(!did_work, "shutdown drain did not settle");
        }

        let discarded = self.delayed_queue.get_mut().len() as u64;
        while let Some(task) = self.delayed_queue.get_mut().pop() {
            drop(task);
        }
        self.metrics.record_tasks_discarded(discarded);

        for handle in self.destruction_observers.get_mut().drain(..) {
            handle.observer().will_destroy_loop();
        }

        // Reject posts from here on; tasks that slipped in since the last
        // reload are dropped unrun.
        let leftovers = self.incoming.shutdown();
        if !leftovers.is_empty() {
            debug!(count = leftovers.len(), "dropping tasks posted during teardown");
        }
        drop(leftovers);

        CURRENT.with(|slot| *slot.borrow_mut() = None);
        debug!("run loop destroyed");
    }
}

#[cfg(test)]
#[path = "run_loop_tests.rs"]
mod tests;
