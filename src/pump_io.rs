//! I/O completion message pump.
//!
//! [`IoPump`] multiplexes completion notifications from registered I/O
//! handles with the delegate work cycle. I/O threads deliver
//! [`CompletionPacket`]s to the pump's [`CompletionPort`]; the loop thread
//! consumes them between tasks, and can also wait for a specific handle's
//! completion with [`IoPump::wait_for_io`], buffering whatever else
//! arrives in the meantime.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{RunLoopError, RunLoopResult};
use crate::observer::ObserverHandle;
use crate::pump::{MessagePump, PumpDelegate, WorkPendingFlag};

/// Token identifying a registered I/O handle.
pub type IoToken = u64;

/// Token reserved for the pump's internal wake packet.
const WAKEUP_TOKEN: IoToken = 0;

/// One completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPacket {
    /// The handle this completion belongs to.
    pub token: IoToken,
    /// Bytes transferred by the operation.
    pub bytes_transferred: usize,
    /// OS error code; zero means success.
    pub error: u32,
}

/// Receives completions for one registered token.
pub trait IoHandler: Send + Sync {
    fn on_io_completed(&self, bytes_transferred: usize, error: u32);
}

/// Observes completion dispatch on the loop's thread.
pub trait IoObserver: Send + Sync {
    fn will_process_io_event(&self);
    fn did_process_io_event(&self);
}

/// In-process completion queue, the pump's wait/wake mechanism.
///
/// Any thread may post; the loop thread waits. FIFO per port, which also
/// makes delivery FIFO per token.
#[derive(Default)]
pub struct CompletionPort {
    queue: Mutex<VecDeque<CompletionPacket>>,
    cond: Condvar,
}

impl CompletionPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a completion packet.
    pub fn post(&self, packet: CompletionPacket) {
        let mut queue = self.queue.lock();
        queue.push_back(packet);
        self.cond.notify_one();
    }

    /// Dequeue the next packet, waiting up to `timeout` (`None` waits
    /// indefinitely, `Some(ZERO)` polls).
    pub fn wait(&self, timeout: Option<Duration>) -> Option<CompletionPacket> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.queue.lock();
        loop {
            if let Some(packet) = queue.pop_front() {
                return Some(packet);
            }
            match deadline {
                None => {
                    self.cond.wait(&mut queue);
                }
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || self.cond.wait_until(&mut queue, deadline).timed_out()
                    {
                        return queue.pop_front();
                    }
                }
            }
        }
    }
}

/// A completion bound to its handler, ready for dispatch.
struct IoItem {
    token: IoToken,
    handler: Arc<dyn IoHandler>,
    bytes_transferred: usize,
    error: u32,
}

/// Pump driven by an in-process completion port.
pub struct IoPump {
    keep_running: AtomicBool,
    /// At most one internal wake packet is in flight at a time.
    work_pending: WorkPendingFlag,
    port: Arc<CompletionPort>,
    handlers: DashMap<IoToken, Arc<dyn IoHandler>>,
    /// Completions received while waiting for a different token, kept in
    /// arrival order for later delivery.
    completed_io: Mutex<VecDeque<IoItem>>,
    delayed_work_time: Mutex<Option<Instant>>,
    io_observers: Mutex<Vec<ObserverHandle<dyn IoObserver>>>,
    run_depth: AtomicU32,
}

impl IoPump {
    pub fn new() -> Self {
        Self {
            keep_running: AtomicBool::new(true),
            work_pending: WorkPendingFlag::new(),
            port: Arc::new(CompletionPort::new()),
            handlers: DashMap::new(),
            completed_io: Mutex::new(VecDeque::new()),
            delayed_work_time: Mutex::new(None),
            io_observers: Mutex::new(Vec::new()),
            run_depth: AtomicU32::new(0),
        }
    }

    /// The port I/O threads should post completions to.
    pub fn port(&self) -> Arc<CompletionPort> {
        self.port.clone()
    }

    /// Register the handler that receives completions for `token`.
    pub fn register_io_handler(
        &self,
        token: IoToken,
        handler: Arc<dyn IoHandler>,
    ) -> RunLoopResult<()> {
        if token == WAKEUP_TOKEN || self.handlers.contains_key(&token) {
            return Err(RunLoopError::TokenInUse(token));
        }
        self.handlers.insert(token, handler);
        Ok(())
    }

    /// Add an I/O dispatch observer.
    pub fn add_io_observer(&self, id: impl Into<String>, observer: Arc<dyn IoObserver>) {
        self.io_observers
            .lock()
            .push(ObserverHandle::new(id, observer));
    }

    /// Remove an I/O dispatch observer by id.
    pub fn remove_io_observer(&self, id: &str) {
        self.io_observers.lock().retain(|h| h.id() != id);
    }

    /// Process one completion, waiting up to `timeout` for one to arrive.
    ///
    /// With a `filter`, only that token's completion is dispatched;
    /// completions for other tokens are buffered in arrival order and
    /// replayed by later calls, so per-token ordering is never disturbed.
    /// Returns whether anything was consumed (including the internal wake
    /// packet).
    pub fn wait_for_io(&self, timeout: Option<Duration>, filter: Option<IoToken>) -> bool {
        let item = match self.match_completed_item(filter) {
            Some(item) => item,
            None => {
                let Some(packet) = self.port.wait(timeout) else {
                    return false;
                };
                if packet.token == WAKEUP_TOKEN {
                    // Internal wake token, consumed here so the next
                    // schedule_work posts a fresh one.
                    debug_assert_eq!(packet.bytes_transferred, 0);
                    self.work_pending.clear();
                    return true;
                }
                let Some(handler) = self
                    .handlers
                    .get(&packet.token)
                    .map(|entry| Arc::clone(entry.value()))
                else {
                    warn!(token = packet.token, "completion for unregistered token dropped");
                    return true;
                };
                IoItem {
                    token: packet.token,
                    handler,
                    bytes_transferred: packet.bytes_transferred,
                    error: packet.error,
                }
            }
        };

        if let Some(wanted) = filter {
            if item.token != wanted {
                self.completed_io.lock().push_back(item);
                return true;
            }
        }

        self.will_process_io_event();
        item.handler.on_io_completed(item.bytes_transferred, item.error);
        self.did_process_io_event();
        true
    }

    /// Take the first buffered completion matching `filter` (any token
    /// when `filter` is `None`).
    fn match_completed_item(&self, filter: Option<IoToken>) -> Option<IoItem> {
        let mut buffered = self.completed_io.lock();
        let position = match filter {
            None => {
                if buffered.is_empty() {
                    return None;
                }
                0
            }
            Some(token) => buffered.iter().position(|item| item.token == token)?,
        };
        buffered.remove(position)
    }

    fn wait_for_work(&self) {
        assert_eq!(
            self.run_depth.load(Ordering::Acquire),
            1,
            "cannot wait for I/O from a nested run"
        );

        let timeout = self.current_delay();
        self.wait_for_io(timeout, None);
    }

    /// Time until the scheduled delayed work, `None` for an indefinite wait.
    fn current_delay(&self) -> Option<Duration> {
        self.delayed_work_time
            .lock()
            .map(|run_at| run_at.saturating_duration_since(Instant::now()))
    }

    fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    fn will_process_io_event(&self) {
        for handle in self.io_observers.lock().iter() {
            handle.observer().will_process_io_event();
        }
    }

    fn did_process_io_event(&self) {
        for handle in self.io_observers.lock().iter() {
            handle.observer().did_process_io_event();
        }
    }
}

impl Default for IoPump {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePump for IoPump {
    fn run(&self, delegate: &dyn PumpDelegate) {
        self.run_depth.fetch_add(1, Ordering::AcqRel);

        loop {
            let mut did_work = delegate.do_work();
            if !self.keep_running() {
                break;
            }

            // Zero-timeout poll so completions interleave with tasks.
            did_work |= self.wait_for_io(Some(Duration::ZERO), None);
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

            self.wait_for_work();
        }

        debug!("io pump exiting run");
        self.keep_running.store(true, Ordering::Release);
        self.run_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn quit(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    fn schedule_work(&self) {
        if self.work_pending.set() {
            return; // A wake packet is already in flight.
        }
        self.port.post(CompletionPacket {
            token: WAKEUP_TOKEN,
            bytes_transferred: 0,
            error: 0,
        });
    }

    fn schedule_delayed_work(&self, run_at: Instant) {
        *self.delayed_work_time.lock() = Some(run_at);
    }
}

#[cfg(test)]
#[path = "pump_io_tests.rs"]
mod tests;
