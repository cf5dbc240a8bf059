//! Loop observer definitions.
//!
//! Task observers are notified synchronously around each task execution;
//! destruction observers are notified once, just before the loop
//! deregisters itself from its thread.

use std::sync::Arc;
use std::time::Instant;

/// Observes task execution on the loop's thread.
pub trait TaskObserver {
    /// Called immediately before a task runs. `posted_at` is the time the
    /// task was posted.
    fn will_process_task(&self, posted_at: Instant);

    /// Called immediately after the task returned.
    fn did_process_task(&self, posted_at: Instant);
}

/// Observes loop teardown.
pub trait DestructionObserver {
    /// Called on the loop's thread before the loop is deregistered.
    /// Posting from this callback is rejected.
    fn will_destroy_loop(&self);
}

/// Observer registration handle, keyed by a caller-chosen id.
pub struct ObserverHandle<T: ?Sized> {
    id: String,
    observer: Arc<T>,
}

impl<T: ?Sized> ObserverHandle<T> {
    /// Create a new observer handle.
    pub fn new(id: impl Into<String>, observer: Arc<T>) -> Self {
        Self {
            id: id.into(),
            observer,
        }
    }

    /// Get the observer ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the observer.
    pub fn observer(&self) -> &Arc<T> {
        &self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingObserver {
        seen: Cell<u32>,
    }

    impl TaskObserver for CountingObserver {
        fn will_process_task(&self, _posted_at: Instant) {
            self.seen.set(self.seen.get() + 1);
        }

        fn did_process_task(&self, _posted_at: Instant) {}
    }

    #[test]
    fn test_handle_keeps_id_and_observer() {
        let observer = Arc::new(CountingObserver { seen: Cell::new(0) });
        let handle: ObserverHandle<dyn TaskObserver> =
            ObserverHandle::new("counter", observer.clone());
        assert_eq!(handle.id(), "counter");
        handle.observer().will_process_task(Instant::now());
        assert_eq!(observer.seen.get(), 1);
    }
}
