//! Run loop metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Run loop metrics.
#[derive(Debug, Default)]
pub struct RunLoopMetrics {
    /// Tasks accepted into the incoming queue.
    pub tasks_posted: AtomicU64,

    /// Tasks executed (immediate, delayed and deferred alike).
    pub tasks_run: AtomicU64,

    /// Delayed tasks that came due and ran.
    pub delayed_tasks_run: AtomicU64,

    /// Non-nestable tasks replayed after a nested run unwound.
    pub deferred_tasks_replayed: AtomicU64,

    /// Incoming-to-work queue swaps.
    pub queue_reloads: AtomicU64,

    /// Tasks discarded unrun by the shutdown drain.
    pub tasks_discarded: AtomicU64,

    /// Total time spent inside task closures (microseconds).
    pub run_time_us: AtomicU64,

    /// Start time of the outermost run.
    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl RunLoopMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the outermost run frame.
    pub fn mark_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn record_task_posted(&self) {
        self.tasks_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_run(&self) {
        self.tasks_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delayed_task_run(&self) {
        self.delayed_tasks_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_task_replayed(&self) {
        self.deferred_tasks_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_reload(&self) {
        self.queue_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tasks_discarded(&self, count: u64) {
        self.tasks_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_run_time(&self, duration_us: u64) {
        self.run_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            tasks_posted: self.tasks_posted.load(Ordering::Relaxed),
            tasks_run: self.tasks_run.load(Ordering::Relaxed),
            delayed_tasks_run: self.delayed_tasks_run.load(Ordering::Relaxed),
            deferred_tasks_replayed: self.deferred_tasks_replayed.load(Ordering::Relaxed),
            queue_reloads: self.queue_reloads.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
            run_time_us: self.run_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub tasks_posted: u64,
    pub tasks_run: u64,
    pub delayed_tasks_run: u64,
    pub deferred_tasks_replayed: u64,
    pub queue_reloads: u64,
    pub tasks_discarded: u64,
    pub run_time_us: u64,
}

impl MetricsSnapshot {
    /// Average task execution time in milliseconds.
    pub fn avg_run_time_ms(&self) -> f64 {
        if self.tasks_run == 0 {
            return 0.0;
        }
        (self.run_time_us as f64 / self.tasks_run as f64) / 1000.0
    }

    /// Tasks executed per second of uptime.
    pub fn tasks_per_second(&self) -> f64 {
        if self.uptime_secs == 0 {
            return 0.0;
        }
        self.tasks_run as f64 / self.uptime_secs as f64
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
