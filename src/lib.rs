//! # taskloop
//!
//! A thread-affine task run loop with pluggable waiting strategies.
//!
//! ## Design
//!
//! The architecture follows the classic message-loop design used by
//! desktop frameworks: one loop per thread, tasks posted from anywhere,
//! executed strictly on the owning thread, with the waiting strategy
//! factored out behind a pump trait:
//!
//! - **Three-queue scheduling**: a mutex-guarded incoming queue is the
//!   only cross-thread structure; the loop periodically swaps the whole
//!   batch into a thread-local work queue in O(1), and delayed tasks sit
//!   in a min-heap keyed by (target time, sequence).
//! - **Nesting protocol**: `run` is re-entrant. Task execution from a
//!   re-entrant context is off by default, and tasks posted as
//!   non-nestable are deferred until the run stack unwinds to depth 1.
//! - **Pluggable pumps**: [`DefaultPump`] blocks on an event;
//!   [`IoPump`] blocks on an in-process completion port so I/O
//!   completions and tasks interleave on one thread.
//! - **Bounded shutdown drain**: dropping the loop discards pending work
//!   without running it, looping while drop glue posts replacement tasks,
//!   up to a configured iteration cap.
//!
//! ## Key Components
//!
//! - [`RunLoop`]: the per-thread loop
//! - [`LoopProxy`]: clonable cross-thread posting handle that outlives the loop
//! - [`MessagePump`] / [`PumpDelegate`]: the pump contract
//! - [`DefaultPump`], [`IoPump`]: the two bundled pumps
//! - [`TaskObserver`], [`DestructionObserver`]: execution and teardown hooks
//! - [`RunLoopMetrics`]: scheduling counters
//!
//! ## Example
//!
//! ```rust
//! use taskloop::{RunLoop, RunLoopConfig};
//!
//! let run_loop = RunLoop::new(RunLoopConfig::default());
//!
//! let proxy = run_loop.proxy();
//! std::thread::spawn(move || {
//!     proxy.post(|| println!("ran on the loop thread")).unwrap();
//! })
//! .join()
//! .unwrap();
//!
//! run_loop.run_until_idle();
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod proxy;
pub mod pump;
pub mod pump_default;
pub mod pump_io;
pub mod run_loop;
pub mod task;
mod task_queue;
pub mod waitable_event;

// Re-exports
pub use config::{DrainConfig, RunLoopConfig};
pub use error::{RunLoopError, RunLoopResult};
pub use metrics::{MetricsSnapshot, RunLoopMetrics};
pub use observer::{DestructionObserver, ObserverHandle, TaskObserver};
pub use proxy::LoopProxy;
pub use pump::{MessagePump, PumpDelegate, PumpHandle};
pub use pump_default::DefaultPump;
pub use pump_io::{CompletionPacket, CompletionPort, IoHandler, IoObserver, IoPump, IoToken};
pub use run_loop::RunLoop;
pub use task::{PendingTask, TaskClosure};
pub use waitable_event::WaitableEvent;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
