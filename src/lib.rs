//! corun: cooperative task runtime
//!
//! Multiplexes many lightweight, step-driven tasks onto a fixed pool of OS
//! worker threads through one multi-producer multi-consumer queue.
//!
//! # Example
//!
//! ```no_run
//! use corun::{CoroStatus, Runtime};
//!
//! fn main() -> Result<(), corun::RuntimeError> {
//!     let rt = Runtime::new(4)?;
//!     let mut ticks = 3;
//!     rt.spawn(move |cx| {
//!         ticks -= 1;
//!         if ticks > 0 {
//!             // a task may spawn further tasks
//!             cx.spawn(|_cx| CoroStatus::Done);
//!             CoroStatus::Running
//!         } else {
//!             CoroStatus::Done
//!         }
//!     });
//!     rt.run()?;
//!     let stats = rt.destroy();
//!     assert_eq!(stats.tasks_completed, 3);
//!     Ok(())
//! }
//! ```
//!
//! # Limits
//!
//! Scheduling is cooperative only. A step that blocks (on I/O, a lock, a
//! sleep) holds its worker thread until it returns; there is no preemption
//! and no I/O multiplexing. There is also no way to cancel or await a single
//! task from outside: outcomes and cancellation live in the task's own state
//! (see [`CancelToken`]).

#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;
pub mod workload;

pub use runtime::scheduler::{
    CancelToken, CoroStatus, Coroutine, QueueFull, QueueKind, Runtime, RuntimeConfig,
    RuntimeError, ShutdownPolicy, StatsSnapshot, TaskId, TaskQueue, WorkerContext,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "corun";
