//! Delayq: a delay-ordered task scheduler over a fixed worker pool.
//!
//! # Overview
//!
//! Delayq executes submitted units of work immediately, after a relative
//! delay, or at an absolute instant, with one hard guarantee: tasks that
//! share a target time run in submission order. Ordering is decided by a
//! `(deadline, sequence)` key where the sequence comes from a single
//! atomic counter, never from wall-clock timestamps, which concurrent
//! submitters can share.
//!
//! # Core guarantees
//!
//! - **Deadline order**: of any two queued tasks, the one with the earlier
//!   deadline is claimed first; equal deadlines break ties FIFO by
//!   submission sequence, even under concurrent submission
//! - **Non-blocking submission**: `submit_after`/`submit_at` never block;
//!   only handle joins and the internal worker wait loop do
//! - **Clamped past deadlines**: a zero delay or an absolute time already
//!   in the past makes the task immediately eligible, not an error
//! - **Contained failures**: a panicking task marks its handle failed and
//!   re-raises on join; worker threads survive
//! - **Race-free cancellation**: claim and cancel are competing atomic
//!   transitions out of `Pending`; exactly one wins, and a task cancelled
//!   before the claim never executes
//! - **Injectable time**: all eligibility checks go through a `TimeSource`,
//!   so tests can drive a virtual clock
//!
//! # Module structure
//!
//! - [`time`]: instants, wall and virtual time sources
//! - [`task`]: task records and the per-task state machine
//! - [`queue`]: the delay-ordered ready queue and its waiting protocol
//! - [`pool`]: the fixed worker pool
//! - [`scheduler`]: the public facade and its configuration
//! - [`handle`]: caller-facing task handles
//! - [`error`]: submission and join errors
//!
//! # Example
//!
//! ```
//! use delayq::{Scheduler, TimeSource};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(4);
//!
//! // Relative submission.
//! let soon = scheduler
//!     .submit_after(|| "soon", Duration::from_millis(5))
//!     .expect("accepting work");
//!
//! // Absolute submission; past deadlines run at once.
//! let now = scheduler.clock().now();
//! let due = scheduler
//!     .submit_at(|| "due", now)
//!     .expect("accepting work");
//!
//! assert_eq!(due.get(), Ok("due"));
//! assert_eq!(soon.get(), Ok("soon"));
//! scheduler.shutdown_and_wait(Duration::from_secs(1));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handle;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod time;

pub use error::{JoinError, PanicPayload, ScheduleError};
pub use handle::TaskHandle;
pub use queue::DelayQueue;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::TaskState;
pub use time::{Time, TimeSource, VirtualClock, WallClock};
