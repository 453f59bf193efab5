//! Priority-queued worker pool and one-shot timer service.
//!
//! The [`ThreadPool`] runs jobs on a dynamically sized set of OS threads.
//! Jobs are queued at one of three priorities and age upward when they wait
//! too long, so low-priority work can never starve indefinitely. A single
//! "persistent" slot accepts jobs that run for the lifetime of the pool,
//! such as the [`TimerService`] loop.
//!
//! The [`TimerService`] schedules closures to be enqueued on the pool after
//! a delay, and supports cancellation by event id.

mod attr;
mod error;
mod job;
mod policy;
mod pool;
mod stats;
mod timer;

pub use attr::{PoolAttr, SchedPolicy};
pub use error::{PoolError, Result};
pub use job::Priority;
pub use pool::ThreadPool;
pub use stats::PoolStats;
pub use timer::{FireTime, TimeoutKind, TimerService};
