//! Pool sizing and scheduling attributes.

use std::time::Duration;

use crate::error::{PoolError, Result};

/// OS scheduling class requested for the process.
///
/// `Fifo` and `RoundRobin` map to the real-time classes where the platform
/// has them; applying them usually requires elevated privileges, in which
/// case the request is silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// The platform default time-sharing class
    #[default]
    Other,
    /// First-in first-out real-time class
    Fifo,
    /// Round-robin real-time class
    RoundRobin,
}

/// Sizing and timing attributes for a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone)]
pub struct PoolAttr {
    /// Workers kept alive even when idle.
    /// Default: 2
    pub min_threads: usize,

    /// Hard cap on live workers, `None` for unlimited.
    /// Default: 12
    pub max_threads: Option<usize>,

    /// Target ratio of queued jobs per worker before another worker is
    /// created.
    /// Default: 10
    pub jobs_per_thread: usize,

    /// How long an idle worker above `min_threads` waits before exiting.
    /// Also the age at which a low-priority job is promoted to medium.
    /// Default: 10 seconds
    pub max_idle_time: Duration,

    /// Age at which a medium-priority job is promoted to high.
    /// Default: 500 milliseconds
    pub starvation_time: Duration,

    /// Maximum number of queued jobs across all three priorities.
    /// Default: 100
    pub max_jobs_total: usize,

    /// Scheduling class to request for the process.
    /// Default: `SchedPolicy::Other`
    pub sched_policy: SchedPolicy,
}

impl Default for PoolAttr {
    fn default() -> Self {
        Self {
            min_threads: 2,
            max_threads: Some(12),
            jobs_per_thread: 10,
            max_idle_time: Duration::from_secs(10),
            starvation_time: Duration::from_millis(500),
            max_jobs_total: 100,
            sched_policy: SchedPolicy::Other,
        }
    }
}

impl PoolAttr {
    /// Create attributes with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the attributes for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.jobs_per_thread == 0 {
            return Err(PoolError::InvalidAttr("jobs_per_thread must be > 0"));
        }
        if let Some(max) = self.max_threads {
            if max < self.min_threads {
                return Err(PoolError::InvalidAttr(
                    "max_threads must be >= min_threads",
                ));
            }
        }
        Ok(())
    }

    pub fn with_thread_range(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_threads = min;
        self.max_threads = max;
        self
    }

    pub fn with_jobs_per_thread(mut self, jobs: usize) -> Self {
        self.jobs_per_thread = jobs;
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    pub fn with_starvation_time(mut self, starvation: Duration) -> Self {
        self.starvation_time = starvation;
        self
    }

    pub fn with_max_jobs_total(mut self, max: usize) -> Self {
        self.max_jobs_total = max;
        self
    }

    pub fn with_sched_policy(mut self, policy: SchedPolicy) -> Self {
        self.sched_policy = policy;
        self
    }
}
