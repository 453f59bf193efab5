//! Pool statistics collection.

use std::fmt;
use std::time::Duration;

use crate::job::Priority;

/// Counters maintained under the pool lock.
#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    pub(crate) total_jobs_lq: u64,
    pub(crate) total_jobs_mq: u64,
    pub(crate) total_jobs_hq: u64,
    pub(crate) total_wait_lq_ms: f64,
    pub(crate) total_wait_mq_ms: f64,
    pub(crate) total_wait_hq_ms: f64,
    pub(crate) max_threads: usize,
    pub(crate) worker_threads: usize,
    pub(crate) idle_threads: usize,
    pub(crate) total_work_time: f64,
    pub(crate) total_idle_time: f64,
}

impl StatsInner {
    /// Account the time a job spent waiting at the given priority.
    pub(crate) fn account_wait(&mut self, priority: Priority, waited: Duration) {
        let ms = waited.as_secs_f64() * 1000.0;
        match priority {
            Priority::Low => {
                self.total_jobs_lq += 1;
                self.total_wait_lq_ms += ms;
            }
            Priority::Med => {
                self.total_jobs_mq += 1;
                self.total_wait_mq_ms += ms;
            }
            Priority::High => {
                self.total_jobs_hq += 1;
                self.total_wait_hq_ms += ms;
            }
        }
    }
}

/// A point-in-time snapshot of pool activity.
///
/// Averages are computed lazily when the snapshot is taken.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Jobs dequeued from each priority queue so far
    pub total_jobs_lq: u64,
    pub total_jobs_mq: u64,
    pub total_jobs_hq: u64,
    /// Average queue wait per priority, in milliseconds
    pub avg_wait_lq_ms: f64,
    pub avg_wait_mq_ms: f64,
    pub avg_wait_hq_ms: f64,
    /// Jobs currently queued per priority
    pub current_jobs_lq: usize,
    pub current_jobs_mq: usize,
    pub current_jobs_hq: usize,
    /// Highest number of live workers observed
    pub max_threads: usize,
    /// Workers currently executing regular jobs or claiming one
    pub worker_threads: usize,
    /// Workers currently dedicated to persistent jobs
    pub persistent_threads: usize,
    /// Workers currently idle
    pub idle_threads: usize,
    /// All live workers
    pub total_threads: usize,
    /// Cumulative seconds spent executing jobs
    pub total_work_time: f64,
    /// Cumulative seconds spent idle
    pub total_idle_time: f64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "high jobs pending: {}", self.current_jobs_hq)?;
        writeln!(f, "med jobs pending: {}", self.current_jobs_mq)?;
        writeln!(f, "low jobs pending: {}", self.current_jobs_lq)?;
        writeln!(f, "avg wait high (ms): {:.3}", self.avg_wait_hq_ms)?;
        writeln!(f, "avg wait med (ms): {:.3}", self.avg_wait_mq_ms)?;
        writeln!(f, "avg wait low (ms): {:.3}", self.avg_wait_lq_ms)?;
        writeln!(f, "max threads active: {}", self.max_threads)?;
        writeln!(f, "current worker threads: {}", self.worker_threads)?;
        writeln!(f, "current persistent threads: {}", self.persistent_threads)?;
        writeln!(f, "current idle threads: {}", self.idle_threads)?;
        writeln!(f, "total threads: {}", self.total_threads)?;
        writeln!(f, "total work time (s): {:.3}", self.total_work_time)?;
        writeln!(f, "total idle time (s): {:.3}", self.total_idle_time)
    }
}
