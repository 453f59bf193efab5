//! The worker pool core.
//!
//! All mutable state lives behind a single mutex. Two condition variables
//! are paired with it: `cond` signals queued work, `start_shutdown` signals
//! lifecycle transitions (a worker finished starting, a persistent job was
//! claimed, a worker exited).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crate::attr::PoolAttr;
use crate::error::{PoolError, Result};
use crate::job::{Job, Priority};
use crate::policy;
use crate::stats::{PoolStats, StatsInner};

/// A priority-queued worker pool.
///
/// Jobs are enqueued at low, medium or high priority and executed in FIFO
/// order within a priority class. Workers are created on demand up to
/// `max_threads` and retire after `max_idle_time` once the pool is above
/// `min_threads`. Jobs that wait too long are promoted to the next higher
/// queue (see [`PoolAttr::starvation_time`]).
///
/// Cloning the handle is cheap; all clones drive the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    state: Mutex<PoolState>,
    cond: Condvar,
    start_shutdown: Condvar,
}

struct PoolState {
    attr: PoolAttr,
    low: VecDeque<Job>,
    med: VecDeque<Job>,
    high: VecDeque<Job>,
    persistent: Option<Job>,
    shutting_down: bool,
    total_threads: usize,
    busy_threads: usize,
    persistent_threads: usize,
    pending_start: bool,
    last_job_id: u64,
    stats: StatsInner,
}

impl PoolState {
    fn pending_jobs(&self) -> usize {
        self.low.len() + self.med.len() + self.high.len()
    }

    fn has_work(&self) -> bool {
        self.pending_jobs() > 0 || self.persistent.is_some()
    }

    /// Promote starved jobs toward the high queue.
    ///
    /// Must run under the pool lock. The medium queue head moves to the
    /// high tail once it has waited `starvation_time`; the low queue head
    /// moves to the medium tail once it has waited `max_idle_time`. The
    /// loop repeats until neither head qualifies, so cost is proportional
    /// to the number of promotions.
    fn bump_priority(&mut self) {
        let now = Instant::now();
        loop {
            if let Some(job) = self.med.front() {
                let waited = now.saturating_duration_since(job.request_time);
                if waited >= self.attr.starvation_time {
                    self.stats.account_wait(Priority::Med, waited);
                    let job = self.med.pop_front().expect("head checked above");
                    tracing::trace!(job_id = job.id, "promoting starved job to high");
                    self.high.push_back(job);
                    continue;
                }
            }
            if let Some(job) = self.low.front() {
                let waited = now.saturating_duration_since(job.request_time);
                if waited >= self.attr.max_idle_time {
                    self.stats.account_wait(Priority::Low, waited);
                    let job = self.low.pop_front().expect("head checked above");
                    tracing::trace!(job_id = job.id, "promoting aged job to medium");
                    self.med.push_back(job);
                    continue;
                }
            }
            break;
        }
    }
}

impl ThreadPool {
    /// Start a pool and bring up `min_threads` workers.
    ///
    /// # Errors
    ///
    /// Returns an error when the attributes are inconsistent, the requested
    /// scheduling policy is unsupported, or the initial workers could not
    /// be spawned. On spawn failure the partially started pool is shut down
    /// before returning.
    pub fn start(attr: PoolAttr) -> Result<Self> {
        attr.validate()?;
        policy::set_process_policy(attr.sched_policy)?;

        let min_threads = attr.min_threads;
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                attr,
                low: VecDeque::new(),
                med: VecDeque::new(),
                high: VecDeque::new(),
                persistent: None,
                shutting_down: false,
                total_threads: 0,
                busy_threads: 0,
                persistent_threads: 0,
                pending_start: false,
                last_job_id: 0,
                stats: StatsInner::default(),
            }),
            cond: Condvar::new(),
            start_shutdown: Condvar::new(),
        });
        let pool = ThreadPool { inner };

        let mut failure = None;
        let mut state = pool.inner.state.lock().unwrap();
        for _ in 0..min_threads {
            let (returned, result) = pool.inner.create_worker(state);
            state = returned;
            if let Err(err) = result {
                failure = Some(err);
                break;
            }
        }
        drop(state);

        if let Some(err) = failure {
            pool.shutdown();
            return Err(err);
        }
        Ok(pool)
    }

    /// Enqueue a job at the given priority.
    ///
    /// Never blocks on queue capacity: the job is either accepted (and its
    /// id returned) or refused with [`PoolError::TooManyJobs`] when the
    /// summed queue depth has reached `max_jobs_total`.
    pub fn add_job<F>(&self, priority: Priority, work: F) -> Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        let pending = state.pending_jobs();
        if pending >= state.attr.max_jobs_total {
            tracing::warn!(pending, "job queue full, refusing job");
            return Err(PoolError::TooManyJobs);
        }
        let id = state.last_job_id;
        let job = Job {
            work: Box::new(work),
            priority,
            request_time: Instant::now(),
            id,
        };
        match priority {
            Priority::High => state.high.push_back(job),
            Priority::Med => state.med.push_back(job),
            Priority::Low => state.low.push_back(job),
        }
        let mut state = self.inner.add_worker(state);
        self.inner.cond.notify_one();
        state.last_job_id += 1;
        Ok(id)
    }

    /// Hand a long-lived job to a dedicated worker.
    ///
    /// The pool keeps a single persistent slot. A worker that claims it is
    /// excluded from the sizing arithmetic until the job returns. The call
    /// blocks until a worker has picked the job up.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoCapacity`] when the pool is at `max_threads` and no
    /// spare non-persistent worker exists; [`PoolError::Spawn`] when a new
    /// worker was needed but could not be created.
    pub fn add_persistent<F>(&self, priority: Priority, work: F) -> Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        let below_max = state
            .attr
            .max_threads
            .map_or(true, |max| state.total_threads < max);
        if below_max {
            let (returned, result) = self.inner.create_worker(state);
            state = returned;
            if let Err(err) = result {
                return Err(err);
            }
        } else if state.total_threads - state.persistent_threads <= 1 {
            return Err(PoolError::NoCapacity);
        }

        let id = state.last_job_id;
        state.persistent = Some(Job {
            work: Box::new(work),
            priority,
            request_time: Instant::now(),
            id,
        });
        self.inner.cond.notify_one();

        // wait until a worker has claimed the slot
        let mut state = self
            .inner
            .start_shutdown
            .wait_while(state, |s| s.persistent.is_some() && !s.shutting_down)
            .unwrap();
        state.last_job_id += 1;
        Ok(id)
    }

    /// Drain the queues and stop all workers.
    ///
    /// Queued and persistent jobs that never ran are destroyed, releasing
    /// whatever state their closures own. Blocks until every worker has
    /// exited. Safe to call more than once.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let mut drained: Vec<Job> = Vec::with_capacity(state.pending_jobs() + 1);
        drained.extend(state.high.drain(..));
        drained.extend(state.med.drain(..));
        drained.extend(state.low.drain(..));
        drained.extend(state.persistent.take());
        state.shutting_down = true;
        self.inner.cond.notify_all();
        drop(state);

        // run the drained jobs' disposers outside the lock
        drop(drained);

        let state = self.inner.state.lock().unwrap();
        let _state = self
            .inner
            .start_shutdown
            .wait_while(state, |s| s.total_threads > 0)
            .unwrap();
    }

    /// Current pool attributes.
    pub fn attr(&self) -> PoolAttr {
        self.inner.state.lock().unwrap().attr.clone()
    }

    /// Replace the pool attributes.
    ///
    /// Workers are brought up to the new `min_threads`; idle workers above
    /// the new `max_threads` exit the next time they wake.
    pub fn set_attr(&self, attr: PoolAttr) -> Result<()> {
        attr.validate()?;
        policy::set_process_policy(attr.sched_policy)?;

        let mut state = self.inner.state.lock().unwrap();
        state.attr = attr;
        let mut failure = None;
        while state.total_threads < state.attr.min_threads {
            let (returned, result) = self.inner.create_worker(state);
            state = returned;
            match result {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        self.inner.cond.notify_all();
        drop(state);

        if let Some(err) = failure {
            self.shutdown();
            return Err(err);
        }
        Ok(())
    }

    /// Snapshot the pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().unwrap();
        let avg = |total: f64, jobs: u64| if jobs > 0 { total / jobs as f64 } else { 0.0 };
        PoolStats {
            total_jobs_lq: state.stats.total_jobs_lq,
            total_jobs_mq: state.stats.total_jobs_mq,
            total_jobs_hq: state.stats.total_jobs_hq,
            avg_wait_lq_ms: avg(state.stats.total_wait_lq_ms, state.stats.total_jobs_lq),
            avg_wait_mq_ms: avg(state.stats.total_wait_mq_ms, state.stats.total_jobs_mq),
            avg_wait_hq_ms: avg(state.stats.total_wait_hq_ms, state.stats.total_jobs_hq),
            current_jobs_lq: state.low.len(),
            current_jobs_mq: state.med.len(),
            current_jobs_hq: state.high.len(),
            max_threads: state.stats.max_threads,
            worker_threads: state.stats.worker_threads,
            persistent_threads: state.persistent_threads,
            idle_threads: state.stats.idle_threads,
            total_threads: state.total_threads,
            total_work_time: state.stats.total_work_time,
            total_idle_time: state.stats.total_idle_time,
        }
    }
}

impl PoolInner {
    /// Spawn one worker and wait for it to register itself.
    ///
    /// At most one worker may be mid-start at any time; concurrent callers
    /// queue up on `start_shutdown`. Returns `Ok(false)` without spawning
    /// when the pool is already at `max_threads`.
    fn create_worker<'a>(
        self: &Arc<Self>,
        state: MutexGuard<'a, PoolState>,
    ) -> (MutexGuard<'a, PoolState>, Result<bool>) {
        let mut state = self
            .start_shutdown
            .wait_while(state, |s| s.pending_start)
            .unwrap();

        if let Some(max) = state.attr.max_threads {
            if state.total_threads + 1 > max {
                return (state, Ok(false));
            }
        }

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("pool-worker".into())
            .spawn(move || worker_loop(inner));
        if let Err(err) = spawned {
            tracing::error!(error = %err, "could not spawn worker thread");
            return (state, Err(PoolError::Spawn(err)));
        }

        state.pending_start = true;
        let mut state = self
            .start_shutdown
            .wait_while(state, |s| s.pending_start)
            .unwrap();
        if state.total_threads > state.stats.max_threads {
            state.stats.max_threads = state.total_threads;
        }
        (state, Ok(true))
    }

    /// Create workers while the jobs-per-thread ratio demands it.
    ///
    /// Stops quietly at `max_threads` or on a spawn failure; the caller
    /// retries on the next enqueue.
    fn add_worker<'a>(
        self: &Arc<Self>,
        mut state: MutexGuard<'a, PoolState>,
    ) -> MutexGuard<'a, PoolState> {
        loop {
            let threads = state.total_threads - state.persistent_threads;
            let needed = threads == 0
                || state.total_threads == state.busy_threads
                || state.pending_jobs() / threads >= state.attr.jobs_per_thread;
            if !needed {
                break;
            }
            let (returned, result) = self.create_worker(state);
            state = returned;
            match result {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "worker creation failed, will retry on next enqueue");
                    break;
                }
            }
        }
        state
    }
}

/// Worker states: a worker starts, then alternates between idle waits and
/// job execution until it times out above `min_threads` or the pool shuts
/// down.
fn worker_loop(inner: Arc<PoolInner>) {
    let mut state = inner.state.lock().unwrap();
    state.total_threads += 1;
    state.pending_start = false;
    inner.start_shutdown.notify_all();

    // None until the first job; afterwards whether the last job was persistent
    let mut was_persistent: Option<bool> = None;
    let mut segment = Instant::now();
    loop {
        state.stats.idle_threads += 1;
        state.stats.total_work_time += segment.elapsed().as_secs_f64();
        segment = Instant::now();
        match was_persistent.take() {
            Some(true) => state.persistent_threads -= 1,
            Some(false) => state.stats.worker_threads -= 1,
            None => {}
        }

        let mut timed_out = false;
        while !state.has_work() && !state.shutting_down {
            let over_min = state.total_threads > state.attr.min_threads;
            let over_max = state
                .attr
                .max_threads
                .is_some_and(|max| state.total_threads > max);
            // an idle timeout retires the worker above min_threads; being
            // over max_threads (after set_attr) retires it immediately
            if (timed_out && over_min) || over_max {
                state.stats.idle_threads -= 1;
                state.total_threads -= 1;
                inner.start_shutdown.notify_all();
                return;
            }
            let idle = state.attr.max_idle_time;
            let (returned, wait) = inner.cond.wait_timeout(state, idle).unwrap();
            state = returned;
            timed_out = wait.timed_out();
        }
        state.stats.idle_threads -= 1;
        state.stats.total_idle_time += segment.elapsed().as_secs_f64();
        segment = Instant::now();

        state.bump_priority();

        if state.shutting_down {
            state.total_threads -= 1;
            inner.start_shutdown.notify_all();
            return;
        }

        let job;
        if let Some(claimed) = state.persistent.take() {
            state.persistent_threads += 1;
            was_persistent = Some(true);
            inner.start_shutdown.notify_all();
            job = claimed;
        } else {
            was_persistent = Some(false);
            state.stats.worker_threads += 1;
            if let Some(next) = state.high.pop_front() {
                state.stats.account_wait(Priority::High, next.request_time.elapsed());
                job = next;
            } else if let Some(next) = state.med.pop_front() {
                state.stats.account_wait(Priority::Med, next.request_time.elapsed());
                job = next;
            } else if let Some(next) = state.low.pop_front() {
                state.stats.account_wait(Priority::Low, next.request_time.elapsed());
                job = next;
            } else {
                // another worker took the work between wakeup and here
                state.stats.worker_threads -= 1;
                state.total_threads -= 1;
                inner.start_shutdown.notify_all();
                return;
            }
        }
        state.busy_threads += 1;
        drop(state);

        let priority = job.priority;
        policy::apply_thread_priority(priority);
        (job.work)();
        policy::apply_thread_priority(Priority::Med);

        state = inner.state.lock().unwrap();
        state.busy_threads -= 1;
    }
}
