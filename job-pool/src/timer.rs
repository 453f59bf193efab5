//! One-shot timer service running on the pool's persistent slot.
//!
//! The timer thread sleeps on a condition variable until the nearest
//! deadline or a signal, and enqueues fired jobs back onto the pool. It is
//! the single consumer of the pending set; every other access holds the
//! timer mutex.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{PoolError, Result};
use crate::job::Priority;
use crate::pool::ThreadPool;

/// Retention class of a scheduled event.
///
/// Short-term events are best-effort; long-term events are expected to
/// survive a restart of the scheduling thread. Both classes share one
/// pending set here, the class is carried for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    ShortTerm,
    LongTerm,
}

/// When a scheduled event fires.
#[derive(Debug, Clone, Copy)]
pub enum FireTime {
    /// Seconds from now; values <= 0 fire immediately
    RelSec(i64),
    /// Seconds since the Unix epoch; past values fire immediately
    AbsSec(u64),
}

impl FireTime {
    fn deadline(self) -> Instant {
        match self {
            FireTime::RelSec(secs) => {
                if secs <= 0 {
                    Instant::now()
                } else {
                    Instant::now() + Duration::from_secs(secs as u64)
                }
            }
            FireTime::AbsSec(epoch_secs) => {
                let now_epoch = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                if epoch_secs <= now_epoch {
                    Instant::now()
                } else {
                    Instant::now() + Duration::from_secs(epoch_secs - now_epoch)
                }
            }
        }
    }
}

struct TimerEvent {
    deadline: Instant,
    id: u64,
    kind: TimeoutKind,
    priority: Priority,
    work: Box<dyn FnOnce() + Send + 'static>,
}

struct TimerState {
    /// Pending events ordered by deadline, ties in schedule order
    events: Vec<TimerEvent>,
    next_id: u64,
    stop: bool,
    running: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Schedules one-shot delayed jobs onto a [`ThreadPool`].
///
/// Event ids are assigned monotonically and never reused, so a stale
/// [`remove`](TimerService::remove) can never cancel a later event.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<TimerInner>,
    pool: ThreadPool,
}

impl TimerService {
    /// Start the timer loop on the pool's persistent slot.
    pub fn start(pool: &ThreadPool) -> Result<Self> {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                events: Vec::new(),
                next_id: 0,
                stop: false,
                running: true,
            }),
            cond: Condvar::new(),
        });
        let loop_inner = Arc::clone(&inner);
        let loop_pool = pool.clone();
        pool.add_persistent(Priority::High, move || timer_loop(loop_inner, loop_pool))?;
        Ok(Self {
            inner,
            pool: pool.clone(),
        })
    }

    /// Schedule `work` to be enqueued on the pool at `when`, at the given
    /// pool priority. Returns the event id for cancellation.
    pub fn schedule<F>(
        &self,
        kind: TimeoutKind,
        when: FireTime,
        priority: Priority,
        work: F,
    ) -> Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = when.deadline();
        let mut state = self.inner.state.lock().unwrap();
        if state.stop {
            return Err(PoolError::Stopped);
        }
        let id = state.next_id;
        state.next_id += 1;
        let pos = state
            .events
            .iter()
            .position(|event| event.deadline > deadline)
            .unwrap_or(state.events.len());
        state.events.insert(
            pos,
            TimerEvent {
                deadline,
                id,
                kind,
                priority,
                work: Box::new(work),
            },
        );
        tracing::trace!(event_id = id, ?kind, "scheduled timer event");
        self.inner.cond.notify_all();
        Ok(id)
    }

    /// Cancel a pending event.
    ///
    /// Unknown ids are ignored, so cancelling after the event has fired is
    /// harmless. An event that already fired but has not yet run will still
    /// execute.
    pub fn remove(&self, event_id: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.events.retain(|event| event.id != event_id);
    }

    /// Stop the timer loop and discard pending events.
    ///
    /// Blocks until the loop has returned its persistent worker to the
    /// pool, so a subsequent [`ThreadPool::shutdown`] does not hang on it.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.stop = true;
        let drained: Vec<TimerEvent> = state.events.drain(..).collect();
        self.inner.cond.notify_all();
        let state = self
            .inner
            .cond
            .wait_while(state, |s| s.running)
            .unwrap();
        drop(state);
        drop(drained);
    }

    /// The pool fired jobs are enqueued on.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

fn timer_loop(inner: Arc<TimerInner>, pool: ThreadPool) {
    let mut state = inner.state.lock().unwrap();
    loop {
        if state.stop {
            break;
        }
        let now = Instant::now();
        let next_deadline = state.events.first().map(|event| event.deadline);
        match next_deadline {
            Some(deadline) if deadline <= now => {
                let event = state.events.remove(0);
                drop(state);
                tracing::trace!(event_id = event.id, kind = ?event.kind, "timer event fired");
                if let Err(err) = pool.add_job(event.priority, event.work) {
                    tracing::warn!(event_id = event.id, error = %err, "dropping fired timer job");
                }
                state = inner.state.lock().unwrap();
            }
            Some(deadline) => {
                let (returned, _timeout) = inner
                    .cond
                    .wait_timeout(state, deadline.duration_since(now))
                    .unwrap();
                state = returned;
            }
            None => {
                state = inner.cond.wait(state).unwrap();
            }
        }
    }
    state.running = false;
    inner.cond.notify_all();
}
