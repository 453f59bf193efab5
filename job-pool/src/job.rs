//! Internal job representation.

use std::time::Instant;

/// Queue priority of a pool job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Med,
    High,
}

/// A queued unit of work.
///
/// The closure owns whatever state the job needs; dropping an unexecuted
/// job releases that state exactly as running it to completion would.
pub(crate) struct Job {
    pub(crate) work: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) priority: Priority,
    pub(crate) request_time: Instant,
    pub(crate) id: u64,
}
