use core::fmt;
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time snapshot of a pool's utilization.
///
/// Each field is read independently from an atomic, so a snapshot taken while
/// work is in flight may be a few transitions apart between fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub name: String,
    /// Submitted, not yet picked up by a worker.
    pub pending: usize,
    /// Currently executing a job.
    pub active: usize,
    /// Live workers.
    pub current: usize,
    /// Live workers not executing a job.
    pub idle: usize,
    /// Jobs finished, including ones that panicked.
    pub processed: u64,
    /// Jobs that panicked.
    pub panicked: u64,
    /// Largest `current` ever observed.
    pub high_water: usize,
    pub min: usize,
    pub max: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: workers={} (min={} max={} hwm={}) active={} idle={} pending={} processed={} panicked={}",
            self.name,
            self.current,
            self.min,
            self.max,
            self.high_water,
            self.active,
            self.idle,
            self.pending,
            self.processed,
            self.panicked,
        )
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) pending: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) current: AtomicUsize,
    pub(crate) high_water: AtomicUsize,
    pub(crate) processed: AtomicU64,
    pub(crate) panicked: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self, name: &str, (min, max): (usize, usize)) -> Stats {
        let current = self.current.load(Ordering::Acquire);
        let active = self.active.load(Ordering::Acquire);
        Stats {
            name: name.to_string(),
            pending: self.pending.load(Ordering::Acquire),
            active,
            current,
            idle: current.saturating_sub(active),
            processed: self.processed.load(Ordering::Acquire),
            panicked: self.panicked.load(Ordering::Acquire),
            high_water: self.high_water.load(Ordering::Acquire),
            min,
            max,
        }
    }
}

/// Keeps `pending` honest when a submission is abandoned part way, e.g. the
/// submitting future is dropped while waiting for capacity.
pub(crate) struct PendingGuard<'a> {
    counters: &'a Counters,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(counters: &'a Counters) -> Self {
        counters.pending.fetch_add(1, Ordering::AcqRel);
        Self {
            counters,
            armed: true,
        }
    }

    /// The job reached the queue; the worker that dequeues it decrements.
    pub(crate) fn handoff(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Marks a worker busy for the lifetime of the guard. Dropping it (normal
/// completion, caught panic, or task abort) always records the job as
/// processed.
pub(crate) struct ActiveGuard<'a>(&'a Counters);

impl<'a> ActiveGuard<'a> {
    pub(crate) fn enter(counters: &'a Counters) -> Self {
        counters.pending.fetch_sub(1, Ordering::AcqRel);
        counters.active.fetch_add(1, Ordering::AcqRel);
        Self(counters)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        self.0.processed.fetch_add(1, Ordering::AcqRel);
    }
}
