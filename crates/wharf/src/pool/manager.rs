//! Dynamically sized worker pool.
//!
//! This module defines [`Pool`], a cloneable handle to a set of long-lived
//! Tokio worker tasks pulling [`Job`]s from one shared FIFO queue.
//!
//! ## Capacity model
//!
//! Every parked worker contributes one permit to an `idle` semaphore. A
//! submitter must claim a permit before its job is queued, so the queue never
//! holds more jobs than there are workers ready to take them:
//!
//! - A permit is free: the job is queued and some idle worker picks it up.
//! - No permit, below `max`: one more worker is spawned and the submitter
//!   waits for the next permit (the new worker's, or whichever frees first).
//! - No permit, at `max`: the submitter waits. This is the pool's
//!   backpressure.
//!
//! ## Resizing
//!
//! Grow and shrink decisions are serialized by a mutex and re-read the caller
//! supplied bounds every time. A worker retires only while parked, and only
//! after reclaiming an unclaimed idle permit, so it never abandons a job that
//! was handed to it. Workers retire when idle past the configured timeout,
//! when woken by [`Pool::trim`], or right after finishing a job if the
//! maximum was lowered beneath the current size.

use super::{
    config::{Bounds, PoolConfig},
    job::{BoxJob, Job},
    stats::{Counters, PendingGuard, Stats},
    worker::worker_loop,
};
use crate::{Error, Result};
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{Notify, Semaphore, TryAcquireError, mpsc},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A bounded, resizable pool of asynchronous workers.
///
/// Cloning a [`Pool`] yields another handle to the same workers, which is how
/// several servers share one pool. The pool keeps running until
/// [`Pool::shutdown`] is called; dropping every handle does not stop it.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) name: String,
    bounds: Bounds,
    pub(crate) idle_timeout: Duration,
    pub(crate) counters: Counters,
    /// One permit per parked worker not yet claimed by a submitter.
    pub(crate) idle: Semaphore,
    tx: mpsc::UnboundedSender<BoxJob>,
    pub(crate) rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BoxJob>>,
    /// Serializes grow/shrink so `current` never races with itself.
    resize: Mutex<()>,
    /// Held shared while enqueueing, exclusively while closing, so nothing is
    /// enqueued after the workers begin their final drain.
    gate: RwLock<()>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) trim: Notify,
    next_worker_id: AtomicUsize,
    tracker: TaskTracker,
    runtime: Handle,
}

impl Pool {
    /// Validates `config` and eagerly spawns the minimum number of workers.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBounds`] if a sizing function is missing, the minimum
    ///   exceeds the maximum, or the maximum is zero.
    /// - [`Error::Runtime`] if called outside of a Tokio runtime.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        let bounds = config.validate()?;
        let runtime = Handle::try_current()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            name: name.into(),
            bounds,
            idle_timeout: config.idle_timeout,
            counters: Counters::default(),
            idle: Semaphore::new(0),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            resize: Mutex::new(()),
            gate: RwLock::new(()),
            shutdown: CancellationToken::new(),
            trim: Notify::new(),
            next_worker_id: AtomicUsize::new(0),
            tracker: TaskTracker::new(),
            runtime,
        });

        shared.reconcile();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Pool {} started with {} workers",
            shared.name,
            shared.counters.current.load(Ordering::Acquire)
        );

        Ok(Self { inner: shared })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submits a job, waiting while the pool is saturated at its maximum.
    ///
    /// Returns once the job has been handed to the queue, not when it
    /// completes. A panic inside the job is contained by the worker and never
    /// surfaces here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] if the pool has been shut down.
    pub async fn submit<J: Job>(&self, job: J) -> Result<()> {
        self.enqueue(Box::new(job), None).await
    }

    /// Like [`Pool::submit`], but gives up with [`Error::Cancelled`] if
    /// `cancel` fires while waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::PoolClosed`].
    pub async fn submit_until<J: Job>(&self, job: J, cancel: &CancellationToken) -> Result<()> {
        self.enqueue(Box::new(job), Some(cancel)).await
    }

    async fn enqueue(&self, job: BoxJob, cancel: Option<&CancellationToken>) -> Result<()> {
        let shared = &self.inner;
        if shared.shutdown.is_cancelled() {
            return Err(shared.closed());
        }

        let pending = PendingGuard::new(&shared.counters);
        shared.claim_worker(cancel).await?;

        let _gate = shared.gate.read();
        if shared.shutdown.is_cancelled() {
            return Err(shared.closed());
        }
        shared.tx.send(job).map_err(|_| shared.closed())?;
        pending.handoff();
        Ok(())
    }

    /// Returns a snapshot of the pool's counters. Never touches the queue.
    pub fn stats(&self) -> Stats {
        self.inner
            .counters
            .snapshot(&self.inner.name, self.inner.bounds.current())
    }

    /// Wakes parked workers so that idle ones retire down to the current
    /// minimum without waiting for the idle timeout.
    pub fn trim(&self) {
        self.inner.trim.notify_waiters();
    }

    /// Spawns workers until the pool reaches the current minimum. Useful
    /// right after raising the minimum bound.
    pub fn reconcile(&self) {
        self.inner.reconcile();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Returns `true` if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Refuses new work and tells every worker to exit once the queue is
    /// drained, without waiting for them.
    pub(crate) fn close(&self) {
        let shared = &self.inner;
        {
            let _gate = shared.gate.write();
            if !shared.shutdown.is_cancelled() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Shutting down pool {}", shared.name);
                shared.shutdown.cancel();
                shared.idle.close();
            }
        }
        shared.tracker.close();
    }

    /// Stops the pool and waits for every worker to exit.
    ///
    /// - Refuses further submissions.
    /// - Lets every worker finish the job it is running and drain whatever is
    ///   already queued.
    /// - Waits for all worker tasks to terminate.
    ///
    /// Calling this more than once is harmless; later calls return as soon as
    /// the workers are gone.
    pub async fn shutdown(&self) {
        self.close();
        let shared = &self.inner;
        shared.tracker.wait().await;

        #[cfg(feature = "tracing")]
        tracing::debug!("Pool {} shutdown complete", shared.name);
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Pool").field(&self.stats()).finish()
    }
}

impl Shared {
    fn closed(&self) -> Error {
        Error::PoolClosed {
            name: self.name.clone(),
        }
    }

    /// Claims an idle worker for one job, growing the pool if every worker is
    /// busy and there is room.
    async fn claim_worker(self: &Arc<Self>, cancel: Option<&CancellationToken>) -> Result<()> {
        match self.idle.try_acquire() {
            Ok(permit) => {
                permit.forget();
                return Ok(());
            }
            Err(TryAcquireError::Closed) => return Err(self.closed()),
            Err(TryAcquireError::NoPermits) => {}
        }

        self.try_grow();

        let acquired = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                permit = self.idle.acquire() => permit,
                () = cancel.cancelled() => return Err(Error::Cancelled),
            },
            None => self.idle.acquire().await,
        };

        match acquired {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(self.closed()),
        }
    }

    fn try_grow(self: &Arc<Self>) -> bool {
        let _resize = self.resize.lock();
        let (_, max) = self.bounds.current();
        if self.shutdown.is_cancelled() || self.counters.current.load(Ordering::Acquire) >= max {
            return false;
        }
        self.spawn_worker();
        true
    }

    /// Grows the pool up to the current minimum.
    pub(crate) fn reconcile(self: &Arc<Self>) {
        let _resize = self.resize.lock();
        let (min, _) = self.bounds.current();
        while !self.shutdown.is_cancelled() && self.counters.current.load(Ordering::Acquire) < min {
            self.spawn_worker();
        }
    }

    /// Caller must hold `resize`.
    fn spawn_worker(self: &Arc<Self>) {
        let current = self.counters.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.high_water.fetch_max(current, Ordering::AcqRel);

        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.tracker
            .spawn_on(worker_loop(Arc::clone(self), worker_id), &self.runtime);
    }

    /// Retires the calling (parked) worker if the pool is above its maximum.
    pub(crate) fn retire_excess(&self) -> bool {
        self.retire_above(|_, max| max)
    }

    /// Retires the calling (parked) worker if the pool is above its minimum.
    pub(crate) fn retire_idle(&self) -> bool {
        self.retire_above(|min, _| min)
    }

    fn retire_above(&self, floor: impl FnOnce(usize, usize) -> usize) -> bool {
        let _resize = self.resize.lock();
        let (min, max) = self.bounds.current();
        if self.counters.current.load(Ordering::Acquire) <= floor(min, max) {
            return false;
        }

        // Take back an idle permit. If every one has been claimed, jobs are
        // on their way to the parked workers and nobody may leave.
        match self.idle.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => return false,
        }

        self.counters.current.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Accounts for a worker leaving during shutdown.
    pub(crate) fn leave(&self) {
        let _resize = self.resize.lock();
        self.counters.current.fetch_sub(1, Ordering::AcqRel);
    }
}
