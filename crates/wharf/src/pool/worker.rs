//! Worker task lifecycle.
//!
//! Each worker is a long-lived Tokio task that parks on the pool's shared
//! queue, runs one job at a time, and exits when it retires or the pool shuts
//! down. Job execution goes through [`execute`], which contains panics so that
//! a faulty job can neither kill the worker nor skew the pool's counters.

use super::{job::BoxJob, manager::Shared, stats::ActiveGuard};
use core::{any::Any, panic::AssertUnwindSafe};
use futures::FutureExt;
use portable_atomic::Ordering;
use std::sync::Arc;
use tokio::time;

/// Main execution loop for a pool worker.
///
/// # Arguments
///
/// - `shared`: State shared with the owning [`Pool`](crate::Pool).
/// - `worker_id`: Identifier passed to every job this worker runs; unique for
///   the lifetime of the pool.
///
/// The worker offers itself as idle, then waits for one of:
///
/// - a job, which it executes before offering itself again;
/// - shutdown, after which it drains any jobs still queued and exits;
/// - the idle timeout or a trim signal, after which it checks whether the
///   pool can spare it.
pub(crate) async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {}/{worker_id} started", shared.name);

    let retired = 'work: loop {
        shared.idle.add_permits(1);
        if shared.retire_excess() {
            break 'work true;
        }

        let job = loop {
            tokio::select! {
                biased;
                job = next_job(&shared) => break job,
                () = shared.shutdown.cancelled() => break None,
                () = time::sleep(shared.idle_timeout) => {}
                () = shared.trim.notified() => {}
            }

            shared.reconcile();
            if shared.retire_idle() {
                break 'work true;
            }
        };

        match job {
            Some(job) => execute(&shared, worker_id, job).await,
            None => {
                drain(&shared, worker_id).await;
                break 'work false;
            }
        }
    };

    if retired {
        #[cfg(feature = "tracing")]
        tracing::debug!("Worker {}/{worker_id} retired", shared.name);
    } else {
        shared.leave();
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {}/{worker_id} stopped", shared.name);
    }
}

async fn next_job(shared: &Shared) -> Option<BoxJob> {
    shared.rx.lock().await.recv().await
}

/// Runs everything still queued once shutdown has begun. No new jobs can be
/// enqueued at this point, so an empty queue stays empty.
async fn drain(shared: &Shared, worker_id: usize) {
    loop {
        let next = shared.rx.lock().await.try_recv();
        let Ok(job) = next else { break };
        execute(shared, worker_id, job).await;
    }
}

/// Executes a single job inside a panic boundary.
///
/// Counters are updated through [`ActiveGuard`], so they stay consistent on
/// every exit path: normal completion, a caught panic, or the task being torn
/// down mid-job.
async fn execute(shared: &Shared, worker_id: usize, job: BoxJob) {
    let _active = ActiveGuard::enter(&shared.counters);

    let outcome = AssertUnwindSafe(async move { job.run(worker_id).await })
        .catch_unwind()
        .await;

    if let Err(_payload) = outcome {
        shared.counters.panicked.fetch_add(1, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        tracing::error!(
            "Worker {}/{worker_id} recovered from a panicking job: {}",
            shared.name,
            panic_message(_payload.as_ref())
        );
    }
}

#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
