use crate::{Error, Pool, PoolConfig};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{sync::oneshot, time};
use tokio_util::sync::CancellationToken;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn explode(_worker_id: usize) {
    panic!("boom");
}

/// Submits a job that parks its worker until the returned sender fires.
async fn occupy(pool: &Pool) -> oneshot::Sender<()> {
    let (release, parked) = oneshot::channel::<()>();
    pool.submit(move |_: usize| async move {
        let _ = parked.await;
    })
    .await
    .unwrap();
    release
}

#[test]
fn requires_a_runtime() {
    assert!(matches!(
        Pool::new("orphan", PoolConfig::fixed(0, 1)),
        Err(Error::Runtime(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn starts_with_minimum_workers() {
    let pool = Pool::new("warm", PoolConfig::fixed(2, 4)).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.name, "warm");
    assert_eq!(stats.current, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.active, 0);
    assert_eq!((stats.min, stats.max), (2, 4));
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_invalid_bounds() {
    assert!(matches!(
        Pool::new("inverted", PoolConfig::fixed(3, 1)),
        Err(Error::InvalidBounds { .. })
    ));
    assert!(matches!(
        Pool::new("empty", PoolConfig::default()),
        Err(Error::InvalidBounds { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn processes_all_submitted_jobs() {
    const JOBS: usize = 64;

    let pool = Pool::new("all", PoolConfig::fixed(1, 8)).unwrap();
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..JOBS {
        let done = Arc::clone(&done);
        pool.submit(move |_: usize| async move {
            time::sleep(Duration::from_millis(1)).await;
            done.fetch_add(1, Ordering::Relaxed);
        })
        .await
        .unwrap();
    }

    pool.shutdown().await;
    assert_eq!(done.load(Ordering::Relaxed), JOBS);

    let stats = pool.stats();
    assert_eq!(stats.processed, JOBS as u64);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.current, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn never_exceeds_maximum() {
    const MAX: usize = 3;

    let pool = Pool::new("capped", PoolConfig::fixed(0, MAX)).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..24 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.submit(move |_: usize| async move {
            let now = running.fetch_add(1, Ordering::AcqRel) + 1;
            peak.fetch_max(now, Ordering::AcqRel);
            time::sleep(Duration::from_millis(5)).await;
            running.fetch_sub(1, Ordering::AcqRel);
        })
        .await
        .unwrap();
        assert!(pool.stats().current <= MAX);
    }

    pool.shutdown().await;
    assert!(peak.load(Ordering::Acquire) <= MAX);
    assert!(pool.stats().high_water <= MAX);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocks_submitters_when_saturated() {
    let pool = Pool::new("narrow", PoolConfig::fixed(0, 1)).unwrap();
    let release = occupy(&pool).await;

    let blocked = time::timeout(Duration::from_millis(100), pool.submit(|_: usize| async {})).await;
    assert!(blocked.is_err(), "submit must wait while the pool is full");
    assert_eq!(pool.stats().pending, 0);

    release.send(()).unwrap();
    time::timeout(Duration::from_secs(1), pool.submit(|_: usize| async {}))
        .await
        .expect("capacity freed")
        .unwrap();

    pool.shutdown().await;
    assert_eq!(pool.stats().processed, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_panicking_jobs() {
    let pool = Pool::new("sturdy", PoolConfig::fixed(1, 1)).unwrap();
    pool.submit(explode).await.unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    pool.submit(move |_: usize| async move {
        flag.fetch_add(1, Ordering::Relaxed);
    })
    .await
    .unwrap();

    wait_for(|| pool.stats().processed == 2).await;
    let stats = pool.stats();
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.current, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(ran.load(Ordering::Relaxed), 1);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shrinks_after_idle_timeout() {
    let config = PoolConfig::fixed(1, 4).with_idle_timeout(Duration::from_millis(50));
    let pool = Pool::new("elastic", config).unwrap();

    for _ in 0..4 {
        pool.submit(|_: usize| async {
            time::sleep(Duration::from_millis(100)).await;
        })
        .await
        .unwrap();
    }
    assert!(pool.stats().high_water >= 2);

    wait_for(|| pool.stats().current == 1).await;
    assert_eq!(pool.stats().processed, 4);
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn trim_follows_lowered_minimum() {
    let min = Arc::new(AtomicUsize::new(3));
    let floor = Arc::clone(&min);
    let config = PoolConfig::new(
        Arc::new(move || floor.load(Ordering::Relaxed)),
        crate::pool::fixed(4),
    )
    .with_idle_timeout(Duration::from_secs(3600));
    let pool = Pool::new("trimmed", config).unwrap();
    assert_eq!(pool.stats().current, 3);

    min.store(1, Ordering::Relaxed);
    wait_for(|| {
        pool.trim();
        pool.stats().current == 1
    })
    .await;
    assert_eq!(pool.stats().min, 1);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_follows_raised_minimum() {
    let min = Arc::new(AtomicUsize::new(0));
    let floor = Arc::clone(&min);
    let config = PoolConfig::new(
        Arc::new(move || floor.load(Ordering::Relaxed)),
        crate::pool::fixed(4),
    );
    let pool = Pool::new("raised", config).unwrap();
    assert_eq!(pool.stats().current, 0);

    min.store(3, Ordering::Relaxed);
    pool.reconcile();
    assert_eq!(pool.stats().current, 3);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_and_is_repeatable() {
    let pool = Pool::new("drained", PoolConfig::fixed(2, 2)).unwrap();
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let done = Arc::clone(&done);
        pool.submit(move |_: usize| async move {
            time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::Relaxed);
        })
        .await
        .unwrap();
    }

    pool.shutdown().await;
    assert_eq!(done.load(Ordering::Relaxed), 8);
    assert!(pool.is_closed());
    assert_eq!(pool.stats().current, 0);

    pool.shutdown().await;
    assert!(matches!(
        pool.submit(|_: usize| async {}).await,
        Err(Error::PoolClosed { name }) if name == "drained"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_until_gives_up_on_cancel() {
    let pool = Pool::new("patient", PoolConfig::fixed(0, 1)).unwrap();
    let release = occupy(&pool).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        pool.submit_until(|_: usize| async {}, &cancel).await,
        Err(Error::Cancelled)
    ));
    assert_eq!(pool.stats().pending, 0);

    release.send(()).unwrap();
    let live = CancellationToken::new();
    pool.submit_until(|_: usize| async {}, &live).await.unwrap();
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn clones_share_workers() {
    let pool = Pool::new("shared", PoolConfig::fixed(1, 2)).unwrap();
    let other = pool.clone();
    assert!(pool.ptr_eq(&other));

    other.submit(|_: usize| async {}).await.unwrap();
    wait_for(|| pool.stats().processed == 1).await;

    other.shutdown().await;
    assert!(pool.is_closed());
}
