use crate::{
    Error, Result, Stats,
    pool::{DEFAULT_IDLE_TIMEOUT, Pool, PoolConfig, SizeFn, fixed},
};
use core::time::Duration;
use parking_lot::RwLock;

/// How a server obtains its receive and send pools.
///
/// Exactly one style must be used:
///
/// - **Shared**: both `recv_pool` and `send_pool` are set. The pools belong
///   to the caller (usually a [`PoolRegistry`](crate::PoolRegistry)) and
///   outlive the server; stopping the server never shuts them down.
/// - **Owned**: all four sizing functions are set. The server builds its own
///   pools on `start` and shuts them down on `stop`. A server that is not
///   running holds no workers.
#[derive(Clone, Default)]
pub struct PoolOptions {
    pub recv_pool: Option<Pool>,
    pub send_pool: Option<Pool>,
    pub recv_min: Option<SizeFn>,
    pub recv_max: Option<SizeFn>,
    pub send_min: Option<SizeFn>,
    pub send_max: Option<SizeFn>,
    /// Idle timeout for owned pools. Ignored for shared pools.
    pub idle_timeout: Option<Duration>,
}

impl PoolOptions {
    pub fn shared(recv: Pool, send: Pool) -> Self {
        Self {
            recv_pool: Some(recv),
            send_pool: Some(send),
            ..Self::default()
        }
    }

    pub fn sized(recv_min: SizeFn, recv_max: SizeFn, send_min: SizeFn, send_max: SizeFn) -> Self {
        Self {
            recv_min: Some(recv_min),
            recv_max: Some(recv_max),
            send_min: Some(send_min),
            send_max: Some(send_max),
            ..Self::default()
        }
    }

    /// Owned pools with constant bounds.
    pub fn fixed(recv_min: usize, recv_max: usize, send_min: usize, send_max: usize) -> Self {
        Self::sized(
            fixed(recv_min),
            fixed(recv_max),
            fixed(send_min),
            fixed(send_max),
        )
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Validates the options and produces the server's pools. Owned pools
    /// are named `{server}-recv` and `{server}-send` and are not built until
    /// [`ServerPools::open`].
    pub(crate) fn resolve(&self, server: &str) -> Result<ServerPools> {
        let any_sizing = self.recv_min.is_some()
            || self.recv_max.is_some()
            || self.send_min.is_some()
            || self.send_max.is_some();

        match (&self.recv_pool, &self.send_pool) {
            (Some(_), Some(_)) if any_sizing => Err(invalid(
                "shared pools and sizing functions are mutually exclusive",
            )),
            (Some(recv), Some(send)) => Ok(ServerPools::Shared {
                recv: recv.clone(),
                send: send.clone(),
            }),
            (Some(_), None) | (None, Some(_)) => Err(invalid(
                "shared pools must be supplied as a receive/send pair",
            )),
            (None, None) => {
                let (Some(recv_min), Some(recv_max), Some(send_min), Some(send_max)) =
                    (&self.recv_min, &self.recv_max, &self.send_min, &self.send_max)
                else {
                    return Err(invalid(
                        "either two shared pools or all four sizing functions are required",
                    ));
                };

                let idle_timeout = self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);
                let recv = PoolConfig::new(recv_min.clone(), recv_max.clone())
                    .with_idle_timeout(idle_timeout);
                let send = PoolConfig::new(send_min.clone(), send_max.clone())
                    .with_idle_timeout(idle_timeout);
                recv.validate()?;
                send.validate()?;

                Ok(ServerPools::Owned {
                    recv: OwnedPool::new(format!("{server}-recv"), recv),
                    send: OwnedPool::new(format!("{server}-send"), send),
                })
            }
        }
    }
}

impl core::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let size = |bound: &Option<SizeFn>| bound.as_ref().map(|bound| bound());
        f.debug_struct("PoolOptions")
            .field("recv_pool", &self.recv_pool.as_ref().map(Pool::name))
            .field("send_pool", &self.send_pool.as_ref().map(Pool::name))
            .field("recv_min", &size(&self.recv_min))
            .field("recv_max", &size(&self.recv_max))
            .field("send_min", &size(&self.send_min))
            .field("send_max", &size(&self.send_max))
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidPoolOptions {
        reason: reason.to_string(),
    }
}

/// The pools a server dispatches to.
pub(crate) enum ServerPools {
    Shared { recv: Pool, send: Pool },
    Owned { recv: OwnedPool, send: OwnedPool },
}

/// A pool the server builds on `start` and drops on `stop`.
pub(crate) struct OwnedPool {
    name: String,
    config: PoolConfig,
    pool: Option<Pool>,
}

impl OwnedPool {
    fn new(name: String, config: PoolConfig) -> Self {
        Self {
            name,
            config,
            pool: None,
        }
    }

    fn get(&self) -> Result<Pool> {
        self.pool.clone().ok_or_else(|| Error::PoolClosed {
            name: self.name.clone(),
        })
    }

    fn stats(&self) -> Stats {
        if let Some(pool) = &self.pool {
            return pool.stats();
        }
        let (min, max) = self
            .config
            .validate()
            .map(|bounds| bounds.current())
            .unwrap_or_default();
        Stats {
            name: self.name.clone(),
            min,
            max,
            ..Stats::default()
        }
    }
}

impl ServerPools {
    /// The receive pool, or [`Error::PoolClosed`] while owned pools are down.
    pub(crate) fn recv(&self) -> Result<Pool> {
        match self {
            Self::Shared { recv, .. } => Ok(recv.clone()),
            Self::Owned { recv, .. } => recv.get(),
        }
    }

    /// The send pool, or [`Error::PoolClosed`] while owned pools are down.
    pub(crate) fn send(&self) -> Result<Pool> {
        match self {
            Self::Shared { send, .. } => Ok(send.clone()),
            Self::Owned { send, .. } => send.get(),
        }
    }

    pub(crate) fn recv_stats(&self) -> Stats {
        match self {
            Self::Shared { recv, .. } => recv.stats(),
            Self::Owned { recv, .. } => recv.stats(),
        }
    }

    pub(crate) fn send_stats(&self) -> Stats {
        match self {
            Self::Shared { send, .. } => send.stats(),
            Self::Owned { send, .. } => send.stats(),
        }
    }

    /// Builds the owned pools for a run. Either both come up or neither
    /// does. Shared pools are used as they are.
    pub(crate) fn open(&mut self) -> Result<()> {
        let Self::Owned { recv, send } = self else {
            return Ok(());
        };

        if recv.pool.is_none() {
            recv.pool = Some(Pool::new(recv.name.as_str(), recv.config.clone())?);
        }
        if send.pool.is_none() {
            match Pool::new(send.name.as_str(), send.config.clone()) {
                Ok(pool) => send.pool = Some(pool),
                Err(e) => {
                    if let Some(pool) = recv.pool.take() {
                        pool.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn take_recv(&mut self) -> Option<Pool> {
        match self {
            Self::Shared { .. } => None,
            Self::Owned { recv, .. } => recv.pool.take(),
        }
    }

    fn take_send(&mut self) -> Option<Pool> {
        match self {
            Self::Shared { .. } => None,
            Self::Owned { send, .. } => send.pool.take(),
        }
    }
}

/// Detaches and shuts down the owned pools, receive side first so its
/// remaining jobs can still queue responses. Shared pools are left to their
/// owner.
pub(crate) async fn shutdown_owned(pools: &RwLock<ServerPools>) {
    let recv = pools.write().take_recv();
    if let Some(pool) = recv {
        pool.shutdown().await;
    }
    let send = pools.write().take_send();
    if let Some(pool) = send {
        pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::{runtime::Handle, time};

    fn reason(options: &PoolOptions) -> String {
        match options.resolve("s") {
            Err(Error::InvalidPoolOptions { reason }) => reason,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("options unexpectedly accepted"),
        }
    }

    fn alive_tasks() -> usize {
        Handle::current().metrics().num_alive_tasks()
    }

    async fn wait_for_no_tasks() {
        time::timeout(Duration::from_secs(5), async {
            while alive_tasks() != 0 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("tasks did not exit in time");
    }

    #[tokio::test]
    async fn rejects_mixed_and_partial_options() {
        let recv = Pool::new("r", PoolConfig::fixed(0, 1)).unwrap();
        let send = Pool::new("w", PoolConfig::fixed(0, 1)).unwrap();

        let mut mixed = PoolOptions::shared(recv.clone(), send.clone());
        mixed.recv_min = Some(fixed(1));
        assert!(reason(&mixed).contains("mutually exclusive"));

        let half = PoolOptions {
            recv_pool: Some(recv.clone()),
            ..PoolOptions::default()
        };
        assert!(reason(&half).contains("pair"));

        let mut incomplete = PoolOptions::fixed(1, 2, 1, 2);
        incomplete.send_max = None;
        assert!(reason(&incomplete).contains("required"));
        assert!(reason(&PoolOptions::default()).contains("required"));

        recv.shutdown().await;
        send.shutdown().await;
    }

    #[tokio::test]
    async fn owned_pools_are_built_on_open() {
        let mut pools = PoolOptions::fixed(1, 2, 0, 1)
            .with_idle_timeout(Duration::from_secs(5))
            .resolve("edge")
            .unwrap();
        assert!(matches!(pools.recv(), Err(Error::PoolClosed { name }) if name == "edge-recv"));
        let idle = pools.recv_stats();
        assert_eq!((idle.name.as_str(), idle.current, idle.max), ("edge-recv", 0, 2));
        assert_eq!(alive_tasks(), 0);

        pools.open().unwrap();
        assert_eq!(pools.recv().unwrap().name(), "edge-recv");
        assert_eq!(pools.send().unwrap().name(), "edge-send");
        assert_eq!(pools.recv_stats().current, 1);

        let pools = RwLock::new(pools);
        let recv = pools.read().recv().unwrap();
        shutdown_owned(&pools).await;
        assert!(recv.is_closed());
        assert!(pools.read().send().is_err());
        wait_for_no_tasks().await;

        pools.write().open().unwrap();
        assert!(!pools.read().recv().unwrap().ptr_eq(&recv));
        shutdown_owned(&pools).await;
    }

    #[tokio::test]
    async fn invalid_bounds_spawn_no_workers() {
        let options = PoolOptions::fixed(2, 4, 3, 1);
        assert!(matches!(options.resolve("bad"), Err(Error::InvalidBounds { .. })));
        assert_eq!(alive_tasks(), 0);
    }

    #[tokio::test]
    async fn open_rolls_back_when_the_send_pool_fails() {
        let send_max = Arc::new(AtomicUsize::new(1));
        let max = Arc::clone(&send_max);
        let options = PoolOptions::sized(
            fixed(2),
            fixed(2),
            fixed(1),
            Arc::new(move || max.load(Ordering::Acquire)),
        );
        let mut pools = options.resolve("drift").unwrap();

        // The send bound becomes invalid between validation and `open`.
        send_max.store(0, Ordering::Release);
        assert!(matches!(pools.open(), Err(Error::InvalidBounds { .. })));
        assert!(pools.recv().is_err());
        wait_for_no_tasks().await;

        send_max.store(1, Ordering::Release);
        pools.open().unwrap();
        assert_eq!(pools.recv_stats().current, 2);
        shutdown_owned(&RwLock::new(pools)).await;
    }

    #[tokio::test]
    async fn shared_pools_survive_server_shutdown() {
        let recv = Pool::new("r", PoolConfig::fixed(0, 1)).unwrap();
        let send = Pool::new("w", PoolConfig::fixed(0, 1)).unwrap();
        let mut pools = PoolOptions::shared(recv.clone(), send.clone())
            .resolve("s")
            .unwrap();
        pools.open().unwrap();
        assert!(pools.recv().unwrap().ptr_eq(&recv));

        shutdown_owned(&RwLock::new(pools)).await;
        assert!(!recv.is_closed());
        recv.shutdown().await;
        send.shutdown().await;
    }
}
