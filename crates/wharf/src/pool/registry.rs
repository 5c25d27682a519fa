use super::{Pool, PoolConfig, Stats};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A named collection of pools owned by the application's composition root.
///
/// Servers that should share capacity are handed pools from the same
/// registry; the registry is then responsible for shutting them down once the
/// servers have stopped.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<String, Pool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool registered under `name`, creating it from `config`
    /// if absent. `config` is ignored when the pool already exists.
    ///
    /// # Errors
    ///
    /// Propagates [`Pool::new`] errors when the pool has to be created.
    pub fn get_or_create(&self, name: &str, config: PoolConfig) -> Result<Pool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }
        let pool = Pool::new(name, config)?;
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    /// Registers `pool` under its own name, returning any pool it replaced.
    pub fn insert(&self, pool: Pool) -> Option<Pool> {
        self.pools.lock().insert(pool.name().to_string(), pool)
    }

    pub fn get(&self, name: &str) -> Option<Pool> {
        self.pools.lock().get(name).cloned()
    }

    /// Removes the pool from the registry without shutting it down.
    pub fn remove(&self, name: &str) -> Option<Pool> {
        self.pools.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pools.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Stats for every registered pool, ordered by name.
    pub fn stats(&self) -> Vec<Stats> {
        let pools: Vec<_> = self.pools.lock().values().cloned().collect();
        let mut stats: Vec<_> = pools.iter().map(Pool::stats).collect();
        stats.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Empties the registry and shuts every pool down concurrently.
    pub async fn shutdown_all(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        futures::future::join_all(pools.iter().map(Pool::shutdown)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shares_pools_by_name() {
        let registry = PoolRegistry::new();
        let a = registry.get_or_create("recv", PoolConfig::fixed(1, 2)).unwrap();
        let b = registry.get_or_create("recv", PoolConfig::fixed(3, 9)).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(b.stats().max, 2);

        registry.get_or_create("send", PoolConfig::fixed(0, 1)).unwrap();
        assert_eq!(registry.names(), ["recv", "send"]);

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "recv");
        assert_eq!(stats[0].current, 1);

        let removed = registry.remove("send").unwrap();
        assert!(registry.get("send").is_none());
        removed.shutdown().await;

        registry.shutdown_all().await;
        assert!(a.is_closed());
        assert!(registry.names().is_empty());
    }

    #[tokio::test]
    async fn creation_errors_leave_registry_untouched() {
        let registry = PoolRegistry::new();
        assert!(registry.get_or_create("bad", PoolConfig::fixed(4, 1)).is_err());
        assert!(registry.get("bad").is_none());
    }
}
