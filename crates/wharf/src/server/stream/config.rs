use super::{ChunkReader, SplitBinder, StreamBinder, StreamHandler, StreamReader};
use crate::{event::EventFn, server::NetType, server::PoolOptions};
use core::{fmt, time::Duration};
use std::sync::Arc;

/// Minimum spacing between accepted connections, re-queried on every accept.
pub type RateLimitFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Construction parameters for a [`StreamServer`](super::StreamServer).
///
/// [`StreamConfig::new`] installs [`SplitBinder`] and [`ChunkReader`]; the
/// handler and pools are always the caller's to supply.
#[derive(Clone)]
pub struct StreamConfig {
    pub net: Option<NetType>,
    pub addr: String,
    pub binder: Option<Arc<dyn StreamBinder>>,
    pub reader: Option<Arc<dyn StreamReader>>,
    pub handler: Option<Arc<dyn StreamHandler>>,
    pub pools: PoolOptions,
    pub rate_limit: Option<RateLimitFn>,
    pub on_event: Option<EventFn>,
    /// Wait for each request's processing to finish before reading the next
    /// message on the same connection. Guarantees per-connection FIFO
    /// processing regardless of pool size.
    pub ordered: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            net: None,
            addr: String::new(),
            binder: None,
            reader: None,
            handler: None,
            pools: PoolOptions::default(),
            rate_limit: None,
            on_event: None,
            ordered: true,
        }
    }
}

impl StreamConfig {
    pub fn new(net: NetType, addr: impl Into<String>) -> Self {
        Self {
            net: Some(net),
            addr: addr.into(),
            binder: Some(Arc::new(SplitBinder::default())),
            reader: Some(Arc::new(ChunkReader)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_binder(mut self, binder: Arc<dyn StreamBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn StreamReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_pools(mut self, pools: PoolOptions) -> Self {
        self.pools = pools;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitFn) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Constant rate limit.
    #[must_use]
    pub fn with_accept_interval(self, interval: Duration) -> Self {
        self.with_rate_limit(Arc::new(move || interval))
    }

    #[must_use]
    pub fn with_event_fn(mut self, on_event: EventFn) -> Self {
        self.on_event = Some(on_event);
        self
    }

    #[must_use]
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("net", &self.net)
            .field("addr", &self.addr)
            .field("binder", &self.binder.is_some())
            .field("reader", &self.reader.is_some())
            .field("handler", &self.handler.is_some())
            .field("pools", &self.pools)
            .field("rate_limit", &self.rate_limit.as_ref().map(|limit| limit()))
            .field("on_event", &self.on_event.is_some())
            .field("ordered", &self.ordered)
            .finish()
    }
}
