use super::{DatagramBinder, DatagramHandler, DatagramReader, PacketReader, SocketBinder};
use crate::{event::EventFn, server::NetType, server::PoolOptions};
use core::fmt;
use std::sync::Arc;

/// Construction parameters for a [`DatagramServer`](super::DatagramServer).
///
/// [`DatagramConfig::new`] installs [`SocketBinder`] and [`PacketReader`].
#[derive(Clone, Default)]
pub struct DatagramConfig {
    pub net: Option<NetType>,
    pub addr: String,
    pub binder: Option<Arc<dyn DatagramBinder>>,
    pub reader: Option<Arc<dyn DatagramReader>>,
    pub handler: Option<Arc<dyn DatagramHandler>>,
    pub pools: PoolOptions,
    pub on_event: Option<EventFn>,
}

impl DatagramConfig {
    pub fn new(net: NetType, addr: impl Into<String>) -> Self {
        Self {
            net: Some(net),
            addr: addr.into(),
            binder: Some(Arc::new(SocketBinder)),
            reader: Some(Arc::new(PacketReader::default())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_binder(mut self, binder: Arc<dyn DatagramBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn DatagramReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn DatagramHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_pools(mut self, pools: PoolOptions) -> Self {
        self.pools = pools;
        self
    }

    #[must_use]
    pub fn with_event_fn(mut self, on_event: EventFn) -> Self {
        self.on_event = Some(on_event);
        self
    }
}

impl fmt::Debug for DatagramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramConfig")
            .field("net", &self.net)
            .field("addr", &self.addr)
            .field("binder", &self.binder.is_some())
            .field("reader", &self.reader.is_some())
            .field("handler", &self.handler.is_some())
            .field("pools", &self.pools)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}
