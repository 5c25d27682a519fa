//! Protocol-agnostic stream (TCP) and datagram (UDP) servers running their
//! work on adaptive Tokio worker pools.
//!
//! A server knows nothing about the bytes it moves. Callers plug in small
//! capability traits to wrap a transport, frame messages, process requests
//! and write responses; the server owns the listening socket, the peer
//! registry, and the handoff between its receive and send pools.
//!
//! ```no_run
//! use futures::future::BoxFuture;
//! use std::sync::Arc;
//! use wharf::{NetType, PoolOptions, StreamConfig, StreamHandler, StreamRequest, StreamServer};
//!
//! struct Echo;
//!
//! impl StreamHandler for Echo {
//!     fn process(&self, request: StreamRequest) -> BoxFuture<'_, ()> {
//!         Box::pin(async move {
//!             let response = request.reply(request.payload.clone());
//!             let _ = request.server.submit(response).await;
//!         })
//!     }
//! }
//!
//! # async fn run() -> wharf::Result<()> {
//! let config = StreamConfig::new(NetType::Tcp, "127.0.0.1:7000")
//!     .with_handler(Arc::new(Echo))
//!     .with_pools(PoolOptions::fixed(1, 8, 1, 8));
//! let server = StreamServer::new("echo", config)?;
//! server.start().await?;
//! // ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod event;
pub mod pool;
mod server;

pub use crate::error::*;
pub use crate::pool::{DEFAULT_IDLE_TIMEOUT, Job, Pool, PoolConfig, PoolRegistry, SizeFn, Stats};
pub use crate::server::*;
