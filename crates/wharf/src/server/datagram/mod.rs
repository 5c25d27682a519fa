//! Packet-oriented server.
//!
//! [`DatagramServer`] binds one UDP socket shared by every peer. A single
//! read loop turns each packet into a
//! [`DatagramRequest`](crate::DatagramRequest) on the receive pool; responses
//! are written through the shared send half on the send pool.
//!
//! There are no connections, so there is no peer registry, rate limiting or
//! drop-connections mode. A non-transient socket error closes the socket and
//! ends the read loop; `start` recovers by binding a fresh socket.

mod config;
mod contract;


pub use config::*;
pub use contract::*;

use super::{
    Request, Response, ServerStats, is_transient,
    net::NetType,
    pools::{ServerPools, shutdown_owned},
};
use crate::{
    Error, Pool, Result,
    event::{self, Notifier},
};
use core::fmt;
use parking_lot::RwLock;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A UDP server dispatching packets onto worker pools.
#[derive(Clone)]
pub struct DatagramServer {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    net: NetType,
    addr: String,
    binder: Arc<dyn DatagramBinder>,
    reader: Arc<dyn DatagramReader>,
    handler: Arc<dyn DatagramHandler>,
    pools: RwLock<ServerPools>,
    events: Notifier,
    /// Send half of the open socket. Cleared on stop and on socket failure.
    writer: RwLock<Option<Arc<dyn PacketSend>>>,
    running: tokio::sync::Mutex<Option<Running>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

struct Running {
    shutdown: CancellationToken,
    read_loop: JoinHandle<()>,
}

impl DatagramServer {
    /// Validates `config`, in the same order as
    /// [`StreamServer::new`](crate::StreamServer::new). Nothing is spawned
    /// until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidNetType`], [`Error::InvalidBinder`],
    /// [`Error::InvalidReader`], [`Error::InvalidHandler`],
    /// [`Error::InvalidPoolOptions`] or [`Error::InvalidBounds`].
    pub fn new(name: impl Into<String>, config: DatagramConfig) -> Result<Self> {
        let name = name.into();
        let net = NetType::expect_datagram(config.net)?;
        let binder = config.binder.ok_or(Error::InvalidBinder)?;
        let reader = config.reader.ok_or(Error::InvalidReader)?;
        let handler = config.handler.ok_or(Error::InvalidHandler)?;
        let pools = config.pools.resolve(&name)?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                net,
                addr: config.addr,
                binder,
                reader,
                handler,
                pools: RwLock::new(pools),
                events: Notifier::new(config.on_event),
                writer: RwLock::new(None),
                running: tokio::sync::Mutex::new(None),
                local_addr: parking_lot::Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Binds the socket, runs the bind contract once, and launches the read
    /// loop.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if the socket is open.
    /// - [`Error::InvalidAddr`] if the address does not resolve for the
    ///   configured transport.
    /// - [`Error::Io`] if the socket cannot be bound or the bind contract
    ///   fails.
    /// - [`Error::InvalidBounds`] if a dynamic pool bound has become invalid
    ///   since `new`.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        if running.is_some() {
            if self.is_running() {
                return Err(Error::AlreadyStarted);
            }
            if let Some(stale) = running.take() {
                self.teardown(stale).await;
            }
        }

        let addr = inner.net.resolve(&inner.addr).await?;
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        let (recv, send) = inner.binder.bind(socket).map_err(|e| {
            inner
                .events
                .emit(event::BIND_ERROR, || format!("{local}: {e}"));
            Error::Io(e)
        })?;
        inner.pools.write().open()?;

        *inner.writer.write() = Some(send);
        *inner.local_addr.lock() = Some(local);

        let shutdown = CancellationToken::new();
        let read_loop = tokio::spawn(self.clone().read_loop(recv, shutdown.clone()));
        *running = Some(Running {
            shutdown,
            read_loop,
        });

        #[cfg(feature = "tracing")]
        tracing::info!("Datagram server {} bound to {local} ({})", inner.name, inner.net);
        inner
            .events
            .emit(event::START, || format!("{} bound to {local}", inner.name));
        Ok(())
    }

    /// Closes the socket, waits for the read loop, and shuts down owned
    /// pools after they drain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStopped`] if the server is not started.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        let Some(current) = running.take() else {
            return Err(Error::AlreadyStopped);
        };
        self.teardown(current).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Datagram server {} stopped", self.inner.name);
        self.inner
            .events
            .emit(event::STOP, || format!("{} stopped", self.inner.name));
        Ok(())
    }

    async fn teardown(&self, running: Running) {
        let inner = &self.inner;
        running.shutdown.cancel();
        inner.writer.write().take();
        if let Err(_e) = running.read_loop.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Read loop of {} panicked: {_e}", inner.name);
        }

        shutdown_owned(&inner.pools).await;
        inner.local_addr.lock().take();
    }

    /// Writes `response` right away, on the calling task.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the socket is not open.
    /// - [`Error::Io`] if the write contract fails.
    pub async fn send(&self, response: &Response) -> Result<()> {
        let inner = &self.inner;
        let writer = inner.writer.read().clone().ok_or(Error::NotRunning)?;
        inner
            .handler
            .write(writer.as_ref(), response)
            .await
            .map_err(|e| {
                inner
                    .events
                    .emit(event::WRITE_ERROR, || format!("{}: {e}", response.addr));
                Error::Io(e)
            })
    }

    /// Queues `response` on the send pool. Write failures are reported
    /// through the event hook.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the socket is not open.
    /// - [`Error::PoolClosed`] if the send pool has been shut down.
    pub async fn submit(&self, response: Response) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let server = self.clone();
        self.send_pool()?
            .submit(move |_: usize| async move {
                if let Err(_e) = server.send(&response).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("{}: dropped response to {}: {_e}", server.inner.name, response.addr);
                }
            })
            .await
    }

    /// The bound socket address, while the socket is open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.local_addr.lock().is_some()
    }

    pub fn stats(&self) -> ServerStats {
        let pools = self.inner.pools.read();
        ServerStats {
            peers: 0,
            recv: pools.recv_stats(),
            send: pools.send_stats(),
        }
    }

    fn recv_pool(&self) -> Result<Pool> {
        self.inner.pools.read().recv()
    }

    fn send_pool(&self) -> Result<Pool> {
        self.inner.pools.read().send()
    }

    async fn read_loop(self, socket: Arc<dyn PacketRecv>, shutdown: CancellationToken) {
        let inner = &self.inner;

        loop {
            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                read = inner.reader.read(socket.as_ref()) => read,
            };

            match read {
                Ok((peer, payload)) => {
                    let request = Request::new(self.clone(), peer, payload);
                    let handler = Arc::clone(&inner.handler);
                    let job = move |_: usize| async move { handler.process(request).await };
                    let submitted = match self.recv_pool() {
                        Ok(pool) => pool.submit_until(job, &shutdown).await,
                        Err(e) => Err(e),
                    };
                    match submitted {
                        Ok(()) => {}
                        Err(Error::Cancelled) => break,
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!("{}: cannot dispatch packet: {_e}", inner.name);
                            self.fault();
                            break;
                        }
                    }
                }
                Err(_) if shutdown.is_cancelled() => break,
                Err(e) if is_transient(&e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("{}: transient read error: {e}", inner.name);
                    inner.events.emit(event::READ_ERROR, || e.to_string());
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("{}: socket failed, closing it: {e}", inner.name);
                    inner.events.emit(event::READ_ERROR, || e.to_string());
                    self.fault();
                    break;
                }
            }
        }
    }

    /// Drops the socket after a fatal error so the next `start` binds anew.
    fn fault(&self) {
        self.inner.writer.write().take();
        self.inner.local_addr.lock().take();
    }
}

impl fmt::Debug for DatagramServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramServer")
            .field("name", &self.inner.name)
            .field("net", &self.inner.net)
            .field("addr", &self.inner.addr)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
