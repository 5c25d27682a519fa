//! Connection-oriented server.
//!
//! [`StreamServer`] owns a listening socket and an accept loop. Every
//! accepted connection is bound through the caller's [`StreamBinder`],
//! registered by remote address, and served by a dedicated read task that
//! turns each message into a [`StreamRequest`](crate::StreamRequest) on the
//! receive pool. Responses travel the other way through the send pool.
//!
//! ## Lifecycle
//!
//! - `start` binds the listener, builds owned pools, and spawns the accept
//!   loop.
//! - `stop` closes the listener, ends every connection, waits for every
//!   read task, and shuts down owned pools.
//! - A stopped server can be started again. A server that is not running
//!   holds no tasks or workers of its own.
//!
//! A listener that fails with a non-transient error stops accepting and the
//! server reports `is_running() == false`. Existing connections keep being
//! served until `stop`, or until `start` is called to recover.

mod config;
mod contract;
mod peer;


pub use config::*;
pub use contract::*;

use super::{
    EXHAUSTION_BACKOFF, Request, Response, ServerStats, is_exhaustion, is_retryable,
    is_transient,
    net::NetType,
    pools::{ServerPools, shutdown_owned},
};
use crate::{
    Error, Pool, Result,
    event::{self, Notifier},
};
use bytes::Bytes;
use core::fmt;
use peer::{Peer, PeerRegistry};
use portable_atomic::{AtomicBool, Ordering};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A TCP server dispatching per-connection messages onto worker pools.
///
/// Cloning yields another handle to the same server; requests carry one so
/// processing logic can reply.
#[derive(Clone)]
pub struct StreamServer {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    net: NetType,
    addr: String,
    binder: Arc<dyn StreamBinder>,
    reader: Arc<dyn StreamReader>,
    handler: Arc<dyn StreamHandler>,
    pools: parking_lot::RwLock<ServerPools>,
    rate_limit: Option<RateLimitFn>,
    events: Notifier,
    ordered: bool,
    drop_connections: AtomicBool,
    peers: PeerRegistry,
    /// Guards `start`/`stop` against each other.
    running: tokio::sync::Mutex<Option<Running>>,
    /// Set while the listener is open.
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

struct Running {
    shutdown: CancellationToken,
    tasks: TaskTracker,
    accept: JoinHandle<()>,
}

impl StreamServer {
    /// Validates `config`. Nothing is spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Checked in this order:
    ///
    /// - [`Error::InvalidNetType`] if the transport is missing or not TCP.
    /// - [`Error::InvalidBinder`], [`Error::InvalidReader`],
    ///   [`Error::InvalidHandler`] for a missing contract.
    /// - [`Error::InvalidPoolOptions`] or [`Error::InvalidBounds`] for bad
    ///   pool options.
    pub fn new(name: impl Into<String>, config: StreamConfig) -> Result<Self> {
        let name = name.into();
        let net = NetType::expect_stream(config.net)?;
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
                pools: parking_lot::RwLock::new(pools),
                rate_limit: config.rate_limit,
                events: Notifier::new(config.on_event),
                ordered: config.ordered,
                drop_connections: AtomicBool::new(false),
                peers: PeerRegistry::default(),
                running: tokio::sync::Mutex::new(None),
                local_addr: parking_lot::Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Binds the listener and launches the accept loop. Returns once the
    /// socket is open.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if the server is running.
    /// - [`Error::InvalidAddr`] if the address does not resolve for the
    ///   configured transport.
    /// - [`Error::Io`] if the listener cannot be bound.
    /// - [`Error::InvalidBounds`] if a dynamic pool bound has become invalid
    ///   since `new`.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        if running.is_some() {
            if self.is_running() {
                return Err(Error::AlreadyStarted);
            }
            // The listener failed on its own; finish the old run first.
            if let Some(stale) = running.take() {
                self.teardown(stale).await;
            }
        }

        let addr = inner.net.resolve(&inner.addr).await?;
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        inner.pools.write().open()?;
        *inner.local_addr.lock() = Some(local);

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let accept = tokio::spawn(self.clone().accept_loop(
            listener,
            shutdown.clone(),
            tasks.clone(),
        ));
        *running = Some(Running {
            shutdown,
            tasks,
            accept,
        });

        #[cfg(feature = "tracing")]
        tracing::info!("Stream server {} listening on {local} ({})", inner.name, inner.net);
        inner
            .events
            .emit(event::START, || format!("{} listening on {local}", inner.name));
        Ok(())
    }

    /// Closes the listener and every connection, then waits for the accept
    /// loop and all read tasks to exit. Owned pools are drained and shut
    /// down; shared pools are left running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStopped`] if the server was never started or
    /// has already been stopped.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        let Some(current) = running.take() else {
            return Err(Error::AlreadyStopped);
        };
        self.teardown(current).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Stream server {} stopped", self.inner.name);
        self.inner
            .events
            .emit(event::STOP, || format!("{} stopped", self.inner.name));
        Ok(())
    }

    async fn teardown(&self, running: Running) {
        let inner = &self.inner;
        running.shutdown.cancel();
        if let Err(_e) = running.accept.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Accept loop of {} panicked: {_e}", inner.name);
        }

        for peer in inner.peers.snapshot() {
            peer.cancel.cancel();
        }
        running.tasks.close();
        running.tasks.wait().await;

        shutdown_owned(&inner.pools).await;
        inner.local_addr.lock().take();
    }

    /// Writes `response` to its peer right away, on the calling task.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerDisconnected`] if no connection is registered for
    ///   `response.addr`, or it closes while the write is pending.
    /// - [`Error::Io`] if the write contract fails.
    pub async fn send(&self, response: &Response) -> Result<()> {
        let inner = &self.inner;
        let disconnected = || Error::PeerDisconnected {
            addr: response.addr,
        };
        let peer = inner.peers.get(&response.addr).ok_or_else(disconnected)?;

        let written = tokio::select! {
            biased;
            () = peer.cancel.cancelled() => return Err(disconnected()),
            written = async {
                let mut writer = peer.writer.lock().await;
                inner.handler.write(&mut *writer, response).await
            } => written,
        };

        written.map_err(|e| {
            inner
                .events
                .emit(event::WRITE_ERROR, || format!("{}: {e}", response.addr));
            Error::Io(e)
        })
    }

    /// Queues `response` on the send pool. Waits only for send-pool
    /// capacity; write failures are reported through the event hook.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerDisconnected`] if the peer is unknown or goes away
    ///   while waiting for capacity.
    /// - [`Error::PoolClosed`] if the send pool has been shut down.
    pub async fn submit(&self, response: Response) -> Result<()> {
        let addr = response.addr;
        let peer = self
            .inner
            .peers
            .get(&addr)
            .ok_or(Error::PeerDisconnected { addr })?;

        let server = self.clone();
        let job = move |_: usize| async move {
            if let Err(_e) = server.send(&response).await {
                #[cfg(feature = "tracing")]
                tracing::debug!("{}: dropped response to {}: {_e}", server.inner.name, response.addr);
            }
        };

        match self.send_pool()?.submit_until(job, &peer.cancel).await {
            Err(Error::Cancelled) => Err(Error::PeerDisconnected { addr }),
            other => other,
        }
    }

    /// While `true`, every newly accepted connection is closed immediately
    /// without being registered. Existing connections are unaffected.
    pub fn drop_connections(&self, enabled: bool) {
        self.inner.drop_connections.store(enabled, Ordering::Release);
    }

    /// Closes one connection. Its read task deregisters it shortly after.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerDisconnected`] if no such connection exists.
    pub fn disconnect(&self, addr: SocketAddr) -> Result<()> {
        let peer = self
            .inner
            .peers
            .get(&addr)
            .ok_or(Error::PeerDisconnected { addr })?;
        peer.cancel.cancel();
        Ok(())
    }

    /// The bound listener address, while the listener is open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.local_addr.lock().is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    /// Remote addresses of all registered connections, sorted.
    pub fn peers(&self) -> Vec<SocketAddr> {
        let mut addrs = self.inner.peers.addrs();
        addrs.sort_unstable();
        addrs
    }

    pub fn stats(&self) -> ServerStats {
        let pools = self.inner.pools.read();
        ServerStats {
            peers: self.inner.peers.len(),
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

    async fn accept_loop(self, listener: TcpListener, shutdown: CancellationToken, tasks: TaskTracker) {
        let inner = &self.inner;
        let mut last_accepted: Option<Instant> = None;

        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(conn) => conn,
                Err(e) if is_transient(&e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("{}: transient accept error: {e}", inner.name);
                    inner.events.emit(event::ACCEPT_ERROR, || e.to_string());
                    if is_exhaustion(&e) {
                        time::sleep(EXHAUSTION_BACKOFF).await;
                    }
                    continue;
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("{}: listener failed, no longer accepting: {e}", inner.name);
                    inner.events.emit(event::ACCEPT_ERROR, || e.to_string());
                    inner.local_addr.lock().take();
                    break;
                }
            };

            if inner.drop_connections.load(Ordering::Acquire) {
                #[cfg(feature = "tracing")]
                tracing::debug!("{}: dropping connection from {addr}", inner.name);
                inner.events.emit(event::DROP, || addr.to_string());
                continue;
            }

            if let Some(limit) = &inner.rate_limit {
                let now = Instant::now();
                if last_accepted.is_some_and(|last| now.duration_since(last) < limit()) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("{}: rate limited connection from {addr}", inner.name);
                    inner.events.emit(event::REJECT, || addr.to_string());
                    continue;
                }
                last_accepted = Some(now);
            }

            self.connect(stream, addr, &tasks);
        }
    }

    /// Binds, registers, and spawns the read task for one connection.
    fn connect(&self, stream: TcpStream, addr: SocketAddr, tasks: &TaskTracker) {
        let inner = &self.inner;
        let (reader, writer) = match inner.binder.bind(stream, addr) {
            Ok(pair) => pair,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("{}: failed to bind connection from {addr}: {e}", inner.name);
                inner
                    .events
                    .emit(event::BIND_ERROR, || format!("{addr}: {e}"));
                return;
            }
        };

        let peer = Arc::new(Peer::new(addr, writer, CancellationToken::new()));
        if !inner.peers.register(Arc::clone(&peer)) {
            #[cfg(feature = "tracing")]
            tracing::error!("{}: {addr} is already registered, closing the newcomer", inner.name);
            inner.events.emit(event::DUPLICATE, || addr.to_string());
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("{}: accepted {addr}", inner.name);
        inner.events.emit(event::ACCEPT, || addr.to_string());
        tasks.spawn(self.clone().read_loop(peer, reader));
    }

    async fn read_loop(self, peer: Arc<Peer>, mut reader: BoxReader) {
        let inner = &self.inner;

        loop {
            let read = tokio::select! {
                biased;
                () = peer.cancel.cancelled() => break,
                read = inner.reader.read(&mut reader) => read,
            };

            match read {
                Ok(Some(payload)) => {
                    if !self.dispatch(&peer, payload).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) if is_retryable(&e) => {}
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("{}: read from {} failed: {e}", inner.name, peer.addr);
                    inner
                        .events
                        .emit(event::READ_ERROR, || format!("{}: {e}", peer.addr));
                    break;
                }
            }
        }

        // Aborts sends still waiting on this peer.
        peer.cancel.cancel();
        if !inner.peers.deregister(&peer) {
            #[cfg(feature = "tracing")]
            tracing::warn!("{}: {} was not registered at disconnect", inner.name, peer.addr);
        }

        if let Err(_e) = peer.writer.lock().await.shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::trace!("{}: closing {} failed: {_e}", inner.name, peer.addr);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("{}: disconnected {}", inner.name, peer.addr);
        inner.events.emit(event::DISCONNECT, || peer.addr.to_string());
    }

    /// Hands one message to the receive pool. Returns `false` once the
    /// connection should stop reading.
    async fn dispatch(&self, peer: &Peer, payload: Bytes) -> bool {
        let request = Request::new(self.clone(), peer.addr, payload);
        let handler = Arc::clone(&self.inner.handler);
        let pool = match self.recv_pool() {
            Ok(pool) => pool,
            Err(e) => return self.submitted(Err(e)),
        };

        if !self.inner.ordered {
            let job = move |_: usize| async move { handler.process(request).await };
            return self.submitted(pool.submit_until(job, &peer.cancel).await);
        }

        let (done, finished) = oneshot::channel::<()>();
        let job = move |_: usize| async move {
            handler.process(request).await;
            let _ = done.send(());
        };
        if !self.submitted(pool.submit_until(job, &peer.cancel).await) {
            return false;
        }

        // A panicking job drops `done`, which still counts as finished.
        tokio::select! {
            biased;
            () = peer.cancel.cancelled() => false,
            _ = finished => true,
        }
    }

    fn submitted(&self, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(Error::Cancelled) => false,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("{}: cannot dispatch request: {_e}", self.inner.name);
                false
            }
        }
    }
}

impl fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamServer")
            .field("name", &self.inner.name)
            .field("net", &self.inner.net)
            .field("addr", &self.inner.addr)
            .field("local_addr", &self.local_addr())
            .field("peers", &self.peer_count())
            .finish()
    }
}
