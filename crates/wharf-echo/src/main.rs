#![doc = include_str!("../README.md")]

mod config;
mod echo;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, ServerConfig, WorkerBounds};
use core::time::Duration;
use echo::{LineEcho, LineReader, PacketEcho};
use std::sync::Arc;
use telemetry::{event_fn, init_telemetry, record_pool_stats};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use wharf::{
    DatagramConfig, DatagramServer, PoolConfig, PoolOptions, PoolRegistry, ServerStats,
    StreamConfig, StreamServer,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const STREAM: &str = "stream";
const DATAGRAM: &str = "datagram";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let registry = PoolRegistry::new();
    let servers = Servers::build(&config, &registry)?;
    servers.start().await?;
    log_startup_info(&servers, &config);

    let shutdown = CancellationToken::new();
    let reporter = config
        .stats_interval
        .map(|interval| tokio::spawn(report_stats(servers.clone(), interval, shutdown.clone())));

    let result = shutdown_signal().await;

    // 1. Stop reporting
    shutdown.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    // 2. Stop listening and drain each server's pools
    servers.stop().await;

    // 3. Drain the pools the servers shared
    registry.shutdown_all().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    providers.shutdown();
    result
}

/// The servers this process runs. Either may be disabled.
#[derive(Clone)]
struct Servers {
    stream: Option<StreamServer>,
    datagram: Option<DatagramServer>,
}

impl Servers {
    fn build(config: &ServerConfig, registry: &PoolRegistry) -> anyhow::Result<Self> {
        let stream = config
            .stream
            .as_ref()
            .map(|endpoint| {
                let mut stream_config = StreamConfig::new(endpoint.net, endpoint.addr.clone())
                    .with_reader(Arc::new(LineReader::new(config.max_line_length)))
                    .with_handler(Arc::new(LineEcho))
                    .with_pools(pool_options(config, registry)?)
                    .with_event_fn(event_fn(STREAM));
                if let Some(interval) = config.accept_interval {
                    stream_config = stream_config.with_accept_interval(interval);
                }
                StreamServer::new(STREAM, stream_config).context("invalid stream server config")
            })
            .transpose()?;

        let datagram = config
            .datagram
            .as_ref()
            .map(|endpoint| {
                let datagram_config = DatagramConfig::new(endpoint.net, endpoint.addr.clone())
                    .with_handler(Arc::new(PacketEcho))
                    .with_pools(pool_options(config, registry)?)
                    .with_event_fn(event_fn(DATAGRAM));
                DatagramServer::new(DATAGRAM, datagram_config)
                    .context("invalid datagram server config")
            })
            .transpose()?;

        Ok(Self { stream, datagram })
    }

    async fn start(&self) -> anyhow::Result<()> {
        if let Some(stream) = &self.stream {
            stream.start().await.context("failed to start stream server")?;
        }
        if let Some(datagram) = &self.datagram {
            if let Err(e) = datagram.start().await {
                self.stop().await;
                return Err(e).context("failed to start datagram server");
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        let (_stream, _datagram) = tokio::join!(
            async {
                if let Some(stream) = &self.stream {
                    stream.stop().await?;
                }
                Ok::<(), wharf::Error>(())
            },
            async {
                if let Some(datagram) = &self.datagram {
                    datagram.stop().await?;
                }
                Ok::<(), wharf::Error>(())
            },
        );

        #[cfg(feature = "tracing")]
        for (name, result) in [(STREAM, _stream), (DATAGRAM, _datagram)] {
            if let Err(e) = result {
                tracing::warn!("Error stopping {name} server: {e}");
            }
        }
    }

    fn stats(&self) -> Vec<(&'static str, ServerStats)> {
        let stream = self.stream.as_ref().map(|s| (STREAM, s.stats()));
        let datagram = self.datagram.as_ref().map(|d| (DATAGRAM, d.stats()));
        stream.into_iter().chain(datagram).collect()
    }
}

/// Registry-owned pools when sharing, otherwise sizing for a private pair.
fn pool_options(config: &ServerConfig, registry: &PoolRegistry) -> anyhow::Result<PoolOptions> {
    let WorkerBounds {
        min: recv_min,
        max: recv_max,
    } = config.recv_workers;
    let WorkerBounds {
        min: send_min,
        max: send_max,
    } = config.send_workers;

    if !config.shared_pools {
        return Ok(PoolOptions::fixed(recv_min, recv_max, send_min, send_max)
            .with_idle_timeout(config.idle_timeout));
    }

    let recv = registry.get_or_create(
        "shared-recv",
        PoolConfig::fixed(recv_min, recv_max).with_idle_timeout(config.idle_timeout),
    )?;
    let send = registry.get_or_create(
        "shared-send",
        PoolConfig::fixed(send_min, send_max).with_idle_timeout(config.idle_timeout),
    )?;
    Ok(PoolOptions::shared(recv, send))
}

fn log_startup_info(_servers: &Servers, _config: &ServerConfig) {
    #[cfg(feature = "tracing")]
    {
        if let Some(addr) = _servers.stream.as_ref().and_then(StreamServer::local_addr) {
            tracing::info!("Line echo listening on {addr}");
        }
        if let Some(addr) = _servers.datagram.as_ref().and_then(DatagramServer::local_addr) {
            tracing::info!("Packet echo bound to {addr}");
        }

        if cfg!(debug_assertions) {
            tracing::info!("Full config: {:#?}", _config);
        } else {
            tracing::info!(
                "Receive workers {}..={}, send workers {}..={}, shared pools: {}",
                _config.recv_workers.min,
                _config.recv_workers.max,
                _config.send_workers.min,
                _config.send_workers.max,
                _config.shared_pools
            );
        }
    }
}

/// Logs and records pool statistics every `interval` until `shutdown`.
async fn report_stats(servers: Servers, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Shared pools show up under both servers; report each once.
        let mut reported = Vec::new();
        for (_server, stats) in servers.stats() {
            #[cfg(feature = "tracing")]
            tracing::info!("{_server} server: {} peers", stats.peers);

            for pool in [stats.recv, stats.send] {
                if reported.contains(&pool.name) {
                    continue;
                }
                #[cfg(feature = "tracing")]
                tracing::info!(
                    "{} pool: {} workers ({} active, {} idle, peak {}), {} pending, {} processed, {} panicked",
                    pool.name,
                    pool.current,
                    pool.active,
                    pool.idle,
                    pool.high_water,
                    pool.pending,
                    pool.processed,
                    pool.panicked
                );
                record_pool_stats(&pool);
                reported.push(pool.name);
            }
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install signal handler")?
            .recv()
            .await;
        anyhow::Ok(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")
    };

    tokio::select! {
        res = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
            res?;
        },
        res = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
            res?;
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
    Ok(())
}
