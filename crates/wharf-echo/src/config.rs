use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use wharf::NetType;

/// Runtime configuration for the `wharf-echo` binary.
///
/// Values come from CLI arguments or environment variables (a `.env` file is
/// loaded first). Both servers run by default; either can be switched off.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wharf-echo",
    version,
    about = "Line-echo TCP and packet-echo UDP servers"
)]
pub struct CliArgs {
    /// Address the line-echo stream server listens on.
    ///
    /// Environment variable: `STREAM_ADDR`
    #[arg(long, env = "STREAM_ADDR", default_value_t = String::from("0.0.0.0:7000"))]
    pub stream_addr: String,

    /// Stream transport: `tcp`, `tcp4` or `tcp6`.
    ///
    /// Environment variable: `STREAM_NET`
    #[arg(long, env = "STREAM_NET", default_value_t = String::from("tcp"))]
    pub stream_net: String,

    /// Address the packet-echo datagram server binds.
    ///
    /// Environment variable: `DATAGRAM_ADDR`
    #[arg(long, env = "DATAGRAM_ADDR", default_value_t = String::from("0.0.0.0:7001"))]
    pub datagram_addr: String,

    /// Datagram transport: `udp`, `udp4` or `udp6`.
    ///
    /// Environment variable: `DATAGRAM_NET`
    #[arg(long, env = "DATAGRAM_NET", default_value_t = String::from("udp"))]
    pub datagram_net: String,

    /// Do not run the stream server.
    #[arg(long, env = "DISABLE_STREAM", default_value_t = false)]
    pub disable_stream: bool,

    /// Do not run the datagram server.
    #[arg(long, env = "DISABLE_DATAGRAM", default_value_t = false)]
    pub disable_datagram: bool,

    /// Workers kept alive in each receive pool, even when idle.
    ///
    /// Environment variable: `RECV_MIN_WORKERS`
    #[arg(long, env = "RECV_MIN_WORKERS", default_value_t = 1)]
    pub recv_min_workers: usize,

    /// Upper bound on receive workers. Defaults to the number of CPUs.
    ///
    /// Environment variable: `RECV_MAX_WORKERS`
    #[arg(long, env = "RECV_MAX_WORKERS")]
    pub recv_max_workers: Option<usize>,

    /// Workers kept alive in each send pool, even when idle.
    ///
    /// Environment variable: `SEND_MIN_WORKERS`
    #[arg(long, env = "SEND_MIN_WORKERS", default_value_t = 1)]
    pub send_min_workers: usize,

    /// Upper bound on send workers. Defaults to the number of CPUs.
    ///
    /// Environment variable: `SEND_MAX_WORKERS`
    #[arg(long, env = "SEND_MAX_WORKERS")]
    pub send_max_workers: Option<usize>,

    /// Seconds a worker above the minimum may sit idle before it retires.
    ///
    /// Environment variable: `IDLE_TIMEOUT_SECS`
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Minimum milliseconds between accepted stream connections. `0`
    /// disables rate limiting.
    ///
    /// Environment variable: `ACCEPT_INTERVAL_MS`
    #[arg(long, env = "ACCEPT_INTERVAL_MS", default_value_t = 0)]
    pub accept_interval_ms: u64,

    /// Seconds between pool statistics reports. `0` disables reporting.
    ///
    /// Environment variable: `STATS_INTERVAL_SECS`
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value_t = 30)]
    pub stats_interval_secs: u64,

    /// Run both servers on one pair of registry-owned pools instead of a
    /// pair per server.
    ///
    /// Environment variable: `SHARED_POOLS`
    #[arg(long, env = "SHARED_POOLS", default_value_t = false)]
    pub shared_pools: bool,

    /// Longest line, newline included, the stream server accepts before it
    /// drops the connection.
    ///
    /// Environment variable: `MAX_LINE_LENGTH`
    #[arg(long, env = "MAX_LINE_LENGTH", default_value_t = 64 * 1024)]
    pub max_line_length: usize,
}

/// A transport and the address to serve it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub net: NetType,
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub stream: Option<Endpoint>,
    pub datagram: Option<Endpoint>,
    pub recv_workers: WorkerBounds,
    pub send_workers: WorkerBounds,
    pub idle_timeout: Duration,
    pub accept_interval: Option<Duration>,
    pub stats_interval: Option<Duration>,
    pub shared_pools: bool,
    pub max_line_length: usize,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.disable_stream && args.disable_datagram {
            bail!("DISABLE_STREAM and DISABLE_DATAGRAM leave nothing to serve");
        }

        let stream = if args.disable_stream {
            None
        } else {
            let net: NetType = args.stream_net.parse().context("invalid STREAM_NET")?;
            if !net.is_stream() {
                bail!("STREAM_NET must be a stream transport, got `{net}`");
            }
            Some(Endpoint {
                net,
                addr: args.stream_addr,
            })
        };

        let datagram = if args.disable_datagram {
            None
        } else {
            let net: NetType = args.datagram_net.parse().context("invalid DATAGRAM_NET")?;
            if !net.is_datagram() {
                bail!("DATAGRAM_NET must be a datagram transport, got `{net}`");
            }
            Some(Endpoint {
                net,
                addr: args.datagram_addr,
            })
        };

        let recv_workers = bounds(
            "RECV",
            args.recv_min_workers,
            args.recv_max_workers.unwrap_or_else(num_cpus::get),
        )?;
        let send_workers = bounds(
            "SEND",
            args.send_min_workers,
            args.send_max_workers.unwrap_or_else(num_cpus::get),
        )?;

        if args.idle_timeout_secs == 0 {
            bail!("IDLE_TIMEOUT_SECS must be greater than 0");
        }

        if args.max_line_length == 0 {
            bail!("MAX_LINE_LENGTH must be greater than 0");
        }

        Ok(Self {
            stream,
            datagram,
            recv_workers,
            send_workers,
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            accept_interval: (args.accept_interval_ms > 0)
                .then(|| Duration::from_millis(args.accept_interval_ms)),
            stats_interval: (args.stats_interval_secs > 0)
                .then(|| Duration::from_secs(args.stats_interval_secs)),
            shared_pools: args.shared_pools,
            max_line_length: args.max_line_length,
        })
    }
}

fn bounds(prefix: &str, min: usize, max: usize) -> anyhow::Result<WorkerBounds> {
    if max == 0 {
        bail!("{prefix}_MAX_WORKERS must be greater than 0");
    }
    if min > max {
        bail!("{prefix}_MIN_WORKERS ({min}) exceeds {prefix}_MAX_WORKERS ({max})");
    }
    Ok(WorkerBounds { min, max })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("wharf-echo").chain(extra.iter().copied()))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_run_both_servers() {
        let config = parse(&[
            "--stream-addr",
            "127.0.0.1:7000",
            "--recv-max-workers",
            "4",
            "--send-max-workers",
            "2",
        ])
        .unwrap();

        assert_eq!(
            config.stream,
            Some(Endpoint {
                net: NetType::Tcp,
                addr: "127.0.0.1:7000".to_string(),
            })
        );
        assert_eq!(config.datagram.map(|d| d.net), Some(NetType::Udp));
        assert_eq!(config.recv_workers, WorkerBounds { min: 1, max: 4 });
        assert_eq!(config.send_workers, WorkerBounds { min: 1, max: 2 });
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.accept_interval, None);
    }

    #[test]
    fn max_workers_default_to_cpu_count() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.recv_workers.max, num_cpus::get());
        assert_eq!(config.send_workers.max, num_cpus::get());
    }

    #[test]
    fn rejects_wrong_transport_family() {
        assert!(parse(&["--stream-net", "udp"]).is_err());
        assert!(parse(&["--datagram-net", "tcp6"]).is_err());
        assert!(parse(&["--stream-net", "sctp"]).is_err());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = parse(&["--recv-min-workers", "5", "--recv-max-workers", "2"]).unwrap_err();
        assert!(err.to_string().contains("RECV_MIN_WORKERS"));
        assert!(parse(&["--send-max-workers", "0"]).is_err());
    }

    #[test]
    fn rejects_disabling_everything() {
        assert!(parse(&["--disable-stream", "--disable-datagram"]).is_err());

        let config = parse(&["--disable-stream", "--accept-interval-ms", "250"]).unwrap();
        assert!(config.stream.is_none());
        assert_eq!(config.accept_interval, Some(Duration::from_millis(250)));
    }
}
