use crate::{Error, Result};
use core::{fmt, str::FromStr};
use std::net::SocketAddr;

/// Transport family a server listens on.
///
/// The unsuffixed variants accept either IP version; the `4`/`6` variants
/// restrict address resolution to that version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetType {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl NetType {
    pub fn is_stream(self) -> bool {
        matches!(self, Self::Tcp | Self::Tcp4 | Self::Tcp6)
    }

    pub fn is_datagram(self) -> bool {
        !self.is_stream()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
            Self::Udp => "udp",
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
        }
    }

    /// Whether `addr` belongs to this transport's IP version.
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Tcp | Self::Udp => true,
            Self::Tcp4 | Self::Udp4 => addr.is_ipv4(),
            Self::Tcp6 | Self::Udp6 => addr.is_ipv6(),
        }
    }

    /// Resolves `addr` (`host:port` or `[v6]:port`) to the first socket
    /// address of the right IP version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddr`] if the lookup fails or yields no
    /// address of the right version.
    pub async fn resolve(self, addr: &str) -> Result<SocketAddr> {
        let invalid = |reason: String| Error::InvalidAddr {
            addr: addr.to_string(),
            reason,
        };

        let mut candidates = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| invalid(e.to_string()))?;

        candidates
            .find(|candidate| self.accepts(candidate))
            .ok_or_else(|| invalid(format!("no {} address", self.as_str())))
    }

    /// Fails with [`Error::InvalidNetType`] unless this is a stream type.
    pub(crate) fn expect_stream(net: Option<Self>) -> Result<Self> {
        match net {
            Some(net) if net.is_stream() => Ok(net),
            Some(net) => Err(Error::InvalidNetType {
                reason: format!("{net} is not a stream transport"),
            }),
            None => Err(Error::InvalidNetType {
                reason: "missing".to_string(),
            }),
        }
    }

    /// Fails with [`Error::InvalidNetType`] unless this is a datagram type.
    pub(crate) fn expect_datagram(net: Option<Self>) -> Result<Self> {
        match net {
            Some(net) if net.is_datagram() => Ok(net),
            Some(net) => Err(Error::InvalidNetType {
                reason: format!("{net} is not a datagram transport"),
            }),
            None => Err(Error::InvalidNetType {
                reason: "missing".to_string(),
            }),
        }
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            "udp" => Ok(Self::Udp),
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            other => Err(Error::InvalidNetType {
                reason: format!("unknown transport {other:?}"),
            }),
        }
    }
}
