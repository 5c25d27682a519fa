use super::{DatagramServer, StreamServer};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::time::Instant;

/// One inbound message, handed to the processing contract on a receive-pool
/// worker.
///
/// `server` is a handle to the server that read the message, so processing
/// logic can reply through [`StreamServer::submit`] or
/// [`DatagramServer::submit`] without capturing anything else.
#[derive(Clone, Debug)]
pub struct Request<S> {
    pub server: S,
    pub peer: SocketAddr,
    /// Whether `peer` is an IPv6 address. IPv4-mapped IPv6 addresses count
    /// as IPv4.
    pub ipv6: bool,
    pub received_at: Instant,
    pub payload: Bytes,
}

pub type StreamRequest = Request<StreamServer>;
pub type DatagramRequest = Request<DatagramServer>;

impl<S> Request<S> {
    pub(crate) fn new(server: S, peer: SocketAddr, payload: Bytes) -> Self {
        Self {
            server,
            peer,
            ipv6: is_ipv6(&peer),
            received_at: Instant::now(),
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// A response addressed back to the sender of this request.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Response {
        Response::new(self.peer, payload)
    }
}

/// One outbound message, consumed by exactly one write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub addr: SocketAddr,
    pub payload: Bytes,
}

impl Response {
    pub fn new(addr: SocketAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            addr,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

pub(crate) fn is_ipv6(addr: &SocketAddr) -> bool {
    match addr {
        SocketAddr::V4(_) => false,
        SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_mapped_addresses_as_v4() {
        assert!(!is_ipv6(&"10.0.0.1:53".parse().unwrap()));
        assert!(!is_ipv6(&"[::ffff:10.0.0.1]:53".parse().unwrap()));
        assert!(is_ipv6(&"[2001:db8::1]:53".parse().unwrap()));
    }

    #[test]
    fn replies_to_the_sender() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let request = Request::new((), peer, Bytes::from_static(b"ping"));
        assert_eq!(request.len(), 4);
        assert!(!request.ipv6);

        let response = request.reply("pong");
        assert_eq!(response.addr, peer);
        assert_eq!(response.payload, "pong");
    }
}
