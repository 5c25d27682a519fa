//! Capability contracts a datagram server is assembled from.
//!
//! Unlike streams there is one socket for every peer, so the binder runs once
//! per `start` and produces a shared receive half and send half.

use crate::server::{DatagramRequest, Response};
use bytes::Bytes;
use core::fmt;
use futures::future::BoxFuture;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, sync::Mutex};

/// Receive side of a bound socket.
pub trait PacketRecv: Send + Sync {
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>>;
}

/// Send side of a bound socket.
pub trait PacketSend: Send + Sync {
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> BoxFuture<'a, io::Result<usize>>;
}

impl PacketRecv for UdpSocket {
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
        Box::pin(UdpSocket::recv_from(self, buf))
    }
}

impl PacketSend for UdpSocket {
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(UdpSocket::send_to(self, buf, target))
    }
}

pub trait DatagramBinder: Send + Sync {
    fn bind(&self, socket: Arc<UdpSocket>) -> io::Result<(Arc<dyn PacketRecv>, Arc<dyn PacketSend>)>;
}

pub trait DatagramReader: Send + Sync {
    /// Reads the next packet and its source address.
    fn read<'a>(&'a self, socket: &'a dyn PacketRecv) -> BoxFuture<'a, io::Result<(SocketAddr, Bytes)>>;
}

pub trait DatagramHandler: Send + Sync {
    /// Handles one packet. Replies go through
    /// [`DatagramServer::submit`](super::DatagramServer::submit) or
    /// [`DatagramServer::send`](super::DatagramServer::send).
    fn process(&self, request: DatagramRequest) -> BoxFuture<'_, ()>;

    /// Writes one response. The default sends the payload as a single
    /// datagram to `response.addr`.
    fn write<'a>(
        &'a self,
        socket: &'a dyn PacketSend,
        response: &'a Response,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let sent = socket.send_to(&response.payload, response.addr).await?;
            if sent < response.payload.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sent {sent} of {} bytes", response.payload.len()),
                ));
            }
            Ok(())
        })
    }
}

/// Uses the socket itself for both halves.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketBinder;

impl DatagramBinder for SocketBinder {
    fn bind(&self, socket: Arc<UdpSocket>) -> io::Result<(Arc<dyn PacketRecv>, Arc<dyn PacketSend>)> {
        Ok((Arc::clone(&socket) as Arc<dyn PacketRecv>, socket))
    }
}

/// Reads one datagram of at most `max_size` bytes. Longer datagrams are
/// truncated by the OS.
///
/// Packets land in one receive buffer owned by the reader and are copied
/// out at their received length.
pub struct PacketReader {
    pub max_size: usize,
    buf: Mutex<Vec<u8>>,
}

impl PacketReader {
    pub const MAX_DATAGRAM: usize = 65_535;

    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buf: Mutex::new(Vec::new()),
        }
    }
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new(Self::MAX_DATAGRAM)
    }
}

impl fmt::Debug for PacketReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketReader")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl DatagramReader for PacketReader {
    fn read<'a>(&'a self, socket: &'a dyn PacketRecv) -> BoxFuture<'a, io::Result<(SocketAddr, Bytes)>> {
        Box::pin(async move {
            let mut buf = self.buf.lock().await;
            if buf.len() != self.max_size {
                buf.resize(self.max_size, 0);
            }
            let (len, from) = socket.recv_from(&mut buf).await?;
            Ok((from, Bytes::copy_from_slice(&buf[..len])))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays queued packets and records the buffer size each read offers.
    struct Replay {
        packets: parking_lot::Mutex<VecDeque<Vec<u8>>>,
        offered: parking_lot::Mutex<Vec<usize>>,
        from: SocketAddr,
    }

    impl Replay {
        fn new(packets: &[&[u8]]) -> Self {
            Self {
                packets: parking_lot::Mutex::new(packets.iter().map(|p| p.to_vec()).collect()),
                offered: parking_lot::Mutex::new(Vec::new()),
                from: SocketAddr::from(([127, 0, 0, 1], 9000)),
            }
        }
    }

    impl PacketRecv for Replay {
        fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
            Box::pin(async move {
                self.offered.lock().push(buf.len());
                let packet = self
                    .packets
                    .lock()
                    .pop_front()
                    .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok((len, self.from))
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn copies_packets_out_of_a_reused_buffer() {
        let reader = PacketReader::default();
        let socket = Replay::new(&[b"x", b"longer payload", b"y"]);

        let (from, first) = reader.read(&socket).await.unwrap();
        assert_eq!(from, socket.from);
        assert_eq!(first, "x");
        assert_eq!(reader.read(&socket).await.unwrap().1, "longer payload");
        // A short packet after a long one carries no stale bytes.
        let (_, last) = reader.read(&socket).await.unwrap();
        assert_eq!(last, "y");
        assert_eq!(last.len(), 1);

        // Payloads own their bytes rather than slicing the receive buffer.
        assert_ne!(first.as_ptr(), last.as_ptr());
        assert_eq!(
            *socket.offered.lock(),
            vec![PacketReader::MAX_DATAGRAM; 3]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn truncates_to_max_size() {
        let reader = PacketReader::new(4);
        let socket = Replay::new(&[b"abcdefgh"]);

        assert_eq!(reader.read(&socket).await.unwrap().1, "abcd");
        assert!(reader.read(&socket).await.is_err());
    }
}
