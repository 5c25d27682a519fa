//! Echo protocol pieces plugged into the `wharf` servers.
//!
//! - [`LineReader`] frames a byte stream into newline-terminated lines.
//! - [`LineEcho`] writes every line back to the connection it came from.
//! - [`PacketEcho`] sends every datagram back to its source.

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use std::io;
use tokio::io::AsyncBufReadExt;
use wharf::{BoxReader, DatagramHandler, DatagramRequest, StreamHandler, StreamReader, StreamRequest};

/// Reads one `\n`-terminated line per message, terminator included.
///
/// A final unterminated line is delivered before end of stream. A line longer
/// than `max_len` is an [`io::ErrorKind::InvalidData`] error, which makes the
/// server close the connection.
#[derive(Clone, Copy, Debug)]
pub struct LineReader {
    pub max_len: usize,
}

impl LineReader {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl StreamReader for LineReader {
    fn read<'a>(&'a self, reader: &'a mut BoxReader) -> BoxFuture<'a, io::Result<Option<Bytes>>> {
        Box::pin(async move {
            let mut line = BytesMut::new();
            loop {
                let chunk = reader.fill_buf().await?;
                if chunk.is_empty() {
                    return Ok(if line.is_empty() {
                        None
                    } else {
                        Some(line.freeze())
                    });
                }

                let (take, complete) = match chunk.iter().position(|&b| b == b'\n') {
                    Some(end) => (end + 1, true),
                    None => (chunk.len(), false),
                };
                if line.len() + take > self.max_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line exceeds {} bytes", self.max_len),
                    ));
                }
                line.extend_from_slice(&chunk[..take]);
                reader.consume(take);

                if complete {
                    return Ok(Some(line.freeze()));
                }
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LineEcho;

impl StreamHandler for LineEcho {
    fn process(&self, request: StreamRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let response = request.reply(request.payload.clone());
            if let Err(_e) = request.server.submit(response).await {
                #[cfg(feature = "tracing")]
                tracing::debug!("Dropped echo to {}: {_e}", request.peer);
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PacketEcho;

impl DatagramHandler for PacketEcho {
    fn process(&self, request: DatagramRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let response = request.reply(request.payload.clone());
            if let Err(_e) = request.server.submit(response).await {
                #[cfg(feature = "tracing")]
                tracing::debug!("Dropped echo to {}: {_e}", request.peer);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::sync::Arc;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, BufReader},
        net::{TcpStream, UdpSocket},
        time,
    };
    use wharf::{DatagramConfig, DatagramServer, NetType, PoolOptions, StreamConfig, StreamServer};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn boxed(input: &'static [u8], capacity: usize) -> BoxReader {
        Box::new(BufReader::with_capacity(capacity, input))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frames_lines_across_buffer_boundaries() {
        let reader = LineReader::new(64);
        // A tiny buffer forces lines to span several fills.
        let mut input = boxed(b"hello\nworld\ntail", 3);

        assert_eq!(reader.read(&mut input).await.unwrap().unwrap(), "hello\n");
        assert_eq!(reader.read(&mut input).await.unwrap().unwrap(), "world\n");
        assert_eq!(reader.read(&mut input).await.unwrap().unwrap(), "tail");
        assert!(reader.read(&mut input).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_overlong_lines() {
        let reader = LineReader::new(4);
        let mut input = boxed(b"ok\ntoo long\n", 16);

        assert_eq!(reader.read(&mut input).await.unwrap().unwrap(), "ok\n");
        let err = reader.read(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echoes_lines_over_tcp() {
        let config = StreamConfig::new(NetType::Tcp4, "127.0.0.1:0")
            .with_reader(Arc::new(LineReader::new(1024)))
            .with_handler(Arc::new(LineEcho))
            .with_pools(PoolOptions::fixed(1, 2, 1, 2));
        let server = StreamServer::new("echo", config).unwrap();
        server.start().await.unwrap();

        let mut client = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        client.write_all(b"one\ntwo\n").await.unwrap();
        let mut buf = [0_u8; 8];
        time::timeout(TIMEOUT, client.read_exact(&mut buf))
            .await
            .expect("echo in time")
            .unwrap();
        assert_eq!(&buf, b"one\ntwo\n");

        server.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echoes_packets_over_udp() {
        let config = DatagramConfig::new(NetType::Udp4, "127.0.0.1:0")
            .with_handler(Arc::new(PacketEcho))
            .with_pools(PoolOptions::fixed(1, 2, 1, 2));
        let server = DatagramServer::new("echo", config).unwrap();
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", addr).await.unwrap();
        let mut buf = [0_u8; 16];
        let (len, from) = time::timeout(TIMEOUT, client.recv_from(&mut buf))
            .await
            .expect("echo in time")
            .unwrap();
        assert_eq!(from, addr);
        assert_eq!(&buf[..len], b"ping");

        server.stop().await.unwrap();
    }
}
