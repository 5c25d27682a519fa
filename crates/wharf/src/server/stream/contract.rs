//! Capability contracts a stream server is assembled from.
//!
//! A connection passes through three caller-supplied roles:
//!
//! 1. [`StreamBinder`] wraps the accepted [`TcpStream`] in a reader and a
//!    writer (this is where TLS or compression would be layered in).
//! 2. [`StreamReader`] pulls one discrete message at a time off the reader.
//! 3. [`StreamHandler`] processes each request on a receive-pool worker and
//!    writes each response on a send-pool worker.

use crate::server::{Response, StreamRequest};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::{io, net::SocketAddr};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};

pub type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub trait StreamBinder: Send + Sync {
    fn bind(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<(BoxReader, BoxWriter)>;
}

pub trait StreamReader: Send + Sync {
    /// Reads the next message. `Ok(None)` is a clean end of stream.
    fn read<'a>(&'a self, reader: &'a mut BoxReader) -> BoxFuture<'a, io::Result<Option<Bytes>>>;
}

pub trait StreamHandler: Send + Sync {
    /// Handles one request. Replies, if any, go through
    /// [`StreamServer::submit`](super::StreamServer::submit) or
    /// [`StreamServer::send`](super::StreamServer::send).
    fn process(&self, request: StreamRequest) -> BoxFuture<'_, ()>;

    /// Writes one response to its peer. The default writes the payload as is
    /// and flushes.
    fn write<'a>(
        &'a self,
        writer: &'a mut BoxWriter,
        response: &'a Response,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            writer.write_all(&response.payload).await?;
            writer.flush().await
        })
    }
}

/// Splits the socket into owned halves with a buffered read side.
#[derive(Clone, Copy, Debug)]
pub struct SplitBinder {
    pub capacity: usize,
    pub nodelay: bool,
}

impl Default for SplitBinder {
    fn default() -> Self {
        Self {
            capacity: ChunkReader::DEFAULT_BUF_SIZE,
            nodelay: true,
        }
    }
}

impl StreamBinder for SplitBinder {
    fn bind(&self, stream: TcpStream, _peer: SocketAddr) -> io::Result<(BoxReader, BoxWriter)> {
        stream.set_nodelay(self.nodelay)?;
        let (read, write) = stream.into_split();
        Ok((
            Box::new(BufReader::with_capacity(self.capacity, read)),
            Box::new(write),
        ))
    }
}

/// Treats whatever bytes are buffered as one message. Suits protocols where
/// framing is the handler's business.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkReader;

impl ChunkReader {
    pub const DEFAULT_BUF_SIZE: usize = 4096;
}

impl StreamReader for ChunkReader {
    fn read<'a>(&'a self, reader: &'a mut BoxReader) -> BoxFuture<'a, io::Result<Option<Bytes>>> {
        Box::pin(async move {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            let message = Bytes::copy_from_slice(chunk);
            reader.consume(message.len());
            Ok(Some(message))
        })
    }
}
