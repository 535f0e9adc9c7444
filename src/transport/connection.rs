//! Connection endpoints and their owned halves.

use super::error::{TransportError, TransportResult};
use super::pipe::Pipe;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;
use uuid::Uuid;

/// Identifier shared by both endpoints of a connection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One endpoint of an in-memory byte stream.
///
/// Bytes written here become readable, in order, on the paired endpoint.
/// Dropping the endpoint closes it.
#[derive(Debug)]
pub struct Connection {
    read: ReadHalf,
    write: WriteHalf,
}

/// Build both endpoints of a fresh connection, each direction buffering `capacity` bytes.
pub(crate) fn pair(capacity: usize) -> (Connection, Connection) {
    let id = ConnectionId::new();
    let a_to_b = Arc::new(Pipe::new(capacity));
    let b_to_a = Arc::new(Pipe::new(capacity));

    let a = Connection::from_pipes(id, Arc::clone(&b_to_a), Arc::clone(&a_to_b));
    let b = Connection::from_pipes(id, a_to_b, b_to_a);
    (a, b)
}

impl Connection {
    fn from_pipes(id: ConnectionId, inbound: Arc<Pipe>, outbound: Arc<Pipe>) -> Self {
        Self {
            read: ReadHalf { id, inbound },
            write: WriteHalf { id, outbound },
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.read.id
    }

    /// Read at least one byte into `buf`.
    ///
    /// Suspends until data arrives. Returns `EndOfStream` once the peer has
    /// closed and everything it wrote has been consumed, or once this endpoint
    /// has itself been closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        self.read.read(buf).await
    }

    /// Write some prefix of `bytes`, suspending only while the buffer is full.
    pub async fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        self.write.write(bytes).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.write.write_all(bytes).await
    }

    /// Close both directions. Idempotent.
    ///
    /// Subsequent reads here see `EndOfStream`, writes fail with `ConnectionClosed`.
    /// The peer drains whatever was already written, then sees `EndOfStream`; its
    /// writes fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.close_handle().close();
    }

    /// Bytes written by the peer and not yet read here
    pub fn available(&self) -> usize {
        self.read.inbound.buffered()
    }

    pub fn is_closed(&self) -> bool {
        self.read.inbound.is_read_closed() && self.write.outbound.is_write_closed()
    }

    /// Handle that can close this connection from another task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            id: self.read.id,
            inbound: Arc::clone(&self.read.inbound),
            outbound: Arc::clone(&self.write.outbound),
        }
    }

    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        (self.read, self.write)
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.read).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.write).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.write).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.write).poll_shutdown(cx)
    }
}

/// Closes a connection from outside the task that owns it.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    id: ConnectionId,
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl CloseHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn close(&self) {
        debug!(connection_id = %self.id, "Closing in-process connection");
        self.outbound.close_write();
        self.inbound.close_read();
    }
}

/// Owned read half of a [`Connection`]. Dropping it stops reading.
#[derive(Debug)]
pub struct ReadHalf {
    id: ConnectionId,
    inbound: Arc<Pipe>,
}

impl ReadHalf {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let inbound = &self.inbound;
        poll_fn(|cx| inbound.poll_read(cx, buf)).await
    }
}

impl AsyncRead for ReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let dst = buf.initialize_unfilled();
        match self.inbound.poll_read(cx, dst) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(TransportError::EndOfStream)) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ReadHalf {
    fn drop(&mut self) {
        self.inbound.close_read();
    }
}

/// Owned write half of a [`Connection`]. Dropping it finishes the stream for the peer.
#[derive(Debug)]
pub struct WriteHalf {
    id: ConnectionId,
    outbound: Arc<Pipe>,
}

impl WriteHalf {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        let outbound = &self.outbound;
        poll_fn(|cx| outbound.poll_write(cx, bytes)).await
    }

    pub async fn write_all(&mut self, mut bytes: &[u8]) -> TransportResult<()> {
        while !bytes.is_empty() {
            let n = self.write(bytes).await?;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Half-close: the peer reads what is buffered, then `EndOfStream`.
    pub fn finish(&self) {
        self.outbound.close_write();
    }
}

impl AsyncWrite for WriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.outbound.poll_write(cx, buf).map_err(io::Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.finish();
        Poll::Ready(Ok(()))
    }
}

impl Drop for WriteHalf {
    fn drop(&mut self) {
        self.outbound.close_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pair_shares_identifier() {
        let (a, b) = pair(16);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.close_handle().id(), a.id());
    }

    #[tokio::test]
    async fn test_bytes_flow_in_both_directions() {
        let (mut a, mut b) = pair(16);

        a.write_all(b"hello").await.unwrap();
        b.write_all(b"world").await.unwrap();

        assert_eq!(b.available(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(b.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(a.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_observed_by_peer() {
        let (mut a, mut b) = pair(16);
        a.write_all(b"bye").await.unwrap();
        a.close();
        a.close();
        assert!(a.is_closed());

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).await.unwrap(), 3);
        assert_eq!(b.read(&mut buf).await, Err(TransportError::EndOfStream));
        assert_eq!(b.write(b"late").await, Err(TransportError::ConnectionClosed));

        assert_eq!(a.read(&mut buf).await, Err(TransportError::EndOfStream));
        assert_eq!(a.write(b"late").await, Err(TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_async_io_traits_apply_backpressure_and_map_end_of_stream() {
        let (mut a, mut b) = pair(8);

        let writer = tokio::spawn(async move {
            AsyncWriteExt::write_all(&mut a, b"0123456789abcdef").await?;
            drop(a);
            io::Result::Ok(())
        });

        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(out, b"0123456789abcdef");

        let err = AsyncWriteExt::write_all(&mut b, b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_shutdown_half_closes() {
        let (a, mut b) = pair(16);
        let (mut a_read, mut a_write) = a.into_split();

        a_write.write_all(b"done").await.unwrap();
        a_write.shutdown().await.unwrap();

        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"done");

        // The other direction is still open.
        b.write_all(b"ack").await.unwrap();
        let mut buf = [0u8; 3];
        a_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ack");
    }
}
