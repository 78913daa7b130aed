//! Connection wrapper that replays peeked bytes
//!
//! The proxy listener consumes the initial request bytes while deciding where
//! a connection belongs. When the connection is handled locally, the RTSP
//! server still needs those bytes, so reads are served from the peek buffer
//! first and fall through to the socket once it is drained.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream adapter replaying a prefix before delegating to the inner stream
pub struct BufferedStream<S> {
    inner: S,
    prefix: Bytes,
}

impl<S> BufferedStream<S> {
    /// Wrap a stream with bytes already read from it
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { inner, prefix }
    }

    /// Bytes still pending replay
    pub fn pending(&self) -> usize {
        self.prefix.len()
    }

    /// The wrapped stream
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for BufferedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for BufferedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_replays_prefix_then_inner() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b" world").await.unwrap();

        let mut stream = BufferedStream::new(client, Bytes::from_static(b"hello"));
        assert_eq!(stream.pending(), 5);

        let mut out = vec![0u8; 11];
        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello world");
        assert_eq!(stream.pending(), 0);
    }

    #[tokio::test]
    async fn test_partial_reads_from_prefix() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = BufferedStream::new(client, Bytes::from_static(b"abcd"));

        let mut out = [0u8; 2];
        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"ab");
        assert_eq!(stream.pending(), 2);

        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"cd");
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = BufferedStream::new(client, Bytes::from_static(b"unused"));

        stream.write_all(b"ping").await.unwrap();
        let mut out = [0u8; 4];
        server.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"ping");
    }

    #[tokio::test]
    async fn test_empty_prefix_is_transparent() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"data").await.unwrap();

        let mut stream = BufferedStream::new(client, Bytes::new());
        let mut out = [0u8; 4];
        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"data");
    }
}
