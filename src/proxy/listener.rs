//! Accept-side L7 peek and L4 splice
//!
//! Every accepted connection gets its first request line peeked to learn the
//! topic. Locally-owned (or undecidable) connections are handed to the RTSP
//! server with the peeked bytes replayed; remote-owned connections are dialed
//! through to the owner and spliced byte-for-byte. Cross-node traffic is
//! therefore TCP-interleaved RTSP only; UDP never crosses the splice.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use crate::cluster::Cluster;
use crate::stats::RelayMetrics;

use super::buffered::BufferedStream;
use super::peek::topic_from_request_line;

/// Upper bound on peeked header bytes
const PEEK_LIMIT: usize = 8 * 1024;

/// Budget for reading the initial request
const PEEK_TIMEOUT: Duration = Duration::from_secs(2);

/// Answer sent when the owning node cannot be dialed
const UNAVAILABLE: &[u8] = b"RTSP/1.0 503 Service Unavailable\r\nServer: rtsper-proxy\r\n\r\n";

/// TCP listener that routes connections to the owning node
pub struct ProxyListener {
    listener: TcpListener,
    cluster: Option<Arc<Cluster>>,
    /// Port this direction (publish or subscribe) uses on every node
    target_port: u16,
    dial_timeout: Duration,
    idle_timeout: Duration,
    metrics: Arc<RelayMetrics>,
}

impl ProxyListener {
    pub fn new(
        listener: TcpListener,
        cluster: Option<Arc<Cluster>>,
        target_port: u16,
        dial_timeout: Duration,
        idle_timeout: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            listener,
            cluster,
            target_port,
            dial_timeout,
            idle_timeout,
            metrics,
        }
    }

    /// The bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the next locally-handled connection.
    ///
    /// Remote-owned connections are forwarded internally and never returned;
    /// the loop keeps accepting until a connection belongs to this node.
    pub async fn accept(&self) -> std::io::Result<(BufferedStream<TcpStream>, SocketAddr)> {
        loop {
            let (mut conn, peer) = self.listener.accept().await?;

            let peeked = peek_initial_bytes(&mut conn).await;
            let topic = topic_from_request_line(&peeked);

            let owner = match (&self.cluster, &topic) {
                (Some(cluster), Some(topic)) => cluster.owner(topic),
                _ => None,
            };

            let remote_owner = match owner {
                Some(owner)
                    if !self
                        .cluster
                        .as_ref()
                        .map(|c| c.is_self(&owner))
                        .unwrap_or(true) =>
                {
                    owner
                }
                // unowned, self-owned, or unparseable: hand off locally
                _ => {
                    return Ok((BufferedStream::new(conn, Bytes::from(peeked)), peer));
                }
            };

            let target = format!("{}:{}", remote_owner, self.target_port);
            match tokio::time::timeout(self.dial_timeout, TcpStream::connect(&target)).await {
                Ok(Ok(upstream)) => {
                    tracing::debug!(
                        peer = %peer,
                        owner = %remote_owner,
                        topic = topic.as_deref().unwrap_or(""),
                        "forwarding connection to owner"
                    );
                    self.metrics.inc_forwarded_connections();
                    let metrics = Arc::clone(&self.metrics);
                    let idle = self.idle_timeout;
                    tokio::spawn(async move {
                        splice(conn, upstream, peeked, idle, metrics).await;
                    });
                }
                _ => {
                    tracing::info!(peer = %peer, target = %target, "failed to dial owner");
                    self.metrics.inc_forward_failed();
                    let _ = conn.write_all(UNAVAILABLE).await;
                    // drop closes the client connection
                }
            }
        }
    }
}

/// Read the initial request bytes: up to the blank-line terminator, the size
/// cap, or the peek deadline, whichever comes first. Partial reads are fine;
/// routing falls back to local hand-off when the line cannot be parsed.
async fn peek_initial_bytes(conn: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + PEEK_TIMEOUT;

    while buf.len() < PEEK_LIMIT {
        match tokio::time::timeout_at(deadline, conn.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            // read error or deadline: work with what we have
            _ => break,
        }
    }
    buf
}

/// Splice both directions until either side closes, counting bytes
async fn splice(
    client: TcpStream,
    upstream: TcpStream,
    peeked: Vec<u8>,
    idle_timeout: Duration,
    metrics: Arc<RelayMetrics>,
) {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, mut upstream_write) = upstream.into_split();

    if !peeked.is_empty() {
        if upstream_write.write_all(&peeked).await.is_err() {
            return;
        }
        metrics.add_forwarded_bytes(peeked.len() as u64);
    }

    let m1 = Arc::clone(&metrics);
    let m2 = Arc::clone(&metrics);
    tokio::select! {
        _ = copy_counted(client_read, upstream_write, idle_timeout, m1) => {}
        _ = copy_counted(upstream_read, client_write, idle_timeout, m2) => {}
    }
    // dropping both futures drops all four halves, closing both sockets
}

/// One splice direction; ends on EOF, error, or idle timeout
async fn copy_counted(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    idle_timeout: Duration,
    metrics: Arc<RelayMetrics>,
) {
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = if idle_timeout.is_zero() {
            reader.read(&mut buf).await
        } else {
            match tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await {
                Ok(result) => result,
                Err(_) => return,
            }
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if writer.write_all(&buf[..n]).await.is_err() {
                    return;
                }
                metrics.add_forwarded_bytes(n as u64);
            }
        }
    }
}
