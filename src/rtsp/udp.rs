//! Local-node UDP RTP transport
//!
//! UDP never crosses the cluster splice, so these sockets only serve topics
//! this node owns. One transport exists per direction: the publisher side
//! demultiplexes inbound RTP by source address, the subscriber side sends
//! queued packets to each subscriber's negotiated client port.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::topic::SubscriberSession;
use crate::udp::UdpAllocator;

use super::router::RelayRouter;

/// Shared UDP RTP socket plus the source registry for ingest
pub(crate) struct UdpTransport {
    base_port: u16,
    rtp_socket: Arc<UdpSocket>,
    /// RTP source address → (session id, track)
    sources: Mutex<HashMap<SocketAddr, (u64, usize)>>,
}

impl UdpTransport {
    /// Bind the RTP socket at `base`, reusing an allocator-held socket when
    /// the base falls inside the managed range.
    pub(crate) async fn bind(
        base: u16,
        allocator: Option<&UdpAllocator>,
    ) -> io::Result<Arc<Self>> {
        let rtp_socket = match allocator.and_then(|a| a.get_conn(base)) {
            Some(pre_bound) => {
                let cloned = pre_bound.try_clone()?;
                cloned.set_nonblocking(true)?;
                Arc::new(UdpSocket::from_std(cloned)?)
            }
            None => Arc::new(UdpSocket::bind(("0.0.0.0", base)).await?),
        };

        Ok(Arc::new(Self {
            base_port: base,
            rtp_socket,
            sources: Mutex::new(HashMap::new()),
        }))
    }

    pub(crate) fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Remember which session/track RTP from this address belongs to
    pub(crate) fn register_source(&self, addr: SocketAddr, session_id: u64, track: usize) {
        let mut sources = self.sources.lock().expect("udp transport lock poisoned");
        sources.insert(addr, (session_id, track));
    }

    /// Drop every source registration for a session
    pub(crate) fn unregister_session(&self, session_id: u64) {
        let mut sources = self.sources.lock().expect("udp transport lock poisoned");
        sources.retain(|_, (sid, _)| *sid != session_id);
    }

    fn lookup(&self, addr: &SocketAddr) -> Option<(u64, usize)> {
        self.sources
            .lock()
            .expect("udp transport lock poisoned")
            .get(addr)
            .copied()
    }

    /// Read RTP datagrams and feed them to the router until cancelled.
    ///
    /// Datagrams from unknown sources are dropped; a SETUP must have
    /// registered the sender first.
    pub(crate) fn spawn_ingest(
        self: &Arc<Self>,
        router: Arc<RelayRouter>,
        cancel: CancellationToken,
    ) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = transport.rtp_socket.recv_from(&mut buf) => r,
                };
                let (len, from) = match received {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "udp ingest read failed");
                        break;
                    }
                };
                let Some((session_id, track)) = transport.lookup(&from) else {
                    continue;
                };
                let payload = Bytes::copy_from_slice(&buf[..len]);
                router.on_packet_rtp(session_id, track, payload).await;
            }
            tracing::debug!(port = transport.base_port, "udp ingest exited");
        });
    }

    /// Drain a subscriber's queue to its negotiated RTP address.
    ///
    /// Ends when the queue closes (unregister or topic close) or the
    /// connection is cancelled.
    pub(crate) fn spawn_egress(
        self: &Arc<Self>,
        subscriber: Arc<SubscriberSession>,
        client: SocketAddr,
        cancel: CancellationToken,
    ) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let packet = tokio::select! {
                    _ = cancel.cancelled() => break,
                    p = subscriber.queue().recv() => p,
                };
                let Some(packet) = packet else { break };
                if let Err(e) = transport.rtp_socket.send_to(&packet.raw, client).await {
                    tracing::debug!(client = %client, error = %e, "udp egress send failed");
                    break;
                }
            }
            tracing::debug!(client = %client, "udp egress exited");
        });
    }
}
