//! RTSP server front-end
//!
//! Runs one proxy-wrapped listener per direction (publish and subscribe),
//! assigns session ids, and spawns a connection driver per accepted
//! connection. With UDP enabled it also binds the per-direction RTP sockets,
//! preferring allocator-held sockets so SETUP answers match what is already
//! bound.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::proxy::ProxyListener;
use crate::topic::{RelayConfig, TopicManager};
use crate::udp::UdpAllocator;

use super::conn::{handle_connection, ConnShared, Direction};
use super::router::RelayRouter;
use super::udp::UdpTransport;

/// The relay's RTSP front-end for both directions
pub struct RtspServer {
    cfg: RelayConfig,
    router: Arc<RelayRouter>,
    cluster: Option<Arc<Cluster>>,
    allocator: Option<UdpAllocator>,
    cancel: CancellationToken,
    next_session_id: AtomicU64,
    bound: Mutex<Option<(SocketAddr, SocketAddr)>>,
}

impl RtspServer {
    /// Build a server over an existing manager.
    ///
    /// The cluster is optional (single-node deployments) and the allocator is
    /// only consulted when UDP is enabled.
    pub fn new(
        manager: Arc<TopicManager>,
        cluster: Option<Arc<Cluster>>,
        allocator: Option<UdpAllocator>,
    ) -> Arc<Self> {
        let cfg = manager.config().clone();
        let router = RelayRouter::new(manager, cluster.clone());
        Arc::new(Self {
            cfg,
            router,
            cluster,
            allocator,
            cancel: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
            bound: Mutex::new(None),
        })
    }

    pub fn router(&self) -> &Arc<RelayRouter> {
        &self.router
    }

    /// Bind both listeners and start accepting. Returns once listening.
    pub async fn start(self: &Arc<Self>) -> crate::error::Result<()> {
        let (publish_udp, subscribe_udp) = if self.cfg.enable_udp {
            let publish =
                UdpTransport::bind(self.cfg.publisher_udp_base, self.allocator.as_ref()).await?;
            publish.spawn_ingest(Arc::clone(&self.router), self.cancel.clone());
            let subscribe =
                UdpTransport::bind(self.cfg.subscriber_udp_base, self.allocator.as_ref()).await?;
            (Some(publish), Some(subscribe))
        } else {
            (None, None)
        };

        let publish_listener = TcpListener::bind(("0.0.0.0", self.cfg.publish_port)).await?;
        let subscribe_listener = TcpListener::bind(("0.0.0.0", self.cfg.subscribe_port)).await?;
        let publish_addr = publish_listener.local_addr()?;
        let subscribe_addr = subscribe_listener.local_addr()?;
        *self.bound.lock().expect("server lock poisoned") = Some((publish_addr, subscribe_addr));

        let metrics = Arc::clone(self.router.manager().metrics());
        let publish_proxy = ProxyListener::new(
            publish_listener,
            self.cluster.clone(),
            self.cfg.publish_port,
            self.cfg.proxy_dial_timeout,
            self.cfg.proxy_idle_timeout,
            Arc::clone(&metrics),
        );
        let subscribe_proxy = ProxyListener::new(
            subscribe_listener,
            self.cluster.clone(),
            self.cfg.subscribe_port,
            self.cfg.proxy_dial_timeout,
            self.cfg.proxy_idle_timeout,
            metrics,
        );

        let publish_shared = Arc::new(ConnShared {
            router: Arc::clone(&self.router),
            cfg: self.cfg.clone(),
            direction: Direction::Publish,
            udp: publish_udp,
        });
        let subscribe_shared = Arc::new(ConnShared {
            router: Arc::clone(&self.router),
            cfg: self.cfg.clone(),
            direction: Direction::Subscribe,
            udp: subscribe_udp,
        });

        tracing::info!(addr = %publish_addr, "RTSP server listening (publishers)");
        tracing::info!(addr = %subscribe_addr, "RTSP server listening (subscribers)");

        tokio::spawn(accept_loop(Arc::clone(self), publish_proxy, publish_shared));
        tokio::spawn(accept_loop(Arc::clone(self), subscribe_proxy, subscribe_shared));
        Ok(())
    }

    /// Bound publisher-side address, once started
    pub fn publish_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().expect("server lock poisoned").map(|(p, _)| p)
    }

    /// Bound subscriber-side address, once started
    pub fn subscribe_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().expect("server lock poisoned").map(|(_, s)| s)
    }

    /// Stop accepting and cancel every connection driver
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(server: Arc<RtspServer>, proxy: ProxyListener, shared: Arc<ConnShared>) {
    loop {
        let accepted = tokio::select! {
            _ = server.cancel.cancelled() => break,
            accepted = proxy.accept() => accepted,
        };
        match accepted {
            Ok((conn, peer)) => {
                let session_id = server.next_session_id.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(handle_connection(
                    conn,
                    peer,
                    session_id,
                    Arc::clone(&shared),
                    server.cancel.clone(),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to accept connection");
                break;
            }
        }
    }
}
