//! Relay daemon
//!
//! Wires the topic manager, cluster, UDP allocator, RTSP servers and admin
//! surface together from flags, environment and an optional JSON config
//! file, then runs until SIGINT/SIGTERM.
//!
//! ```bash
//! # single node
//! relayd --publish-port 9191 --subscribe-port 9192
//!
//! # three-node cluster (same values on every node)
//! CLUSTER_NODES=relay1,relay2,relay3 NODE_NAME=relay1 relayd
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rtsp_relay::admin::{self, AdminState};
use rtsp_relay::udp::validate_udp_config;
use rtsp_relay::{
    Cluster, FileConfig, RelayConfig, RelayMetrics, RtspServer, TopicManager, UdpAllocator,
};

#[derive(Debug, Parser)]
#[command(name = "relayd", about = "Clustered RTSP relay daemon")]
struct Args {
    /// RTSP publisher port
    #[arg(long, default_value_t = 9191)]
    publish_port: u16,

    /// RTSP subscriber port
    #[arg(long, default_value_t = 9192)]
    subscribe_port: u16,

    /// Admin HTTP port
    #[arg(long, default_value_t = 8080)]
    admin_port: u16,

    /// Max concurrent publishers
    #[arg(long, default_value_t = 5)]
    max_publishers: usize,

    /// Max subscribers per topic
    #[arg(long, default_value_t = 5)]
    max_subscribers_per_topic: usize,

    /// Per-topic inbound queue size
    #[arg(long, default_value_t = 1024)]
    publisher_queue_size: usize,

    /// Per-subscriber queue size
    #[arg(long, default_value_t = 256)]
    subscriber_queue_size: usize,

    /// Publisher grace period for reconnect, in seconds
    #[arg(long, default_value_t = 5)]
    publisher_grace_secs: u64,

    /// Enable UDP RTP/RTCP listeners
    #[arg(long)]
    enable_udp: bool,

    /// Publisher UDP base port (RTP; RTCP at base+1)
    #[arg(long, default_value_t = 0)]
    publisher_udp_base: u16,

    /// Subscriber UDP base port (RTP; RTCP at base+1)
    #[arg(long, default_value_t = 0)]
    subscriber_udp_base: u16,

    /// Start of the allocator-managed UDP port range (0 disables)
    #[arg(long, default_value_t = 0)]
    udp_port_start: u16,

    /// End of the allocator-managed UDP port range
    #[arg(long, default_value_t = 0)]
    udp_port_end: u16,

    /// Dial timeout when forwarding to the owning node, in milliseconds
    #[arg(long, default_value_t = 1000)]
    proxy_dial_timeout_ms: u64,

    /// Comma-separated cluster node names
    #[arg(long, env = "CLUSTER_NODES")]
    cluster_nodes: Option<String>,

    /// This node's name within the cluster
    #[arg(long, env = "NODE_NAME", default_value = "")]
    node_name: String,

    /// Path to a JSON config file (optional; file values win)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn build_config(&self) -> Result<RelayConfig> {
        let mut cfg = RelayConfig::default()
            .ports(self.publish_port, self.subscribe_port)
            .max_publishers(self.max_publishers)
            .max_subscribers_per_topic(self.max_subscribers_per_topic)
            .publisher_queue_size(self.publisher_queue_size)
            .subscriber_queue_size(self.subscriber_queue_size)
            .publisher_grace_period(Duration::from_secs(self.publisher_grace_secs))
            .proxy_dial_timeout(Duration::from_millis(self.proxy_dial_timeout_ms));
        cfg.enable_udp = self.enable_udp;
        cfg.publisher_udp_base = self.publisher_udp_base;
        cfg.subscriber_udp_base = self.subscriber_udp_base;
        cfg.udp_port_start = self.udp_port_start;
        cfg.udp_port_end = self.udp_port_end;

        if let Some(path) = &self.config {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let file: FileConfig = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            cfg = file.apply(cfg);
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = args.build_config()?;

    let metrics = Arc::new(RelayMetrics::new());

    let cluster = match &args.cluster_nodes {
        Some(nodes) if !nodes.is_empty() => {
            let cluster = Arc::new(
                Cluster::from_csv(nodes, &args.node_name).context("invalid cluster config")?,
            );
            info!(
                members = ?cluster.members(),
                self_name = cluster.self_name(),
                "cluster configured"
            );
            Some(cluster)
        }
        _ => None,
    };

    let allocator = if cfg.udp_port_start != 0 {
        let alloc = UdpAllocator::new(cfg.udp_port_start, cfg.udp_port_end, Arc::clone(&metrics))
            .context("failed to create UDP allocator")?;
        info!(
            start = alloc.start(),
            end = alloc.end(),
            "UDP allocator ready"
        );
        Some(alloc)
    } else {
        None
    };

    if cfg.enable_udp {
        validate_udp_config(&cfg).context("invalid UDP configuration")?;
    }

    let manager = TopicManager::new(cfg.clone(), Arc::clone(&metrics));

    let server = RtspServer::new(Arc::clone(&manager), cluster.clone(), allocator);
    server.start().await.context("failed to start RTSP servers")?;

    let cancel = CancellationToken::new();
    let admin_state = Arc::new(AdminState {
        manager: Arc::clone(&manager),
        cluster,
        metrics,
    });
    let admin_addr = format!("0.0.0.0:{}", args.admin_port)
        .parse()
        .expect("admin address");
    let admin_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_state, admin_addr, admin_cancel).await {
            error!(error = %e, "admin server error");
        }
    });

    wait_for_shutdown().await;
    info!("shutdown requested");

    cancel.cancel();
    server.close();
    manager.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
