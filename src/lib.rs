//! Clustered RTSP relay
//!
//! Ingests live media from one publisher per named topic and fans it out to
//! many subscribers, across a statically configured set of peer nodes.
//! Publishers and subscribers may connect to any node; connections are
//! transparently routed to the topic's owner, chosen by rendezvous hashing
//! over the node names.
//!
//! # Architecture
//!
//! ```text
//!   publisher ──TCP──► ProxyListener ──peek──► owner?
//!                          │  local                │ remote
//!                          ▼                       ▼
//!                     RtspServer ◄──────── L4 splice to owner
//!                          │
//!                     RelayRouter ──► TopicManager ──► Topic
//!                          │                             │ dispatcher
//!                     ServerStream ──► subscribers   sub queues
//! ```
//!
//! The relay does not inspect media: RTP payloads are opaque byte sequences.
//! Cross-node routing requires TCP-interleaved transport; UDP RTP/RTCP is
//! terminated on the owning node only.

pub mod admin;
pub mod cluster;
pub mod error;
pub mod proxy;
pub mod rtsp;
pub mod stats;
pub mod topic;
pub mod udp;

pub use cluster::{Cluster, ClusterError, ClusterStatus};
pub use error::{Error, Result};
pub use proxy::{BufferedStream, ProxyListener};
pub use rtsp::{RelayRouter, RtspServer, ServerStream};
pub use stats::{MetricsSnapshot, RelayMetrics};
pub use topic::{
    FileConfig, InboundPacket, ManagerStatus, PublisherSession, RelayConfig, SubscriberSession,
    TopicError, TopicManager, TopicStatus,
};
pub use udp::{AllocError, UdpAllocator};
