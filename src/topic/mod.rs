//! Topic lifecycle and packet fan-out
//!
//! A topic is a named channel with at most one publisher and many
//! subscribers. The manager is the single admission point and enforces the
//! global publisher cap, the per-topic subscriber cap, and the reconnect
//! grace window.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<TopicManager>
//!                  ┌────────────────────────┐
//!                  │ topics: HashMap<Name,  │
//!                  │   Arc<Topic> {         │
//!                  │     inbound: queue,    │
//!                  │     subscribers,       │
//!                  │   }                    │
//!                  │ >                      │
//!                  └───────────┬────────────┘
//!                              │ publish_packet
//!                              ▼
//!                      [inbound queue]
//!                              │ dispatcher task
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!        [sub queue]     [sub queue]     [sub queue]
//! ```
//!
//! Every queue is bounded with drop-oldest admission: a slow subscriber only
//! ever loses its own packets, and the publisher never blocks.

pub mod config;
pub mod error;
pub mod manager;
pub mod packet;
pub mod session;
mod topic;

pub use config::{FileConfig, RelayConfig};
pub use error::TopicError;
pub use manager::{ManagerStatus, TopicManager, TopicStatus};
pub use packet::InboundPacket;
pub use session::{Enqueue, PacketQueue, PublisherSession, SubscriberSession};
pub use topic::Topic;
