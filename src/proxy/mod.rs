//! Cluster-aware connection routing
//!
//! An L4 splice conditioned on an L7 peek: the listener reads just enough of
//! each new connection to learn the topic, asks the cluster who owns it, and
//! either hands the connection to the local RTSP server (replaying the peeked
//! bytes) or splices it through to the owning node. No RTSP parsing happens
//! here beyond the first request line.

pub mod buffered;
pub mod listener;
pub mod peek;

pub use buffered::BufferedStream;
pub use listener::ProxyListener;
pub use peek::{is_valid_topic_name, topic_from_request_line};
