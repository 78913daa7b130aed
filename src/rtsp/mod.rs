//! RTSP front-end: session routing, connection driving, wire fan-out
//!
//! The pieces that sit between the proxy listeners and the topic manager:
//!
//! - [`RelayRouter`] binds sessions to topics and drives admission,
//! - the connection driver parses RTSP off each accepted socket and answers
//!   per the router's verdicts,
//! - [`ServerStream`] fans RTP out to attached subscriber connections,
//! - [`RtspServer`] owns the listeners and spawns everything.

pub mod conn;
pub mod router;
pub mod server;
pub mod stream;
pub(crate) mod udp;

pub use conn::Direction;
pub use router::RelayRouter;
pub use server::RtspServer;
pub use stream::{InterleavedPacket, ServerStream};
