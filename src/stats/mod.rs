//! Relay-wide counters and gauges
//!
//! A single `RelayMetrics` handle is shared (via `Arc`) by the topic manager,
//! the dispatchers, the UDP allocator and the proxy listeners. The relay only
//! ever writes metrics; reading happens in `snapshot()` for the admin surface.
//! Tests construct their own instance, so nothing here is process-global.

pub mod prometheus;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub use prometheus::render;

/// Counters and gauges for one relay process
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// RTP packets received from publishers
    packets_received: AtomicU64,
    /// Packets enqueued into subscriber queues by dispatchers
    packets_dispatched: AtomicU64,
    /// Packets dropped by drop-oldest backpressure
    packets_dropped: AtomicU64,
    /// Publishers admitted over process lifetime
    publishers_registered: AtomicU64,
    /// Subscribers admitted over process lifetime
    subscribers_registered: AtomicU64,
    /// UDP port-pair reservations over process lifetime
    allocator_reservations: AtomicU64,
    /// Connections spliced to other cluster nodes
    forwarded_connections: AtomicU64,
    /// Bytes spliced to/from other cluster nodes
    forwarded_bytes: AtomicU64,
    /// Failed dials to owning nodes
    forward_failed: AtomicU64,

    /// Currently active publishers
    active_publishers: AtomicI64,
    /// Currently active subscribers
    active_subscribers: AtomicI64,
    /// Currently reserved allocator pairs
    allocator_reserved_pairs: AtomicI64,
}

/// Point-in-time copy of all metric values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_dispatched: u64,
    pub packets_dropped: u64,
    pub publishers_registered: u64,
    pub subscribers_registered: u64,
    pub allocator_reservations: u64,
    pub forwarded_connections: u64,
    pub forwarded_bytes: u64,
    pub forward_failed: u64,
    pub active_publishers: i64,
    pub active_subscribers: i64,
    pub allocator_reserved_pairs: i64,
}

impl RelayMetrics {
    /// Create a fresh metrics handle with all values at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_packets_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_packets_dispatched(&self) {
        self.packets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_packets_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publishers_registered(&self) {
        self.publishers_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_subscribers_registered(&self) {
        self.subscribers_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_allocator_reservations(&self) {
        self.allocator_reservations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forwarded_connections(&self) {
        self.forwarded_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_forwarded_bytes(&self, n: u64) {
        self.forwarded_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_forward_failed(&self) {
        self.forward_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_active_publishers(&self, delta: i64) {
        self.active_publishers.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_active_subscribers(&self, delta: i64) {
        self.active_subscribers.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_allocator_reserved_pairs(&self, delta: i64) {
        self.allocator_reserved_pairs.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_dispatched(&self) -> u64 {
        self.packets_dispatched.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn forwarded_connections(&self) -> u64 {
        self.forwarded_connections.load(Ordering::Relaxed)
    }

    pub fn forwarded_bytes(&self) -> u64 {
        self.forwarded_bytes.load(Ordering::Relaxed)
    }

    pub fn forward_failed(&self) -> u64 {
        self.forward_failed.load(Ordering::Relaxed)
    }

    pub fn active_publishers(&self) -> i64 {
        self.active_publishers.load(Ordering::Relaxed)
    }

    pub fn active_subscribers(&self) -> i64 {
        self.active_subscribers.load(Ordering::Relaxed)
    }

    pub fn allocator_reserved_pairs(&self) -> i64 {
        self.allocator_reserved_pairs.load(Ordering::Relaxed)
    }

    /// Copy all current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            publishers_registered: self.publishers_registered.load(Ordering::Relaxed),
            subscribers_registered: self.subscribers_registered.load(Ordering::Relaxed),
            allocator_reservations: self.allocator_reservations.load(Ordering::Relaxed),
            forwarded_connections: self.forwarded_connections.load(Ordering::Relaxed),
            forwarded_bytes: self.forwarded_bytes.load(Ordering::Relaxed),
            forward_failed: self.forward_failed.load(Ordering::Relaxed),
            active_publishers: self.active_publishers.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
            allocator_reserved_pairs: self.allocator_reserved_pairs.load(Ordering::Relaxed),
        }
    }
}
