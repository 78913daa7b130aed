//! UDP RTP/RTCP port-pair allocator
//!
//! Reserves even/odd port pairs from a configured range and binds the sockets
//! at reservation time. The RTSP server later answers SETUP with these exact
//! ports and reads from the pre-bound sockets via `get_conn`, which removes
//! the race between allocation and listener construction.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};

use crate::stats::RelayMetrics;
use crate::topic::RelayConfig;

/// Allocator errors
#[derive(Debug)]
pub enum AllocError {
    /// The configured range is empty or inverted
    InvalidRange,
    /// Every pair in the range is reserved or unbindable
    NoAvailablePorts,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::InvalidRange => write!(f, "invalid port range"),
            AllocError::NoAvailablePorts => write!(f, "no available ports"),
        }
    }
}

impl std::error::Error for AllocError {}

struct AllocShared {
    start: u16,
    end: u16,
    reserved: Mutex<HashMap<u16, Arc<UdpSocket>>>,
    metrics: Arc<RelayMetrics>,
}

/// Reserves even/odd UDP port pairs, pre-binding both sockets
#[derive(Clone)]
pub struct UdpAllocator {
    shared: Arc<AllocShared>,
}

/// RAII handle for one reserved pair; dropping it closes both sockets
pub struct PairGuard {
    base: u16,
    shared: Arc<AllocShared>,
    released: bool,
}

impl UdpAllocator {
    /// Create an allocator for the inclusive range `[start, end]`.
    ///
    /// An odd `start` is coerced up to the next even port so every base is a
    /// valid RTP port with RTCP at `base + 1`.
    pub fn new(
        start: u16,
        end: u16,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self, AllocError> {
        if start == 0 || end == 0 || start > end {
            return Err(AllocError::InvalidRange);
        }
        let start = if start % 2 != 0 { start + 1 } else { start };
        Ok(Self {
            shared: Arc::new(AllocShared {
                start,
                end,
                reserved: Mutex::new(HashMap::new()),
                metrics,
            }),
        })
    }

    /// First even port considered for reservation
    pub fn start(&self) -> u16 {
        self.shared.start
    }

    /// Last port in the range (inclusive)
    pub fn end(&self) -> u16 {
        self.shared.end
    }

    /// Reserve the lowest free even base, binding RTP at `base` and RTCP at
    /// `base + 1`. A pair where either bind fails is skipped.
    pub fn reserve_pair(&self) -> Result<(u16, PairGuard), AllocError> {
        let mut reserved = self.shared.reserved.lock().expect("allocator lock poisoned");

        let mut base = self.shared.start;
        while base <= self.shared.end {
            if reserved.contains_key(&base) {
                base += 2;
                continue;
            }

            let rtp = match UdpSocket::bind(("0.0.0.0", base)) {
                Ok(sock) => sock,
                Err(_) => {
                    base += 2;
                    continue;
                }
            };
            let rtcp = match UdpSocket::bind(("0.0.0.0", base + 1)) {
                Ok(sock) => sock,
                Err(_) => {
                    drop(rtp);
                    base += 2;
                    continue;
                }
            };

            reserved.insert(base, Arc::new(rtp));
            reserved.insert(base + 1, Arc::new(rtcp));
            self.shared.metrics.inc_allocator_reservations();
            self.shared.metrics.add_allocator_reserved_pairs(1);

            tracing::debug!(base = base, "udp pair reserved");
            return Ok((
                base,
                PairGuard {
                    base,
                    shared: Arc::clone(&self.shared),
                    released: false,
                },
            ));
        }

        Err(AllocError::NoAvailablePorts)
    }

    /// A previously reserved socket by port number.
    ///
    /// The allocator keeps ownership: callers read from the socket but must
    /// not close it; it goes away when the pair is released.
    pub fn get_conn(&self, port: u16) -> Option<Arc<UdpSocket>> {
        self.shared
            .reserved
            .lock()
            .expect("allocator lock poisoned")
            .get(&port)
            .cloned()
    }
}

impl PairGuard {
    /// The reserved even RTP port; RTCP is at `base + 1`
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Release the pair now instead of at drop time
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut reserved = self.shared.reserved.lock().expect("allocator lock poisoned");
        let had = reserved.remove(&self.base).is_some();
        reserved.remove(&(self.base + 1));
        if had {
            self.shared.metrics.add_allocator_reserved_pairs(-1);
            tracing::debug!(base = self.base, "udp pair released");
        }
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Validate explicit UDP base-port configuration at startup.
///
/// Base ports must be set and even, and all four ports (RTP/RTCP for each
/// direction) must be bindable right now. Failure here is fatal to startup.
pub fn validate_udp_config(cfg: &RelayConfig) -> std::io::Result<()> {
    use std::io::{Error, ErrorKind};

    if cfg.publisher_udp_base == 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "publisher UDP base port not set",
        ));
    }
    if cfg.publisher_udp_base % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "publisher UDP base port must be even",
        ));
    }
    if cfg.subscriber_udp_base == 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "subscriber UDP base port not set",
        ));
    }
    if cfg.subscriber_udp_base % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "subscriber UDP base port must be even",
        ));
    }

    let ports = [
        cfg.publisher_udp_base,
        cfg.publisher_udp_base + 1,
        cfg.subscriber_udp_base,
        cfg.subscriber_udp_base + 1,
    ];
    let mut held = Vec::with_capacity(ports.len());
    for port in ports {
        match UdpSocket::bind(("0.0.0.0", port)) {
            Ok(sock) => held.push(sock),
            Err(e) => {
                return Err(Error::new(
                    e.kind(),
                    format!("failed to bind UDP port {port}: {e}"),
                ));
            }
        }
    }
    drop(held);
    Ok(())
}
