//! Inbound packet type

use bytes::Bytes;

/// One RTP packet received from a publisher, bound to its track.
///
/// Cheap to clone: the payload is reference-counted, so fanning a packet out
/// to many subscriber queues never copies media bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Track index the packet belongs to
    pub track: usize,
    /// Raw RTP payload, opaque to the relay
    pub raw: Bytes,
}

impl InboundPacket {
    /// Create a packet for a track
    pub fn new(track: usize, raw: Bytes) -> Self {
        Self { track, raw }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let pkt = InboundPacket::new(0, Bytes::from_static(b"\x80\x60\x00\x01"));
        let copy = pkt.clone();

        assert_eq!(copy.track, 0);
        assert_eq!(copy.raw.as_ptr(), pkt.raw.as_ptr());
        assert_eq!(copy.len(), 4);
    }
}
