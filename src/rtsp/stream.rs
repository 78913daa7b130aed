//! Wire-level stream multiplexer
//!
//! A `ServerStream` is created from a publisher's announced SDP and fans RTP
//! out to the wire writers of attached subscriber connections. It is the
//! egress path for TCP-interleaved playback; per-subscriber queue accounting
//! stays with the topic dispatcher.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;

/// One interleaved frame bound for a subscriber connection.
///
/// The channel follows the RTSP convention: RTP for track `n` travels on
/// channel `2n`, RTCP on `2n+1`.
#[derive(Debug, Clone)]
pub struct InterleavedPacket {
    pub channel: u8,
    pub payload: Bytes,
}

#[derive(Debug)]
struct StreamInner {
    writers: HashMap<u64, mpsc::Sender<InterleavedPacket>>,
    closed: bool,
}

/// Wire multiplexer for one topic's media
#[derive(Debug)]
pub struct ServerStream {
    sdp: Bytes,
    track_count: usize,
    inner: Mutex<StreamInner>,
}

impl ServerStream {
    /// Build a stream from announced SDP; tracks are the SDP media sections
    pub fn new(sdp: Bytes) -> Self {
        let track_count = count_media_sections(&sdp);
        Self {
            sdp,
            track_count,
            inner: Mutex::new(StreamInner {
                writers: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// The SDP returned to DESCRIBE requests
    pub fn sdp(&self) -> &Bytes {
        &self.sdp
    }

    /// Number of announced media tracks
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Attach a subscriber connection's wire writer.
    ///
    /// Returns `false` if the stream has already been closed.
    pub fn attach(&self, session_id: u64, writer: mpsc::Sender<InterleavedPacket>) -> bool {
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        if inner.closed {
            return false;
        }
        inner.writers.insert(session_id, writer);
        true
    }

    /// Detach a subscriber connection
    pub fn detach(&self, session_id: u64) {
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        inner.writers.remove(&session_id);
    }

    /// Number of attached wire writers
    pub fn attached(&self) -> usize {
        self.inner.lock().expect("stream lock poisoned").writers.len()
    }

    /// Fan an RTP packet out to every attached writer.
    ///
    /// Writers with full channels lose the packet rather than stalling the
    /// publisher; writers whose connection went away are pruned.
    pub fn write_packet_rtp(&self, track: usize, payload: Bytes) {
        let channel = (track * 2) as u8;
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        if inner.closed {
            return;
        }

        let mut gone = Vec::new();
        for (id, writer) in inner.writers.iter() {
            let frame = InterleavedPacket {
                channel,
                payload: payload.clone(),
            };
            match writer.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            inner.writers.remove(&id);
        }
    }

    /// Close the stream and drop all wire writers. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("stream lock poisoned");
        inner.closed = true;
        inner.writers.clear();
    }

    /// Whether the stream has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("stream lock poisoned").closed
    }
}

/// Count `m=` media sections in an SDP document
fn count_media_sections(sdp: &[u8]) -> usize {
    let mut count = 0;
    for line in sdp.split(|&b| b == b'\n') {
        if line.starts_with(b"m=") {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &[u8] = b"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=cam\r\n\
        m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n\
        m=audio 0 RTP/AVP 97\r\na=rtpmap:97 mpeg4-generic/48000\r\n";

    #[test]
    fn test_track_count_from_sdp() {
        let stream = ServerStream::new(Bytes::from_static(SDP));
        assert_eq!(stream.track_count(), 2);
    }

    #[test]
    fn test_track_count_empty_sdp() {
        let stream = ServerStream::new(Bytes::new());
        assert_eq!(stream.track_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_attached_writers() {
        let stream = ServerStream::new(Bytes::from_static(SDP));
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);

        assert!(stream.attach(1, tx1));
        assert!(stream.attach(2, tx2));
        assert_eq!(stream.attached(), 2);

        stream.write_packet_rtp(1, Bytes::from_static(b"pkt"));

        let f1 = rx1.recv().await.unwrap();
        let f2 = rx2.recv().await.unwrap();
        assert_eq!(f1.channel, 2);
        assert_eq!(f2.channel, 2);
        assert_eq!(f1.payload, Bytes::from_static(b"pkt"));
    }

    #[tokio::test]
    async fn test_full_writer_loses_packet() {
        let stream = ServerStream::new(Bytes::from_static(SDP));
        let (tx, mut rx) = mpsc::channel(1);
        stream.attach(1, tx);

        stream.write_packet_rtp(0, Bytes::from_static(b"a"));
        stream.write_packet_rtp(0, Bytes::from_static(b"b"));

        // capacity 1: second packet dropped, writer still attached
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from_static(b"a"));
        assert!(rx.try_recv().is_err());
        assert_eq!(stream.attached(), 1);
    }

    #[tokio::test]
    async fn test_closed_writer_pruned() {
        let stream = ServerStream::new(Bytes::from_static(SDP));
        let (tx, rx) = mpsc::channel(1);
        stream.attach(7, tx);
        drop(rx);

        stream.write_packet_rtp(0, Bytes::from_static(b"a"));
        assert_eq!(stream.attached(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let stream = ServerStream::new(Bytes::from_static(SDP));
        let (tx, _rx) = mpsc::channel(1);
        stream.attach(1, tx);

        stream.close();
        stream.close();

        assert!(stream.is_closed());
        assert_eq!(stream.attached(), 0);

        let (tx2, _rx2) = mpsc::channel(1);
        assert!(!stream.attach(2, tx2));
    }
}
