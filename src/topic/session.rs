//! Publisher and subscriber sessions, and the bounded drop-oldest queue
//!
//! Both the per-topic inbound channel and each subscriber's queue are
//! [`PacketQueue`]s: bounded, non-blocking on the producer side, with a single
//! drop-oldest retry when full. Live packets beat complete packets here, so a
//! slow consumer loses its oldest data rather than stalling the publisher.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::packet::InboundPacket;

/// Outcome of a queue push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Packet queued without displacing anything
    Queued,
    /// Packet queued after evicting the oldest entry
    QueuedDroppedOldest,
    /// Queue closed, packet discarded
    Closed,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<InboundPacket>,
    closed: bool,
}

/// Bounded FIFO with drop-oldest admission.
///
/// Producers never wait: a push either fits, evicts the oldest element, or is
/// rejected because the queue is closed. `recv` is the only awaiting side and
/// resolves to `None` once the queue is closed and drained.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a packet, evicting the oldest entry when full
    pub fn push(&self, pkt: InboundPacket) -> Enqueue {
        let result = {
            let mut inner = self.inner.lock().expect("packet queue lock poisoned");
            if inner.closed {
                return Enqueue::Closed;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(pkt);
                Enqueue::Queued
            } else {
                inner.items.pop_front();
                inner.items.push_back(pkt);
                Enqueue::QueuedDroppedOldest
            }
        };
        self.notify.notify_one();
        result
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<InboundPacket> {
        let mut inner = self.inner.lock().expect("packet queue lock poisoned");
        inner.items.pop_front()
    }

    /// Await the next packet; `None` once the queue is closed and empty
    pub async fn recv(&self) -> Option<InboundPacket> {
        loop {
            // Arm the waiter before checking state so a push between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("packet queue lock poisoned");
                if let Some(pkt) = inner.items.pop_front() {
                    return Some(pkt);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue; pending packets remain receivable
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("packet queue lock poisoned");
            inner.closed = true;
        }
        self.notify.notify_waiters();
        // also store a permit for a receiver that armed its waiter but has
        // not polled yet; notify_waiters alone would miss it
        self.notify.notify_one();
    }

    /// Current queue length
    pub fn len(&self) -> usize {
        self.inner.lock().expect("packet queue lock poisoned").items.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("packet queue lock poisoned").closed
    }
}

/// State for one publisher connection bound to a topic
pub struct PublisherSession {
    id: String,
    cancel: CancellationToken,
}

impl PublisherSession {
    /// Create a session with a fresh cancellation handle
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancellation handle fired on unregister, topic close, or shutdown
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// State for one subscriber connection bound to a topic
#[derive(Debug)]
pub struct SubscriberSession {
    id: String,
    cancel: CancellationToken,
    queue: PacketQueue,
}

impl SubscriberSession {
    /// Create a session with a bounded packet queue
    pub fn new(id: impl Into<String>, queue_size: usize) -> Self {
        Self {
            id: id.into(),
            cancel: CancellationToken::new(),
            queue: PacketQueue::new(queue_size),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancellation handle fired on unregister, topic close, or shutdown
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The subscriber's bounded queue, filled by the topic dispatcher
    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn pkt(n: u8) -> InboundPacket {
        InboundPacket::new(0, Bytes::copy_from_slice(&[n]))
    }

    #[test]
    fn test_push_within_capacity() {
        let q = PacketQueue::new(4);

        assert_eq!(q.push(pkt(1)), Enqueue::Queued);
        assert_eq!(q.push(pkt(2)), Enqueue::Queued);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let q = PacketQueue::new(2);

        q.push(pkt(1));
        q.push(pkt(2));
        assert_eq!(q.push(pkt(3)), Enqueue::QueuedDroppedOldest);
        assert_eq!(q.len(), 2);

        // oldest (1) was evicted; order of survivors preserved
        assert_eq!(q.try_pop().unwrap().raw[0], 2);
        assert_eq!(q.try_pop().unwrap().raw[0], 3);
    }

    #[test]
    fn test_push_after_close() {
        let q = PacketQueue::new(2);
        q.push(pkt(1));
        q.close();

        assert_eq!(q.push(pkt(2)), Enqueue::Closed);
        // pending packet still receivable
        assert_eq!(q.try_pop().unwrap().raw[0], 1);
        assert!(q.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let q = std::sync::Arc::new(PacketQueue::new(4));

        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.recv().await });

        tokio::task::yield_now().await;
        q.push(pkt(7));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.raw[0], 7);
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_closed_and_drained() {
        let q = PacketQueue::new(4);
        q.push(pkt(1));
        q.close();

        assert_eq!(q.recv().await.unwrap().raw[0], 1);
        assert!(q.recv().await.is_none());
    }

    #[test]
    fn test_order_preserved_modulo_drops() {
        let q = PacketQueue::new(3);
        for n in 0..10 {
            q.push(pkt(n));
        }

        let mut seen = Vec::new();
        while let Some(p) = q.try_pop() {
            seen.push(p.raw[0]);
        }
        assert_eq!(seen, vec![7, 8, 9]);
    }

    #[test]
    fn test_subscriber_session_queue() {
        let sub = SubscriberSession::new("s1", 2);
        assert_eq!(sub.id(), "s1");
        assert!(!sub.cancel_token().is_cancelled());

        sub.queue().push(pkt(1));
        assert_eq!(sub.queue().len(), 1);
    }
}
