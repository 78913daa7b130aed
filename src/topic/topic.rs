//! Per-topic state and the fan-out dispatcher

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::rtsp::ServerStream;
use crate::stats::RelayMetrics;

use super::session::{Enqueue, PublisherSession, SubscriberSession};
use super::PacketQueue;

struct TopicState {
    publisher: Option<Arc<PublisherSession>>,
    stream: Option<Arc<ServerStream>>,
    subscribers: HashMap<String, Arc<SubscriberSession>>,
    closed: bool,
    grace: Option<CancellationToken>,
}

/// A named channel with at most one publisher and many subscribers.
///
/// Owns the bounded inbound packet queue and the dispatcher task that drains
/// it into subscriber queues. Created by the manager on publisher admission,
/// destroyed when the grace timer fires or the manager shuts down.
pub struct Topic {
    name: String,
    inbound: PacketQueue,
    state: RwLock<TopicState>,
    metrics: Arc<RelayMetrics>,
}

impl Topic {
    /// Create the topic and start its dispatcher task
    pub(super) fn spawn(
        name: impl Into<String>,
        inbound_capacity: usize,
        metrics: Arc<RelayMetrics>,
    ) -> Arc<Self> {
        let topic = Arc::new(Self {
            name: name.into(),
            inbound: PacketQueue::new(inbound_capacity),
            state: RwLock::new(TopicState {
                publisher: None,
                stream: None,
                subscribers: HashMap::new(),
                closed: false,
                grace: None,
            }),
            metrics,
        });
        run_dispatcher(Arc::clone(&topic));
        topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bounded inbound channel fed by `publish_packet`
    pub fn inbound(&self) -> &PacketQueue {
        &self.inbound
    }

    pub fn has_publisher(&self) -> bool {
        self.state.read().expect("topic lock poisoned").publisher.is_some()
    }

    /// Current publisher id, empty if none
    pub fn publisher_id(&self) -> String {
        self.state
            .read()
            .expect("topic lock poisoned")
            .publisher
            .as_ref()
            .map(|p| p.id().to_string())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().expect("topic lock poisoned").subscribers.len()
    }

    /// Install a publisher, cancelling any pending grace timer
    pub(super) fn set_publisher(&self, publisher: Arc<PublisherSession>) {
        let mut state = self.state.write().expect("topic lock poisoned");
        state.publisher = Some(publisher);
        if let Some(grace) = state.grace.take() {
            grace.cancel();
        }
    }

    /// Remove the publisher: cancel its context, close the stream, and arm a
    /// grace token. Returns the token the caller should wire to a timer, or
    /// `None` if there was no publisher.
    pub(super) fn remove_publisher(&self) -> Option<CancellationToken> {
        let mut state = self.state.write().expect("topic lock poisoned");
        let publisher = state.publisher.take()?;
        publisher.cancel_token().cancel();

        if let Some(stream) = state.stream.take() {
            stream.close();
        }

        let grace = CancellationToken::new();
        state.grace = Some(grace.clone());
        Some(grace)
    }

    pub(super) fn set_stream(&self, stream: Arc<ServerStream>) {
        let mut state = self.state.write().expect("topic lock poisoned");
        state.stream = Some(stream);
    }

    pub(super) fn stream(&self) -> Option<Arc<ServerStream>> {
        self.state.read().expect("topic lock poisoned").stream.clone()
    }

    pub(super) fn add_subscriber(&self, subscriber: Arc<SubscriberSession>) {
        let mut state = self.state.write().expect("topic lock poisoned");
        state.subscribers.insert(subscriber.id().to_string(), subscriber);
    }

    /// Cancel and remove a subscriber. Returns whether it was present.
    pub(super) fn remove_subscriber(&self, id: &str) -> bool {
        let mut state = self.state.write().expect("topic lock poisoned");
        if let Some(sub) = state.subscribers.remove(id) {
            sub.cancel_token().cancel();
            sub.queue().close();
            true
        } else {
            false
        }
    }

    pub(super) fn get_subscriber(&self, id: &str) -> Option<Arc<SubscriberSession>> {
        self.state
            .read()
            .expect("topic lock poisoned")
            .subscribers
            .get(id)
            .cloned()
    }

    /// Tear the topic down: cancel the publisher and every subscriber, close
    /// the inbound channel so the dispatcher exits. Idempotent.
    pub(super) fn close(&self) {
        let removed_subscribers;
        {
            let mut state = self.state.write().expect("topic lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;

            if let Some(publisher) = state.publisher.take() {
                publisher.cancel_token().cancel();
            }
            if let Some(grace) = state.grace.take() {
                grace.cancel();
            }
            if let Some(stream) = state.stream.take() {
                stream.close();
            }
            removed_subscribers = state.subscribers.drain().map(|(_, s)| s).collect::<Vec<_>>();
        }

        for sub in &removed_subscribers {
            sub.cancel_token().cancel();
            sub.queue().close();
        }
        if !removed_subscribers.is_empty() {
            self.metrics
                .add_active_subscribers(-(removed_subscribers.len() as i64));
        }

        self.inbound.close();
    }

    /// Whether the topic has been torn down
    pub fn is_closed(&self) -> bool {
        self.state.read().expect("topic lock poisoned").closed
    }
}

/// Drain the topic's inbound channel into every subscriber queue.
///
/// Runs until the inbound channel is closed. Per subscriber, packet order is
/// preserved modulo drops; a slow subscriber only ever loses its own packets.
fn run_dispatcher(topic: Arc<Topic>) {
    tokio::spawn(async move {
        while let Some(pkt) = topic.inbound.recv().await {
            let state = topic.state.read().expect("topic lock poisoned");
            for sub in state.subscribers.values() {
                match sub.queue().push(pkt.clone()) {
                    Enqueue::Queued => topic.metrics.inc_packets_dispatched(),
                    Enqueue::QueuedDroppedOldest => {
                        topic.metrics.inc_packets_dispatched();
                        topic.metrics.inc_packets_dropped();
                    }
                    Enqueue::Closed => topic.metrics.inc_packets_dropped(),
                }
            }
        }
        tracing::debug!(topic = %topic.name, "dispatcher exited");
    });
}
