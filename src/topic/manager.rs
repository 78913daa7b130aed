//! Topic lifecycle management
//!
//! The manager owns every topic and is the single synchronization point for
//! admission: publisher caps, per-topic subscriber caps, and the grace window
//! that keeps a topic alive across a publisher reconnect. Sessions refer to
//! topics by name, never by reference, so teardown is a single-owner
//! operation here.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::rtsp::ServerStream;
use crate::stats::RelayMetrics;

use super::config::RelayConfig;
use super::error::TopicError;
use super::session::{Enqueue, PublisherSession, SubscriberSession};
use super::topic::Topic;
use super::InboundPacket;

struct ManagerInner {
    topics: HashMap<String, Arc<Topic>>,
    publisher_count: usize,
}

/// Owns all topics and the global publisher counter
pub struct TopicManager {
    cfg: RelayConfig,
    metrics: Arc<RelayMetrics>,
    inner: Mutex<ManagerInner>,
}

/// Condensed status for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub publisher_count: usize,
    pub topics: Vec<TopicStatus>,
}

/// One topic's row in the status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TopicStatus {
    pub name: String,
    pub has_publisher: bool,
    pub publisher_id: String,
    pub subscriber_count: usize,
}

impl TopicManager {
    /// Create a manager with the given configuration and metrics sink
    pub fn new(cfg: RelayConfig, metrics: Arc<RelayMetrics>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            metrics,
            inner: Mutex::new(ManagerInner {
                topics: HashMap::new(),
                publisher_count: 0,
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Admit a publisher for a topic.
    ///
    /// Creates the topic on first admission; reuses it (and cancels the grace
    /// timer) when a publisher reconnects within the grace window.
    pub async fn register_publisher(
        &self,
        name: &str,
        publisher: Arc<PublisherSession>,
    ) -> Result<(), TopicError> {
        let mut inner = self.inner.lock().await;

        if inner.publisher_count >= self.cfg.max_publishers {
            return Err(TopicError::MaxPublishers);
        }

        if let Some(topic) = inner.topics.get(name) {
            if topic.has_publisher() {
                return Err(TopicError::TopicHasPublisher);
            }
            topic.set_publisher(Arc::clone(&publisher));
            tracing::info!(
                topic = %name,
                publisher_id = %publisher.id(),
                subscribers = topic.subscriber_count(),
                "publisher registered (existing topic)"
            );
        } else {
            let topic = Topic::spawn(name, self.cfg.publisher_queue_size, Arc::clone(&self.metrics));
            topic.set_publisher(Arc::clone(&publisher));
            inner.topics.insert(name.to_string(), topic);
            tracing::info!(
                topic = %name,
                publisher_id = %publisher.id(),
                "publisher registered (new topic)"
            );
        }

        inner.publisher_count += 1;
        self.metrics.add_active_publishers(1);
        self.metrics.inc_publishers_registered();
        Ok(())
    }

    /// Remove a topic's publisher and arm the grace timer.
    ///
    /// The topic and its subscribers survive `publisher_grace_period`; if no
    /// publisher reconnects before the timer fires, the topic is closed and
    /// removed.
    pub async fn unregister_publisher(self: &Arc<Self>, name: &str) {
        let mut inner = self.inner.lock().await;
        let Some(topic) = inner.topics.get(name).cloned() else {
            return;
        };
        let Some(grace) = topic.remove_publisher() else {
            return;
        };

        if inner.publisher_count > 0 {
            inner.publisher_count -= 1;
        }
        drop(inner);

        self.metrics.add_active_publishers(-1);
        tracing::info!(
            topic = %name,
            grace_secs = self.cfg.publisher_grace_period.as_secs_f64(),
            "publisher unregistered, grace timer armed"
        );

        let manager = Arc::clone(self);
        let topic_name = name.to_string();
        let period = self.cfg.publisher_grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = grace.cancelled() => {
                    tracing::debug!(topic = %topic_name, "grace timer cancelled by reconnect");
                }
                _ = tokio::time::sleep(period) => {
                    manager.close_topic(&topic_name).await;
                }
            }
        });
    }

    /// Admit a subscriber on an existing topic
    pub async fn register_subscriber(
        &self,
        name: &str,
        subscriber: Arc<SubscriberSession>,
    ) -> Result<(), TopicError> {
        let inner = self.inner.lock().await;
        let Some(topic) = inner.topics.get(name) else {
            return Err(TopicError::NoActivePublisher);
        };
        if topic.subscriber_count() >= self.cfg.max_subscribers_per_topic {
            return Err(TopicError::TopicMaxSubscribers);
        }

        tracing::info!(
            topic = %name,
            subscriber_id = %subscriber.id(),
            subscribers = topic.subscriber_count() + 1,
            "subscriber registered"
        );
        topic.add_subscriber(subscriber);
        self.metrics.add_active_subscribers(1);
        self.metrics.inc_subscribers_registered();
        Ok(())
    }

    /// Cancel and remove a subscriber
    pub async fn unregister_subscriber(&self, name: &str, id: &str) {
        let inner = self.inner.lock().await;
        if let Some(topic) = inner.topics.get(name) {
            if topic.remove_subscriber(id) {
                self.metrics.add_active_subscribers(-1);
                tracing::debug!(topic = %name, subscriber_id = %id, "subscriber removed");
            }
        }
    }

    /// Associate the wire multiplexer with a topic
    pub async fn set_topic_stream(&self, name: &str, stream: Arc<ServerStream>) {
        let inner = self.inner.lock().await;
        if let Some(topic) = inner.topics.get(name) {
            topic.set_stream(stream);
        }
    }

    /// The wire multiplexer for a topic, if any
    pub async fn get_topic_stream(&self, name: &str) -> Option<Arc<ServerStream>> {
        let inner = self.inner.lock().await;
        inner.topics.get(name).and_then(|t| t.stream())
    }

    /// Look up a subscriber session by topic and id
    pub async fn get_subscriber(&self, name: &str, id: &str) -> Option<Arc<SubscriberSession>> {
        let inner = self.inner.lock().await;
        inner.topics.get(name).and_then(|t| t.get_subscriber(id))
    }

    /// Push a packet into the topic's inbound channel.
    ///
    /// Never awaits subscriber consumption: a full channel loses its oldest
    /// packet to admit the new one. Returns whether the packet was admitted.
    pub async fn publish_packet(&self, name: &str, pkt: InboundPacket) -> bool {
        let topic = {
            let inner = self.inner.lock().await;
            inner.topics.get(name).cloned()
        };
        let Some(topic) = topic else {
            return false;
        };
        !matches!(topic.inbound().push(pkt), Enqueue::Closed)
    }

    /// Snapshot for the admin surface, topics sorted by name
    pub async fn status(&self) -> ManagerStatus {
        let inner = self.inner.lock().await;
        let mut topics: Vec<TopicStatus> = inner
            .topics
            .values()
            .map(|t| TopicStatus {
                name: t.name().to_string(),
                has_publisher: t.has_publisher(),
                publisher_id: t.publisher_id(),
                subscriber_count: t.subscriber_count(),
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        ManagerStatus {
            publisher_count: inner.publisher_count,
            topics,
        }
    }

    /// Close and remove a topic, unless a publisher reconnected meanwhile
    pub(crate) async fn close_topic(&self, name: &str) {
        let topic = {
            let mut inner = self.inner.lock().await;
            match inner.topics.get(name) {
                // reconnect won the race against the grace timer
                Some(t) if t.has_publisher() => return,
                Some(_) => {}
                None => return,
            }
            inner.topics.remove(name)
        };
        if let Some(topic) = topic {
            topic.close();
            tracing::info!(topic = %name, "topic closed");
        }
    }

    /// Close every topic
    pub async fn shutdown(&self) {
        let topics: Vec<Arc<Topic>> = {
            let mut inner = self.inner.lock().await;
            inner.topics.drain().map(|(_, t)| t).collect()
        };
        for topic in topics {
            topic.close();
        }
        tracing::info!("topic manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn test_config() -> RelayConfig {
        RelayConfig::default()
            .max_publishers(5)
            .max_subscribers_per_topic(5)
            .publisher_queue_size(16)
            .subscriber_queue_size(8)
            .publisher_grace_period(Duration::from_millis(0))
    }

    fn manager(cfg: RelayConfig) -> (Arc<TopicManager>, Arc<RelayMetrics>) {
        let metrics = Arc::new(RelayMetrics::new());
        (TopicManager::new(cfg, Arc::clone(&metrics)), metrics)
    }

    fn pkt(n: u8) -> InboundPacket {
        InboundPacket::new(0, Bytes::copy_from_slice(&[n]))
    }

    #[tokio::test]
    async fn test_single_topic_single_subscriber() {
        let (mgr, metrics) = manager(test_config());

        mgr.register_publisher("t1", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        let sub = Arc::new(SubscriberSession::new("s1", 8));
        mgr.register_subscriber("t1", Arc::clone(&sub)).await.unwrap();

        assert_eq!(metrics.active_publishers(), 1);
        assert_eq!(metrics.active_subscribers(), 1);

        for n in 0..3 {
            assert!(mgr.publish_packet("t1", pkt(n)).await);
        }
        for n in 0..3 {
            assert_eq!(sub.queue().recv().await.unwrap().raw[0], n);
        }
        assert_eq!(metrics.packets_dropped(), 0);

        // zero grace: the topic closes promptly and cancels the subscriber
        mgr.unregister_publisher("t1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(metrics.active_publishers(), 0);
        assert_eq!(metrics.active_subscribers(), 0);
        assert!(sub.cancel_token().is_cancelled());
        assert!(mgr.status().await.topics.is_empty());
    }

    #[tokio::test]
    async fn test_max_publishers_rejected() {
        let (mgr, _metrics) = manager(test_config().max_publishers(1));

        mgr.register_publisher("a", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        let err = mgr
            .register_publisher("b", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap_err();

        assert_eq!(err, TopicError::MaxPublishers);
        assert_eq!(mgr.status().await.publisher_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_publisher_rejected() {
        let (mgr, _metrics) = manager(test_config());

        mgr.register_publisher("x", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        let err = mgr
            .register_publisher("x", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap_err();

        assert_eq!(err, TopicError::TopicHasPublisher);
    }

    #[tokio::test]
    async fn test_subscriber_cap() {
        let (mgr, _metrics) = manager(test_config().max_subscribers_per_topic(1));

        mgr.register_publisher("x", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        mgr.register_subscriber("x", Arc::new(SubscriberSession::new("s1", 4)))
            .await
            .unwrap();
        let err = mgr
            .register_subscriber("x", Arc::new(SubscriberSession::new("s2", 4)))
            .await
            .unwrap_err();

        assert_eq!(err, TopicError::TopicMaxSubscribers);
    }

    #[tokio::test]
    async fn test_subscriber_without_topic() {
        let (mgr, _metrics) = manager(test_config());

        let err = mgr
            .register_subscriber("ghost", Arc::new(SubscriberSession::new("s1", 4)))
            .await
            .unwrap_err();
        assert_eq!(err, TopicError::NoActivePublisher);
    }

    #[tokio::test]
    async fn test_register_unregister_restores_count() {
        let (mgr, metrics) = manager(test_config().publisher_grace_period(Duration::from_secs(60)));

        let before = mgr.status().await.publisher_count;
        mgr.register_publisher("t", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        mgr.unregister_publisher("t").await;

        assert_eq!(mgr.status().await.publisher_count, before);
        assert_eq!(metrics.active_publishers(), 0);
    }

    #[tokio::test]
    async fn test_grace_window_preserves_subscribers() {
        let (mgr, metrics) =
            manager(test_config().publisher_grace_period(Duration::from_millis(200)));

        mgr.register_publisher("t", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        let sub = Arc::new(SubscriberSession::new("s1", 4));
        mgr.register_subscriber("t", Arc::clone(&sub)).await.unwrap();

        mgr.unregister_publisher("t").await;

        // within the window the topic and subscriber survive
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sub.cancel_token().is_cancelled());
        assert_eq!(mgr.status().await.topics.len(), 1);

        // reconnect cancels the pending teardown
        mgr.register_publisher("t", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!sub.cancel_token().is_cancelled());
        assert_eq!(metrics.active_subscribers(), 1);
        let status = mgr.status().await;
        assert_eq!(status.topics.len(), 1);
        assert_eq!(status.topics[0].publisher_id, "p2");
    }

    #[tokio::test]
    async fn test_grace_expiry_tears_down() {
        let (mgr, _metrics) =
            manager(test_config().publisher_grace_period(Duration::from_millis(50)));

        mgr.register_publisher("t", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        let sub = Arc::new(SubscriberSession::new("s1", 4));
        mgr.register_subscriber("t", Arc::clone(&sub)).await.unwrap();

        mgr.unregister_publisher("t").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(sub.cancel_token().is_cancelled());
        assert!(mgr.status().await.topics.is_empty());

        // a fresh publisher gets a brand-new topic
        mgr.register_publisher("t", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap();
        assert!(mgr.publish_packet("t", pkt(1)).await);
    }

    #[tokio::test]
    async fn test_set_get_topic_stream() {
        let (mgr, _metrics) = manager(test_config());

        mgr.register_publisher("t", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        assert!(mgr.get_topic_stream("t").await.is_none());

        let stream = Arc::new(ServerStream::new(Bytes::from_static(
            b"m=video 0 RTP/AVP 96\n",
        )));
        mgr.set_topic_stream("t", Arc::clone(&stream)).await;

        let got = mgr.get_topic_stream("t").await.unwrap();
        assert!(Arc::ptr_eq(&got, &stream));
    }

    #[tokio::test]
    async fn test_publish_to_missing_topic() {
        let (mgr, _metrics) = manager(test_config());
        assert!(!mgr.publish_packet("nope", pkt(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (mgr, metrics) = manager(test_config().publisher_grace_period(Duration::from_secs(60)));

        mgr.register_publisher("a", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        mgr.register_publisher("b", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap();
        let sub = Arc::new(SubscriberSession::new("s1", 4));
        mgr.register_subscriber("a", Arc::clone(&sub)).await.unwrap();

        mgr.shutdown().await;

        assert!(sub.cancel_token().is_cancelled());
        assert_eq!(metrics.active_subscribers(), 0);
        assert!(mgr.status().await.topics.is_empty());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (mgr, _metrics) = manager(test_config());

        mgr.register_publisher("beta", Arc::new(PublisherSession::new("p2")))
            .await
            .unwrap();
        mgr.register_publisher("alpha", Arc::new(PublisherSession::new("p1")))
            .await
            .unwrap();
        mgr.register_subscriber("alpha", Arc::new(SubscriberSession::new("s1", 4)))
            .await
            .unwrap();

        let status = mgr.status().await;
        assert_eq!(status.publisher_count, 2);
        assert_eq!(status.topics.len(), 2);
        assert_eq!(status.topics[0].name, "alpha");
        assert_eq!(status.topics[0].publisher_id, "p1");
        assert_eq!(status.topics[0].subscriber_count, 1);
        assert_eq!(status.topics[1].name, "beta");
        assert!(status.topics[1].has_publisher);
    }
}
