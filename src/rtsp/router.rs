//! RTSP session routing
//!
//! Binds RTSP requests to topic identity through per-session state and drives
//! the topic manager. The router is shared by every connection on both the
//! publisher and subscriber ports; connection drivers call in with their
//! session id and the router keeps the `session → topic` and
//! `session → role` maps that make teardown possible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rtsp_types::StatusCode;

use crate::cluster::Cluster;
use crate::proxy::is_valid_topic_name;
use crate::topic::{InboundPacket, PublisherSession, SubscriberSession, TopicManager};

use super::stream::ServerStream;

#[derive(Debug, Clone)]
struct SessionBinding {
    topic: String,
    is_publisher: bool,
}

/// Shared per-node RTSP request router
pub struct RelayRouter {
    manager: Arc<TopicManager>,
    cluster: Option<Arc<Cluster>>,
    sessions: Mutex<HashMap<u64, SessionBinding>>,
}

impl RelayRouter {
    pub fn new(manager: Arc<TopicManager>, cluster: Option<Arc<Cluster>>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            cluster,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn manager(&self) -> &Arc<TopicManager> {
        &self.manager
    }

    /// Strip the leading `/` of a request path to get the topic name
    pub fn topic_from_path(path: &str) -> &str {
        path.strip_prefix('/').unwrap_or(path)
    }

    /// ANNOUNCE: admit a publisher and build the wire stream from its SDP
    pub async fn on_announce(
        &self,
        session_id: u64,
        path: &str,
        sdp: Bytes,
    ) -> Result<Arc<ServerStream>, StatusCode> {
        let topic = Self::topic_from_path(path);
        if !is_valid_topic_name(topic) {
            tracing::info!(topic = %topic, "announce rejected: invalid topic name");
            return Err(StatusCode::BadRequest);
        }

        let publisher = Arc::new(PublisherSession::new(format!("pub-{session_id}")));
        if let Err(e) = self.manager.register_publisher(topic, publisher).await {
            tracing::info!(topic = %topic, error = %e, "announce rejected");
            return Err(StatusCode::BadRequest);
        }

        let stream = Arc::new(ServerStream::new(sdp));
        self.manager.set_topic_stream(topic, Arc::clone(&stream)).await;

        let mut sessions = self.sessions.lock().expect("router lock poisoned");
        sessions.insert(
            session_id,
            SessionBinding {
                topic: topic.to_string(),
                is_publisher: true,
            },
        );
        Ok(stream)
    }

    /// DESCRIBE / SETUP lookup: the topic's wire stream if it exists
    pub async fn stream_for(&self, path: &str) -> Option<Arc<ServerStream>> {
        let topic = Self::topic_from_path(path);
        self.manager.get_topic_stream(topic).await
    }

    /// PLAY: admit a subscriber on the topic
    pub async fn on_play(
        &self,
        session_id: u64,
        path: &str,
    ) -> Result<Arc<SubscriberSession>, StatusCode> {
        let topic = Self::topic_from_path(path);
        let subscriber = Arc::new(SubscriberSession::new(
            format!("sub-{session_id}"),
            self.manager.config().subscriber_queue_size,
        ));

        if let Err(e) = self
            .manager
            .register_subscriber(topic, Arc::clone(&subscriber))
            .await
        {
            tracing::info!(topic = %topic, error = %e, "play rejected");
            return Err(StatusCode::ServiceUnavailable);
        }

        let mut sessions = self.sessions.lock().expect("router lock poisoned");
        sessions.insert(
            session_id,
            SessionBinding {
                topic: topic.to_string(),
                is_publisher: false,
            },
        );
        Ok(subscriber)
    }

    /// RECORD: acknowledged only for sessions that announced
    pub fn on_record(&self, session_id: u64) -> StatusCode {
        let sessions = self.sessions.lock().expect("router lock poisoned");
        match sessions.get(&session_id) {
            Some(binding) if binding.is_publisher => StatusCode::Ok,
            _ => StatusCode::MethodNotAllowed,
        }
    }

    /// One RTP packet from a publishing session.
    ///
    /// Writes to the wire stream (egress for interleaved subscribers) and
    /// feeds the topic's inbound channel for the dispatcher.
    pub async fn on_packet_rtp(&self, session_id: u64, track: usize, payload: Bytes) {
        let topic = {
            let sessions = self.sessions.lock().expect("router lock poisoned");
            match sessions.get(&session_id) {
                Some(binding) if binding.is_publisher => binding.topic.clone(),
                _ => return,
            }
        };

        self.manager.metrics().inc_packets_received();

        if let Some(stream) = self.manager.get_topic_stream(&topic).await {
            stream.write_packet_rtp(track, payload.clone());
        }
        self.manager
            .publish_packet(&topic, InboundPacket::new(track, payload))
            .await;
    }

    /// Whether a UDP transport may be negotiated for this topic.
    ///
    /// UDP is terminated locally, so it is only allowed when this node owns
    /// the topic (or no cluster routing is in play).
    pub fn udp_allowed(&self, path: &str) -> bool {
        let topic = Self::topic_from_path(path);
        match &self.cluster {
            None => true,
            Some(cluster) => match cluster.owner(topic) {
                Some(owner) => cluster.is_self(&owner),
                None => true,
            },
        }
    }

    /// Session ended: unregister whichever role it held
    pub async fn on_session_close(&self, session_id: u64) {
        let binding = {
            let mut sessions = self.sessions.lock().expect("router lock poisoned");
            sessions.remove(&session_id)
        };
        let Some(binding) = binding else {
            return;
        };

        tracing::debug!(
            topic = %binding.topic,
            session_id = session_id,
            is_publisher = binding.is_publisher,
            "session closed"
        );
        if binding.is_publisher {
            self.manager.unregister_publisher(&binding.topic).await;
        } else {
            self.manager
                .unregister_subscriber(&binding.topic, &format!("sub-{session_id}"))
                .await;
        }
    }

    /// The topic a session is bound to, if any
    pub fn session_topic(&self, session_id: u64) -> Option<String> {
        let sessions = self.sessions.lock().expect("router lock poisoned");
        sessions.get(&session_id).map(|b| b.topic.clone())
    }
}
