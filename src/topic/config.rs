//! Relay configuration

use std::time::Duration;

use serde::Deserialize;

/// Configuration options recognized by the relay core
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP port for publisher connections
    pub publish_port: u16,

    /// TCP port for subscriber connections
    pub subscribe_port: u16,

    /// Global cap on concurrent publishers
    pub max_publishers: usize,

    /// Per-topic cap on concurrent subscribers
    pub max_subscribers_per_topic: usize,

    /// Depth of the per-topic inbound packet channel
    pub publisher_queue_size: usize,

    /// Depth of each subscriber's packet queue
    pub subscriber_queue_size: usize,

    /// How long an abandoned topic survives awaiting publisher reconnect
    pub publisher_grace_period: Duration,

    /// Enable UDP RTP/RTCP listeners (local node only)
    pub enable_udp: bool,

    /// Publisher-side UDP RTP base port (RTCP at base+1), 0 = unset
    pub publisher_udp_base: u16,

    /// Subscriber-side UDP RTP base port (RTCP at base+1), 0 = unset
    pub subscriber_udp_base: u16,

    /// Start of the allocator-managed UDP port range, 0 = allocator disabled
    pub udp_port_start: u16,

    /// End of the allocator-managed UDP port range (inclusive)
    pub udp_port_end: u16,

    /// Dial timeout when forwarding a connection to the owning node
    pub proxy_dial_timeout: Duration,

    /// Idle bound for forwarded connections
    pub proxy_idle_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publish_port: 9191,
            subscribe_port: 9192,
            max_publishers: 5,
            max_subscribers_per_topic: 5,
            publisher_queue_size: 1024,
            subscriber_queue_size: 256,
            publisher_grace_period: Duration::from_secs(5),
            enable_udp: false,
            publisher_udp_base: 0,
            subscriber_udp_base: 0,
            udp_port_start: 0,
            udp_port_end: 0,
            proxy_dial_timeout: Duration::from_secs(1),
            proxy_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Set the publisher and subscriber TCP ports
    pub fn ports(mut self, publish: u16, subscribe: u16) -> Self {
        self.publish_port = publish;
        self.subscribe_port = subscribe;
        self
    }

    /// Set the global publisher cap
    pub fn max_publishers(mut self, max: usize) -> Self {
        self.max_publishers = max;
        self
    }

    /// Set the per-topic subscriber cap
    pub fn max_subscribers_per_topic(mut self, max: usize) -> Self {
        self.max_subscribers_per_topic = max;
        self
    }

    /// Set the per-topic inbound queue depth
    pub fn publisher_queue_size(mut self, size: usize) -> Self {
        self.publisher_queue_size = size;
        self
    }

    /// Set the per-subscriber queue depth
    pub fn subscriber_queue_size(mut self, size: usize) -> Self {
        self.subscriber_queue_size = size;
        self
    }

    /// Set the publisher reconnect grace period
    pub fn publisher_grace_period(mut self, period: Duration) -> Self {
        self.publisher_grace_period = period;
        self
    }

    /// Set the proxy dial timeout
    pub fn proxy_dial_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_dial_timeout = timeout;
        self
    }
}

/// Optional JSON config file, merged under command-line flags.
///
/// Every field is optional; absent fields keep the flag-provided value.
/// Durations are given in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileConfig {
    pub publish_port: Option<u16>,
    pub subscribe_port: Option<u16>,
    pub max_publishers: Option<usize>,
    pub max_subscribers_per_topic: Option<usize>,
    pub publisher_queue_size: Option<usize>,
    pub subscriber_queue_size: Option<usize>,
    pub publisher_grace_period_secs: Option<u64>,
    #[serde(rename = "EnableUDP")]
    pub enable_udp: Option<bool>,
    #[serde(rename = "PublisherUDPBase")]
    pub publisher_udp_base: Option<u16>,
    #[serde(rename = "SubscriberUDPBase")]
    pub subscriber_udp_base: Option<u16>,
    pub udp_port_start: Option<u16>,
    pub udp_port_end: Option<u16>,
    pub proxy_dial_timeout_secs: Option<u64>,
    pub proxy_idle_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Overlay file values onto a base config
    pub fn apply(&self, mut cfg: RelayConfig) -> RelayConfig {
        if let Some(v) = self.publish_port {
            cfg.publish_port = v;
        }
        if let Some(v) = self.subscribe_port {
            cfg.subscribe_port = v;
        }
        if let Some(v) = self.max_publishers {
            cfg.max_publishers = v;
        }
        if let Some(v) = self.max_subscribers_per_topic {
            cfg.max_subscribers_per_topic = v;
        }
        if let Some(v) = self.publisher_queue_size {
            cfg.publisher_queue_size = v;
        }
        if let Some(v) = self.subscriber_queue_size {
            cfg.subscriber_queue_size = v;
        }
        if let Some(v) = self.publisher_grace_period_secs {
            cfg.publisher_grace_period = Duration::from_secs(v);
        }
        if let Some(v) = self.enable_udp {
            cfg.enable_udp = v;
        }
        if let Some(v) = self.publisher_udp_base {
            cfg.publisher_udp_base = v;
        }
        if let Some(v) = self.subscriber_udp_base {
            cfg.subscriber_udp_base = v;
        }
        if let Some(v) = self.udp_port_start {
            cfg.udp_port_start = v;
        }
        if let Some(v) = self.udp_port_end {
            cfg.udp_port_end = v;
        }
        if let Some(v) = self.proxy_dial_timeout_secs {
            cfg.proxy_dial_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.proxy_idle_timeout_secs {
            cfg.proxy_idle_timeout = Duration::from_secs(v);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RelayConfig::default();

        assert_eq!(cfg.publish_port, 9191);
        assert_eq!(cfg.subscribe_port, 9192);
        assert_eq!(cfg.max_publishers, 5);
        assert_eq!(cfg.max_subscribers_per_topic, 5);
        assert_eq!(cfg.publisher_queue_size, 1024);
        assert_eq!(cfg.subscriber_queue_size, 256);
        assert_eq!(cfg.publisher_grace_period, Duration::from_secs(5));
        assert!(!cfg.enable_udp);
    }

    #[test]
    fn test_builder_chaining() {
        let cfg = RelayConfig::default()
            .ports(8554, 8555)
            .max_publishers(10)
            .max_subscribers_per_topic(2)
            .publisher_queue_size(16)
            .subscriber_queue_size(8)
            .publisher_grace_period(Duration::from_millis(250));

        assert_eq!(cfg.publish_port, 8554);
        assert_eq!(cfg.subscribe_port, 8555);
        assert_eq!(cfg.max_publishers, 10);
        assert_eq!(cfg.max_subscribers_per_topic, 2);
        assert_eq!(cfg.publisher_queue_size, 16);
        assert_eq!(cfg.subscriber_queue_size, 8);
        assert_eq!(cfg.publisher_grace_period, Duration::from_millis(250));
    }

    #[test]
    fn test_file_config_overlay() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "MaxPublishers": 2,
                "PublisherGracePeriodSecs": 10,
                "EnableUDP": true,
                "PublisherUDPBase": 50000
            }"#,
        )
        .unwrap();

        let cfg = file.apply(RelayConfig::default());
        assert_eq!(cfg.max_publishers, 2);
        assert_eq!(cfg.publisher_grace_period, Duration::from_secs(10));
        assert!(cfg.enable_udp);
        assert_eq!(cfg.publisher_udp_base, 50000);
        // untouched fields keep defaults
        assert_eq!(cfg.publish_port, 9191);
    }

    #[test]
    fn test_empty_file_config_keeps_base() {
        let file = FileConfig::default();
        let base = RelayConfig::default().max_publishers(7);
        let cfg = file.apply(base.clone());
        assert_eq!(cfg.max_publishers, 7);
        assert_eq!(cfg.subscribe_port, base.subscribe_port);
    }
}
