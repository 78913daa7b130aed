//! Prometheus text-format export
//!
//! Renders a [`MetricsSnapshot`] into the Prometheus exposition format served
//! by the admin `/metrics` endpoint. Metric names carry the `rtsper_` prefix
//! so dashboards keep a stable namespace across nodes.

use std::fmt::Write;

use super::MetricsSnapshot;

/// Prometheus metric type
#[derive(Clone, Copy, Debug)]
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

struct MetricDef {
    name: &'static str,
    help: &'static str,
    metric_type: MetricType,
    value: fn(&MetricsSnapshot) -> i64,
}

const RELAY_METRICS: &[MetricDef] = &[
    MetricDef {
        name: "packets_received_total",
        help: "Total RTP packets received from publishers",
        metric_type: MetricType::Counter,
        value: |s| s.packets_received as i64,
    },
    MetricDef {
        name: "packets_dispatched_total",
        help: "Total packets dispatched to subscriber queues",
        metric_type: MetricType::Counter,
        value: |s| s.packets_dispatched as i64,
    },
    MetricDef {
        name: "packets_dropped_total",
        help: "Total packets dropped by drop-oldest backpressure",
        metric_type: MetricType::Counter,
        value: |s| s.packets_dropped as i64,
    },
    MetricDef {
        name: "publishers_registered_total",
        help: "Total publishers registered",
        metric_type: MetricType::Counter,
        value: |s| s.publishers_registered as i64,
    },
    MetricDef {
        name: "subscribers_registered_total",
        help: "Total subscribers registered",
        metric_type: MetricType::Counter,
        value: |s| s.subscribers_registered as i64,
    },
    MetricDef {
        name: "allocator_reservations_total",
        help: "Total UDP port-pair reservations",
        metric_type: MetricType::Counter,
        value: |s| s.allocator_reservations as i64,
    },
    MetricDef {
        name: "forwarded_connections_total",
        help: "Total connections forwarded to other cluster nodes",
        metric_type: MetricType::Counter,
        value: |s| s.forwarded_connections as i64,
    },
    MetricDef {
        name: "forwarded_bytes_total",
        help: "Total bytes forwarded to other cluster nodes",
        metric_type: MetricType::Counter,
        value: |s| s.forwarded_bytes as i64,
    },
    MetricDef {
        name: "forward_failed_total",
        help: "Total failed attempts to forward connections to other nodes",
        metric_type: MetricType::Counter,
        value: |s| s.forward_failed as i64,
    },
    MetricDef {
        name: "active_publishers",
        help: "Number of active publishers",
        metric_type: MetricType::Gauge,
        value: |s| s.active_publishers,
    },
    MetricDef {
        name: "active_subscribers",
        help: "Number of active subscribers",
        metric_type: MetricType::Gauge,
        value: |s| s.active_subscribers,
    },
    MetricDef {
        name: "allocator_reserved_pairs",
        help: "Current number of reserved allocator port pairs",
        metric_type: MetricType::Gauge,
        value: |s| s.allocator_reserved_pairs,
    },
];

/// Render a snapshot in Prometheus text format with the given prefix
pub fn render_with_prefix(snapshot: &MetricsSnapshot, prefix: &str) -> String {
    let mut out = String::with_capacity(RELAY_METRICS.len() * 96);
    for def in RELAY_METRICS {
        let _ = writeln!(out, "# HELP {}_{} {}", prefix, def.name, def.help);
        let _ = writeln!(
            out,
            "# TYPE {}_{} {}",
            prefix,
            def.name,
            def.metric_type.as_str()
        );
        let _ = writeln!(out, "{}_{} {}", prefix, def.name, (def.value)(snapshot));
    }
    out
}

/// Render a snapshot with the default `rtsper` prefix
pub fn render(snapshot: &MetricsSnapshot) -> String {
    render_with_prefix(snapshot, "rtsper")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RelayMetrics;

    #[test]
    fn test_render_contains_all_names() {
        let m = RelayMetrics::new();
        let text = render(&m.snapshot());

        for name in [
            "rtsper_packets_received_total",
            "rtsper_packets_dispatched_total",
            "rtsper_packets_dropped_total",
            "rtsper_publishers_registered_total",
            "rtsper_subscribers_registered_total",
            "rtsper_allocator_reservations_total",
            "rtsper_forwarded_connections_total",
            "rtsper_forwarded_bytes_total",
            "rtsper_forward_failed_total",
            "rtsper_active_publishers",
            "rtsper_active_subscribers",
            "rtsper_allocator_reserved_pairs",
        ] {
            assert!(text.contains(name), "missing metric {name}");
        }
    }

    #[test]
    fn test_render_values() {
        let m = RelayMetrics::new();
        m.inc_forwarded_connections();
        m.add_forwarded_bytes(100);
        m.add_active_publishers(2);

        let text = render(&m.snapshot());
        assert!(text.contains("rtsper_forwarded_connections_total 1\n"));
        assert!(text.contains("rtsper_forwarded_bytes_total 100\n"));
        assert!(text.contains("rtsper_active_publishers 2\n"));
    }

    #[test]
    fn test_help_and_type_lines() {
        let m = RelayMetrics::new();
        let text = render(&m.snapshot());

        assert!(text.contains("# HELP rtsper_packets_dropped_total"));
        assert!(text.contains("# TYPE rtsper_packets_dropped_total counter"));
        assert!(text.contains("# TYPE rtsper_active_subscribers gauge"));
    }
}
