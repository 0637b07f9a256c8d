//! Prometheus metrics for the chat relay.
//!
//! Connection metrics cover the registry lifecycle; message metrics cover
//! the fan-out path. Everything is registered against the default registry
//! and exposed as text at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // Connection metrics

    /// Currently registered connections (one per online user)
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Currently registered WebSocket connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connections evicted by a newer connection for the same user
    pub static ref CONNECTIONS_SUPERSEDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_superseded_total", METRIC_PREFIX),
        "Total connections evicted by a reconnect from the same user"
    ).unwrap();

    // Message fan-out metrics

    pub static ref MESSAGES_ROUTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Total message records handed to the fan-out router"
    ).unwrap();

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages pushed to a live receiver connection"
    ).unwrap();

    pub static ref MESSAGES_RECEIVER_OFFLINE_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_receiver_offline_total", METRIC_PREFIX),
        "Total messages whose receiver had no live connection"
    ).unwrap();

    pub static ref MESSAGES_PUSH_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_push_failed_total", METRIC_PREFIX),
        "Total pushes that failed against a closing connection"
    ).unwrap();

    // Presence metrics

    pub static ref PRESENCE_BROADCASTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_presence_broadcasts_total", METRIC_PREFIX),
        "Total presence update broadcasts"
    ).unwrap();
}

/// Helpers for the message fan-out path
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_routed() {
        MESSAGES_ROUTED_TOTAL.inc();
    }

    pub fn record_delivered() {
        MESSAGES_DELIVERED_TOTAL.inc();
    }

    pub fn record_receiver_offline() {
        MESSAGES_RECEIVER_OFFLINE_TOTAL.inc();
    }

    pub fn record_push_failed() {
        MESSAGES_PUSH_FAILED_TOTAL.inc();
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_prefix() {
        CONNECTIONS_OPENED_TOTAL.inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("relay_connections_opened_total"));
    }
}
