//! Metrics Module
//!
//! Prometheus-compatible metrics for monitoring:
//! - Matching engine metrics (orders, matches, cancellations)
//! - Settlement metrics (completions, failures, durations)
//! - Clearnode connection metrics (reconnects)
//! - WebSocket metrics (connections)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Metric names as constants for consistency
pub mod names {
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const MATCHES_TOTAL: &str = "matches_total";

    pub const SETTLEMENTS_COMPLETED_TOTAL: &str = "settlements_completed_total";
    pub const SETTLEMENTS_FAILED_TOTAL: &str = "settlements_failed_total";
    pub const SETTLEMENT_DURATION_SECONDS: &str = "settlement_duration_seconds";

    pub const CLEARNODE_RECONNECTS_TOTAL: &str = "clearnode_reconnects_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
}

/// Label keys
pub mod labels {
    pub const ORDER_SIDE: &str = "side";
    pub const PAIR: &str = "pair";
}

/// Initialize Prometheus metrics exporter
///
/// Returns a handle that can be used to render metrics
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::SETTLEMENT_DURATION_SECONDS.to_string()),
            &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        )
        .expect("settlement histogram buckets")
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

pub fn record_order_submitted(side: &str) {
    counter!(names::ORDERS_SUBMITTED_TOTAL, labels::ORDER_SIDE => side.to_string()).increment(1);
}

pub fn record_order_cancelled() {
    counter!(names::ORDERS_CANCELLED_TOTAL).increment(1);
}

pub fn record_match(base_token: &str, quote_token: &str) {
    counter!(
        names::MATCHES_TOTAL,
        labels::PAIR => format!("{}/{}", base_token, quote_token)
    )
    .increment(1);
}

pub fn record_settlement_completed(duration_secs: f64) {
    counter!(names::SETTLEMENTS_COMPLETED_TOTAL).increment(1);
    histogram!(names::SETTLEMENT_DURATION_SECONDS).record(duration_secs);
}

pub fn record_settlement_failed() {
    counter!(names::SETTLEMENTS_FAILED_TOTAL).increment(1);
}

pub fn record_clearnode_reconnect() {
    counter!(names::CLEARNODE_RECONNECTS_TOTAL).increment(1);
}

pub fn set_ws_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}
