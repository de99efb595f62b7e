//! Metrics
//!
//! Prometheus-compatible metrics for the trading core: order admission and
//! matching counters, trade volume, and event-bus subscriber health.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Metric names as constants for consistency.
pub mod names {
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_MATCHED_TOTAL: &str = "orders_matched_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const SUBSCRIBER_LAG_DROPS_TOTAL: &str = "subscriber_lag_drops_total";
    pub const PERSISTENCE_ERRORS_TOTAL: &str = "persistence_errors_total";
}

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))
}
