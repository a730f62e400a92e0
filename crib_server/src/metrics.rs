//! Prometheus metrics for monitoring match server health and performance.
//!
//! The library records match-level metrics itself (`match_moves_applied_total`,
//! `match_moves_rejected_total`, `match_lock_wait_seconds`,
//! `match_commit_seconds`, `broadcast_dropped_subscribers_total`). This module
//! installs the exporter and adds the HTTP and WebSocket side.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use crib_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//! metrics::http_requests_total("POST", "/api/v1/matches", 200);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9090`)
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// WebSocket Metrics
// ============================================================================

/// Adjust the number of open WebSocket connections.
pub fn websocket_connections_active(delta: f64) {
    metrics::gauge!("websocket_connections_active").increment(delta);
}

/// Increment total WebSocket connections counter.
pub fn websocket_connections_total() {
    metrics::counter!("websocket_connections_total").increment(1);
}

/// Increment WebSocket messages sent counter.
pub fn websocket_messages_sent() {
    metrics::counter!("websocket_messages_sent").increment(1);
}

// ============================================================================
// Match Metrics
// ============================================================================

/// Set the number of matches held in memory.
pub fn live_matches(count: usize) {
    metrics::gauge!("live_matches").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_a_no_op() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        websocket_connections_active(1.0);
        websocket_connections_active(-1.0);
        websocket_connections_total();
        websocket_messages_sent();
        live_matches(3);
    }
}
