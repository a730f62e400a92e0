//! Structured logging configuration.
//!
//! `tracing-subscriber` is the single sink: library code logs through the
//! `log` facade and those records are picked up here as well.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
///
/// # Example
///
/// ```no_run
/// use crib_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a completed API request
///
/// # Arguments
///
/// * `request_id` - Correlation id from the `x-request-id` header
/// * `method` - HTTP method
/// * `path` - Request path
/// * `status_code` - Response status code
/// * `duration_ms` - Request duration in milliseconds
pub fn log_api_request(
    request_id: &str,
    method: &str,
    path: &str,
    status_code: u16,
    duration_ms: u64,
) {
    if status_code >= 500 {
        tracing::warn!(
            request_id = request_id,
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request failed"
        );
    } else {
        tracing::info!(
            request_id = request_id,
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request completed"
        );
    }
}

/// Log a player being refused an action on a match
///
/// # Arguments
///
/// * `request_id` - Correlation id from the `x-request-id` header
/// * `match_id` - Match the request targeted
/// * `player_id` - Authenticated player
/// * `reason` - What was refused; never includes card contents
pub fn log_refused(request_id: &str, match_id: &str, player_id: i64, reason: &str) {
    tracing::warn!(
        request_id = request_id,
        match_id = match_id,
        player_id = player_id,
        "SECURITY: refused: {}",
        reason
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_log_helpers_do_not_panic() {
        log_api_request("req-1", "GET", "/health", 200, 3);
        log_api_request("req-2", "POST", "/api/v1/matches", 500, 1200);
        log_refused("req-3", "match-1", 7, "not seated");
    }
}
