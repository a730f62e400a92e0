//! Database query timeout helpers
//!
//! Wraps store operations so a stuck connection surfaces as an error
//! instead of holding a match lock forever.

use std::{future::Future, time::Duration};
use tokio::time::timeout;

use super::repository::{StoreError, StoreResult};

/// Default timeout for single queries (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for transactions (10 seconds)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute a store operation with a timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Async operation to execute
///
/// # Returns
///
/// * `StoreResult<T>` - Result or `StoreError::Timeout`
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    StoreError: From<E>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}

/// Execute a query with default timeout (5 seconds)
pub async fn with_default_timeout<F, T, E>(future: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    StoreError: From<E>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, future).await
}
