//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::GatewayError;

/// Wrap a future with a deadline, reporting expiry as [`GatewayError::Timeout`].
pub async fn with_timeout<T>(
    duration: Duration,
    service: &str,
    operation: &str,
    future: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout(service, operation, duration)),
    }
}
