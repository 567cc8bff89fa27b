//! Bootstrap utilities for fluxbus binaries.

use std::future::Future;

use backon::BackoffBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::{connection_backoff, is_retryable};
use crate::bus::BusError;
use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the FLUXBUS_LOG environment variable.
///
/// Defaults to "info" level if FLUXBUS_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to the broker with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "broker")
/// * `address` - The address being connected to, for logging
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connected client on success, or the last error once retries are
/// exhausted or the error is not retryable.
pub async fn connect_with_retry<T, F, Fut>(
    service_name: &str,
    address: &str,
    mut connect: F,
) -> Result<T, BusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BusError>>,
{
    let mut backoff = connection_backoff().build();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                info!(service = service_name, address, attempt, "Connected");
                return Ok(client);
            }
            Err(e) if is_retryable(&e) => match backoff.next() {
                Some(delay) => {
                    warn!(
                        service = service_name,
                        address,
                        attempt,
                        error = %e,
                        "Connect failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(service = service_name, address, attempt, error = %e, "Giving up connecting");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_recovers() {
        let attempts = AtomicUsize::new(0);

        let result = connect_with_retry("broker", "amqp://test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BusError::Connection("refused".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_stops_on_non_transport_error() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = connect_with_retry("broker", "amqp://test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BusError::EmptyTopic) }
        })
        .await;

        assert!(matches!(result, Err(BusError::EmptyTopic)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
