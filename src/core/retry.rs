//! Bounded retry for the wallet-credit path.
//!
//! Uses `backon` exponential backoff with jitter. Only errors classified by
//! [`Error::is_transient`] are retried; everything else fails on the first
//! attempt. Each attempt must be a complete database transaction so a failed
//! attempt leaves nothing behind.

use crate::config::settings::RetrySettings;
use crate::errors::{Error, Result};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff used when crediting a wallet.
#[must_use]
pub fn credit_backoff(settings: &RetrySettings) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(settings.min_delay())
        .with_max_delay(settings.max_delay())
        .with_max_times(settings.max_retries)
        .with_jitter()
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the
/// retries run out. Exhausted retries surface as [`Error::Transient`].
pub(crate) async fn retry_transient<T, F, Fut>(
    settings: &RetrySettings,
    operation: &'static str,
    attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    attempt
        .retry(credit_backoff(settings))
        .when(Error::is_transient)
        .notify(|err: &Error, delay: Duration| {
            warn!(operation, error = %err, delay = ?delay, "Transient storage error, retrying");
        })
        .await
        .map_err(|err| {
            if err.is_transient() {
                Error::Transient {
                    message: err.to_string(),
                }
            } else {
                err
            }
        })
}
