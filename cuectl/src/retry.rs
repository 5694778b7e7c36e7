//! Retry policy for transient provider failures.
//!
//! Only operations whose error reports itself as transient are retried (see
//! [`Error::is_transient`](crate::errors::Error::is_transient)). Uploads are never routed through here: resubmitting
//! a document creates a second remote asset.
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Default retry predicate: retry on server errors (5xx), rate limits (429), and timeouts (408).
pub fn default_should_retry(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Base backoff, multiplied by `backoff_factor` for every further retry
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    pub backoff_factor: u32,
    /// Upper bound on a single backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry_attempt + 1`: `backoff * factor^retry_attempt`, capped.
    pub fn backoff_for(&self, retry_attempt: u32) -> Duration {
        let exponential = self
            .backoff
            .saturating_mul(self.backoff_factor.saturating_pow(retry_attempt));
        exponential.min(self.max_backoff)
    }
}

/// Run `op`, retrying with exponential backoff while it fails transiently.
///
/// Non-transient errors, and the last transient error once retries run out, are returned as-is.
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry_attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry_attempt < config.max_retries => {
                let backoff = config.backoff_for(retry_attempt);
                tracing::warn!(
                    operation,
                    retry_attempt = retry_attempt + 1,
                    max_retries = config.max_retries,
                    backoff = %humantime::format_duration(backoff),
                    error = %e,
                    "Transient failure, retrying with backoff"
                );
                tokio::time::sleep(backoff).await;
                retry_attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::debug!(operation, retry_attempt, "No retries remaining");
                }
                return Err(e);
            }
        }
    }
}
