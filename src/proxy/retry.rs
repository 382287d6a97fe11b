//! Bounded retry for transient network failures
//!
//! Retries use exponential backoff: `initial_backoff * 2^attempt`, capped at
//! `max_backoff`, plus 0-50% random jitter so instances racing on the same
//! IAM and TTS endpoints spread out. Only errors where [`CertcacheError::is_transient`] holds
//! are retried; everything else returns immediately so the workflow can take
//! its own fallback path.

use crate::config::schema::HttpConfig;
use crate::error::{CertcacheError, CertcacheResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry limits for one outbound call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let capped = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);

        let jitter_range = capped.as_millis() as u64 / 2;
        if jitter_range == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range))
    }
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Run `operation`, retrying transient failures per `policy`
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> CertcacheResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CertcacheResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map a non-success status to `make(status)`
pub(crate) fn check_status(
    response: &reqwest::Response,
    make: impl FnOnce(u16) -> CertcacheError,
) -> CertcacheResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(make(status.as_u16()))
    }
}
