//! Exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::BackendError;

/// How often and how patiently a failed request is retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based). A server-provided
    /// `Retry-After` is honoured when it is longer than the backoff.
    pub fn delay_for(&self, retry: u32, error: &BackendError) -> Duration {
        let factor = 1_u64.checked_shl(retry).unwrap_or(u64::MAX);
        let backoff = Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        );
        match error {
            BackendError::RateLimited {
                retry_after: Some(wait),
            } => backoff.max(*wait),
            _ => backoff,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure {
    /// Transient failures used up every attempt.
    Exhausted { error: BackendError, attempts: u32 },
    /// A failure that retrying cannot fix.
    Fatal(BackendError),
    /// Cancellation was observed before another attempt.
    Cancelled,
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts or
/// `cancel` fires. No new attempt starts after cancellation.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RetryFailure::Fatal(e)),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= attempts {
            return Err(RetryFailure::Exhausted { error, attempts });
        }

        let delay = policy.delay_for(attempt - 1, &error);
        warn!(attempt, ?delay, %error, "transient backend failure, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
