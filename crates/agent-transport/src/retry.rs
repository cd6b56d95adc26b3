// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter for idempotent transport calls.
//!
//! Mirrors the shape used by the descriptor resolver's retry loop: a fixed
//! backoff schedule, an overall deadline, and a caller-supplied predicate for
//! which errors are worth retrying at all.

use agent_error::{AgentError, ErrorCode};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Backoff schedule and ceiling for a retry loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay never exceeds this, regardless of attempt count.
    pub max_delay: Duration,
    /// The whole operation — initial attempt plus every retry — must finish
    /// within this window.
    pub overall_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether `err` is worth retrying at all.
///
/// Only transient, retry-safe faults qualify: network failures, timeouts,
/// and upstream 5xx-equivalent errors. Caller faults (bad input, not found,
/// unauthorized, validation) never do.
pub fn is_retryable(err: &AgentError) -> bool {
    matches!(
        err.code,
        ErrorCode::NetworkError | ErrorCode::TimeoutError | ErrorCode::UpstreamError
    )
}

/// Exponential delay with jitter for `attempt` (0-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(config.max_delay.as_millis());

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u128;
    let jitter_pct = nanos % 25;
    let jittered = capped.saturating_mul(100 + jitter_pct) / 100;

    Duration::from_millis(jittered.min(config.max_delay.as_millis()) as u64)
}

/// Run `op` with exponential backoff, retrying only while `retryable(&err)`
/// holds and the overall deadline hasn't elapsed.
pub async fn retry_async<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    retryable: impl Fn(&AgentError) -> bool,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let deadline = Instant::now() + config.overall_timeout;
    let mut attempt = 0u32;

    loop {
        debug!(
            target: "agent.transport.retry",
            attempt,
            max_retries = config.max_retries,
            "attempting operation"
        );
        match op().await {
            Ok(value) => {
                debug!(target: "agent.transport.retry", attempt, "operation succeeded");
                return Ok(value);
            }
            Err(err) => {
                if !retryable(&err) {
                    warn!(
                        target: "agent.transport.retry",
                        attempt,
                        error = %err,
                        "non-retryable error, giving up"
                    );
                    return Err(err);
                }
                if attempt >= config.max_retries {
                    warn!(
                        target: "agent.transport.retry",
                        attempt,
                        max_retries = config.max_retries,
                        error = %err,
                        "max retries exhausted"
                    );
                    return Err(err);
                }
                let delay = compute_delay(config, attempt);
                if Instant::now() + delay >= deadline {
                    warn!(
                        target: "agent.transport.retry",
                        attempt,
                        error = %err,
                        "overall deadline would be exceeded, giving up"
                    );
                    return Err(err);
                }
                warn!(
                    target: "agent.transport.retry",
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn network_err() -> AgentError {
        AgentError::new(ErrorCode::NetworkError, "connection reset")
    }

    fn caller_err() -> AgentError {
        AgentError::new(ErrorCode::InvalidInput, "bad request")
    }

    #[test]
    fn is_retryable_accepts_transient_faults() {
        assert!(is_retryable(&network_err()));
        assert!(is_retryable(&AgentError::new(ErrorCode::TimeoutError, "x")));
        assert!(is_retryable(&AgentError::new(ErrorCode::UpstreamError, "x")));
    }

    #[test]
    fn is_retryable_rejects_caller_faults() {
        assert!(!is_retryable(&caller_err()));
    }

    #[test]
    fn compute_delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(30),
        };
        let d0 = compute_delay(&config, 0);
        let d3 = compute_delay(&config, 3);
        assert!(d0.as_millis() >= 100);
        assert!(d3.as_millis() <= 500 * 125 / 100);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            overall_timeout: Duration::from_secs(5),
        };
        let calls_clone = calls.clone();
        let result = retry_async(
            &config,
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(network_err())
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default();
        let calls_clone = calls.clone();
        let result: Result<(), AgentError> = retry_async(
            &config,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(caller_err())
                }
            },
            is_retryable,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            overall_timeout: Duration::from_secs(5),
        };
        let calls_clone = calls.clone();
        let result: Result<(), AgentError> = retry_async(
            &config,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(network_err())
                }
            },
            is_retryable,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
