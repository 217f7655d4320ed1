//! Retry policy (C2): exponential backoff with jitter over any async
//! oracle call, splitting errors into retryable and permanent.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::OracleError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Jitter fraction in `[0, 1]`; delay is scaled by `1 + U[-jitter, +jitter]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: 0.3,
        }
    }
}

/// Delay before attempt `n` (0-based retry count, i.e. `n=0` is the delay
/// before the first retry after the initial attempt failed).
fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(suggested) = retry_after {
        return suggested;
    }
    let base_ms = config.initial_delay.as_millis() as f64;
    let exp_ms = base_ms * config.backoff_factor.powi(attempt as i32);
    let capped_ms = exp_ms.min(config.max_delay.as_millis() as f64);

    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    let delay_ms = (capped_ms * factor).max(0.0) as u64;
    Duration::from_millis(delay_ms)
}

/// Run `op` up to `config.max_retries + 1` times. Stops on success, a
/// non-retryable error, or retry exhaustion.
pub async fn run<F, Fut, T>(config: &RetryConfig, mut op: F) -> Result<T, OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OracleError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = backoff_delay(config, attempt, err.retry_after());
                tracing::warn!(attempt, max_retries = config.max_retries, delay_ms = delay.as_millis() as u64, error = %err, "retrying oracle call");
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

    #[tokio::test]
    async fn stops_after_single_attempt_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<(), OracleError> = run(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Unauthorized("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let result = run(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OracleError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let result: Result<(), OracleError> = run(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::ServerError { status: 503 }) }
        })
        .await;
        assert!(matches!(result, Err(OracleError::ServerError { status: 503 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
