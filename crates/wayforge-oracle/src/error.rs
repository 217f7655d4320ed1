//! Oracle error taxonomy. Each backend maps its wire-level failures
//! deterministically onto this tag set; nothing above the transport layer
//! ever sees a backend-specific error type.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error ({status})")]
    ServerError { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Raised by a breaker in the Open state. The fallback layer (C4)
    /// consumes this and tries the next provider; it is only ever
    /// surfaced to callers above the fallback if every provider's
    /// breaker is Open (in which case it folds into `AllProvidersFailed`).
    #[error("circuit open")]
    CircuitOpen,

    /// Every provider in the fallback chain exhausted its retries or
    /// returned `CircuitOpen`.
    #[error("all providers failed: {}", summarize(.errors))]
    AllProvidersFailed { errors: Vec<(String, OracleError)> },
}

fn summarize(errors: &[(String, OracleError)]) -> String {
    errors
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl OracleError {
    /// Which error kinds are eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited { .. } | OracleError::ServerError { .. } | OracleError::Timeout | OracleError::Network(_)
        )
    }

    /// Server-suggested delay before retrying, if the backend provided one
    /// (e.g. a `Retry-After` header on a 429).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OracleError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
