pub mod claude;
pub mod openai_compat;

use crate::error::OracleError;

/// Map an HTTP status code onto the uniform error taxonomy. Shared by both
/// backends since the mapping is format-independent.
pub(crate) fn map_status_error(status: reqwest::StatusCode, body: String) -> OracleError {
    match status.as_u16() {
        401 | 403 => OracleError::Unauthorized(body),
        429 => OracleError::RateLimited { retry_after: None },
        s if s >= 500 => OracleError::ServerError { status: s },
        _ => OracleError::Malformed(format!("unexpected status {status}: {body}")),
    }
}

pub(crate) fn map_request_error(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Network(err.to_string())
    }
}
