//! Unified oracle transport: one request/response shape across LLM
//! backends, wrapped in a retry policy, a circuit breaker, and an
//! ordered-fallback dispatcher (C1-C4).

pub mod backends;
pub mod breaker;
pub mod error;
pub mod fallback;
pub mod retry;
pub mod transport;
pub mod types;

pub use backends::claude::ClaudeOracle;
pub use backends::openai_compat::OpenAiCompatOracle;
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStateKind};
pub use error::OracleError;
pub use fallback::OracleFallback;
pub use retry::RetryConfig;
pub use transport::{Oracle, OracleStream};
pub use types::{
    ChatMessage, OracleRequest, OracleResponse, Role, StopReason, StreamChunk, ToolCall, ToolDefinition,
};

use std::sync::Arc;

use wayforge_core::config::schema::{OracleBackend, OracleProviderConfig};

/// Build the ordered fallback chain from environment-derived provider
/// configuration, in the priority order `OracleProviderConfig::from_env`
/// returns them.
pub fn fallback_from_env() -> Option<OracleFallback> {
    let providers = OracleProviderConfig::from_env();
    if providers.is_empty() {
        return None;
    }

    let oracles: Vec<Arc<dyn Oracle>> = providers
        .into_iter()
        .map(|p| -> Arc<dyn Oracle> {
            match p.backend {
                OracleBackend::Claude => Arc::new(ClaudeOracle::new(p.api_base, p.api_key, p.model)),
                OracleBackend::OpenAiCompat => Arc::new(OpenAiCompatOracle::new(p.api_base, p.api_key, p.model)),
            }
        })
        .collect();

    Some(OracleFallback::new(oracles, CircuitBreakerConfig::default(), RetryConfig::default()))
}
