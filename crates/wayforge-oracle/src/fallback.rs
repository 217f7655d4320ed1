//! Oracle fallback (C4): ordered multi-oracle dispatch guarded by the
//! circuit breaker, routed through the retry policy, trying each
//! provider in sequence with per-provider breaker state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::OracleError;
use crate::retry::RetryConfig;
use crate::transport::{Oracle, OracleStream};
use crate::types::{OracleRequest, OracleResponse};

struct Provider {
    oracle: Arc<dyn Oracle>,
    breaker: CircuitBreaker,
}

/// Holds an ordered list of protected providers and dispatches each
/// request through the first one whose breaker admits it.
pub struct OracleFallback {
    providers: Vec<Provider>,
    retry_config: RetryConfig,
    /// Failures never reorder the provider list, only breaker state
    /// changes. Kept as an explicit
    /// field (rather than always starting from 0) so an operator-facing
    /// admin operation could repoint the primary in the future; nothing
    /// in this implementation currently mutates it.
    current_index: AtomicUsize,
}

impl OracleFallback {
    pub fn new(oracles: Vec<Arc<dyn Oracle>>, breaker_config: CircuitBreakerConfig, retry_config: RetryConfig) -> Self {
        let providers = oracles
            .into_iter()
            .map(|oracle| Provider { oracle, breaker: CircuitBreaker::new(breaker_config.clone()) })
            .collect();
        Self { providers, retry_config, current_index: AtomicUsize::new(0) }
    }

    fn order(&self) -> impl Iterator<Item = &Provider> {
        let start = self.current_index.load(Ordering::Relaxed);
        self.providers.iter().cycle().skip(start).take(self.providers.len())
    }

    /// First provider in priority order, regardless of circuit state —
    /// `count_tokens`/`context_window` always delegate here.
    fn primary(&self) -> Option<&Provider> {
        self.providers.first()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.primary().map(|p| p.oracle.count_tokens(text)).unwrap_or(0)
    }

    pub fn context_window(&self) -> usize {
        self.primary().map(|p| p.oracle.context_window()).unwrap_or(0)
    }

    pub async fn chat(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        self.dispatch(|p| {
            let request = request.clone();
            async move { p.oracle.chat(request).await }
        })
        .await
    }

    pub async fn chat_with_tools(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        self.dispatch(|p| {
            let request = request.clone();
            async move { p.oracle.chat_with_tools(request).await }
        })
        .await
    }

    async fn dispatch<'a, F, Fut>(&'a self, call: F) -> Result<OracleResponse, OracleError>
    where
        F: Fn(&'a Provider) -> Fut,
        Fut: std::future::Future<Output = Result<OracleResponse, OracleError>>,
    {
        let mut errors = Vec::new();

        for provider in self.order() {
            let retry_config = &self.retry_config;
            let result = provider
                .breaker
                .execute(|| {
                    let call = &call;
                    async move { crate::retry::run(retry_config, || call(provider)).await }
                })
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(provider = provider.oracle.name(), error = %err, "oracle provider failed");
                    errors.push((provider.oracle.name().to_string(), err));
                }
            }
        }

        Err(OracleError::AllProvidersFailed { errors })
    }

    /// Streaming has a weaker fallback contract: once a chunk has been
    /// emitted, the fallback commits to that provider. Only the attempt
    /// to *start* the stream is retried across providers.
    pub async fn stream(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        let mut errors = Vec::new();

        for provider in self.order() {
            let retry_config = &self.retry_config;
            let req = request.clone();
            let result = provider
                .breaker
                .execute(|| {
                    let req = req.clone();
                    async move { crate::retry::run(retry_config, || { let req = req.clone(); async move { provider.oracle.stream(req).await } }).await }
                })
                .await;

            match result {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    tracing::warn!(provider = provider.oracle.name(), error = %err, "oracle provider failed to start stream");
                    errors.push((provider.oracle.name().to_string(), err));
                }
            }
        }

        Err(OracleError::AllProvidersFailed { errors })
    }
}
