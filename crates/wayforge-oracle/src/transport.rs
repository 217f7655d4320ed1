//! Oracle transport (C1): the abstraction every concrete backend
//! implements, and the only layer allowed to speak a backend-specific
//! wire format.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::OracleError;
use crate::types::{OracleRequest, OracleResponse, StreamChunk};

pub type OracleStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, OracleError>> + Send>>;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Human-readable name used in logs and `AllProvidersFailed` reports.
    fn name(&self) -> &str;

    async fn chat(&self, request: OracleRequest) -> Result<OracleResponse, OracleError>;

    /// Identical to `chat`, but the request is expected to carry `tools`.
    /// Kept as a distinct entry point even though this implementation's
    /// `chat` already honors `request.tools` when present.
    async fn chat_with_tools(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        self.chat(request).await
    }

    async fn stream(&self, request: OracleRequest) -> Result<OracleStream, OracleError>;

    async fn stream_with_tools(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        self.stream(request).await
    }

    /// Heuristic token count, never used for billing.
    fn count_tokens(&self, text: &str) -> usize;

    fn context_window(&self) -> usize;

    /// Cheap reachability probe, independent of circuit-breaker state.
    async fn is_available(&self) -> bool {
        true
    }
}
