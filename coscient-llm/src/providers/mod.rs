//! Provider contract and implementations

mod mock;

pub use mock::{MockConfiguration, MockPattern, MockProvider, MockResponse};

use async_trait::async_trait;
use coscient_core::{LlmRequest, LlmResponse};
use serde_json::{Map, Value};

/// A pluggable implementation of the gateway contract for a specific
/// upstream surface.
///
/// Every operation returns a typed `LlmResponse`; provider internals never
/// leak errors past this boundary.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate new content based on the request.
    async fn generate(&self, request: LlmRequest) -> LlmResponse;

    /// Analyze existing content based on the request.
    async fn analyze(&self, request: LlmRequest) -> LlmResponse;

    /// Evaluate content against specified criteria.
    async fn evaluate(&self, request: LlmRequest) -> LlmResponse;

    /// Compare multiple items based on specified criteria.
    async fn compare(&self, request: LlmRequest) -> LlmResponse;

    /// Capabilities of this provider (streaming, multimodal, models, ...).
    fn capabilities(&self) -> Map<String, Value>;

    /// Provider metadata (name, endpoint, configured models, ...).
    fn model_info(&self) -> Map<String, Value>;
}
