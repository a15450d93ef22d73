//! Mock provider for testing
//!
//! Responses, response sequences, and errors can be configured per request
//! pattern; unmatched requests get a deterministic default response. All
//! calls are counted.

use async_trait::async_trait;
use coscient_core::{AgentType, LlmErrorInfo, LlmRequest, LlmResponse, RequestType, ResponseStatus};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Provider;

/// Configuration for a single mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    /// Simulated response delay.
    pub delay: Duration,
}

impl MockResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn to_response(&self, request_id: &str) -> LlmResponse {
        let metadata = self.metadata.clone().unwrap_or_else(|| {
            let mut m = Map::new();
            m.insert("model_used".to_string(), json!("mock-model-v1"));
            m.insert(
                "tokens_used".to_string(),
                json!(self.content.split_whitespace().count()),
            );
            m
        });
        LlmResponse::success(request_id, self.content.clone(), metadata)
    }
}

/// Pattern matched against incoming requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockPattern {
    pub agent_type: Option<AgentType>,
    pub request_type: Option<RequestType>,
}

impl MockPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_agent(agent_type: AgentType) -> Self {
        Self {
            agent_type: Some(agent_type),
            request_type: None,
        }
    }

    fn matches(&self, request: &LlmRequest) -> bool {
        self.agent_type.map_or(true, |a| a == request.agent_type)
            && self.request_type.map_or(true, |r| r == request.request_type)
    }
}

enum Behavior {
    Respond(MockResponse),
    Sequence(Vec<MockResponse>, AtomicUsize),
    Fail(LlmErrorInfo),
}

/// Configuration for mock provider behavior.
#[derive(Default)]
pub struct MockConfiguration {
    rules: Vec<(MockPattern, Behavior)>,
    pub default_delay: Duration,
}

impl MockConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&mut self, pattern: MockPattern, response: MockResponse) {
        self.rules.push((pattern, Behavior::Respond(response)));
    }

    /// Responses are served round-robin for matching requests.
    pub fn add_sequence(&mut self, pattern: MockPattern, responses: Vec<MockResponse>) {
        self.rules
            .push((pattern, Behavior::Sequence(responses, AtomicUsize::new(0))));
    }

    pub fn add_error(&mut self, pattern: MockPattern, error: LlmErrorInfo) {
        self.rules.push((pattern, Behavior::Fail(error)));
    }

    fn respond(&self, request: &LlmRequest) -> Option<LlmResponse> {
        for (pattern, behavior) in &self.rules {
            if !pattern.matches(request) {
                continue;
            }
            return Some(match behavior {
                Behavior::Respond(response) => response.to_response(&request.request_id),
                Behavior::Sequence(responses, cursor) => {
                    let index = cursor.fetch_add(1, Ordering::SeqCst) % responses.len();
                    responses[index].to_response(&request.request_id)
                }
                Behavior::Fail(error) => LlmResponse {
                    request_id: request.request_id.clone(),
                    status: ResponseStatus::Error,
                    response: None,
                    error: Some(error.clone()),
                },
            });
        }
        None
    }
}

/// Mock implementation of `Provider` for testing.
pub struct MockProvider {
    configuration: MockConfiguration,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(configuration: MockConfiguration) -> Self {
        Self {
            configuration,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn respond(&self, request: LlmRequest, operation: RequestType) -> LlmResponse {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(response) = self.configuration.respond(&request) {
            return response;
        }

        if !self.configuration.default_delay.is_zero() {
            tokio::time::sleep(self.configuration.default_delay).await;
        }

        let content = match operation {
            RequestType::Generate => format!(
                "Generated mock content for {} request",
                request.agent_type
            ),
            RequestType::Analyze => "Mock analysis: the content is well-formed".to_string(),
            RequestType::Evaluate => "Mock evaluation: score 0.8".to_string(),
            RequestType::Compare => "Mock comparison: first item preferred".to_string(),
        };

        let mut metadata = Map::new();
        metadata.insert("model_used".to_string(), json!("mock-model-v1"));
        metadata.insert("tokens_used".to_string(), json!(content.split_whitespace().count()));
        LlmResponse::success(request.request_id.clone(), content, metadata)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MockConfiguration::new())
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, request: LlmRequest) -> LlmResponse {
        self.respond(request, RequestType::Generate).await
    }

    async fn analyze(&self, request: LlmRequest) -> LlmResponse {
        self.respond(request, RequestType::Analyze).await
    }

    async fn evaluate(&self, request: LlmRequest) -> LlmResponse {
        self.respond(request, RequestType::Evaluate).await
    }

    async fn compare(&self, request: LlmRequest) -> LlmResponse {
        self.respond(request, RequestType::Compare).await
    }

    fn capabilities(&self) -> Map<String, Value> {
        let mut caps = Map::new();
        caps.insert("provider".to_string(), json!("mock"));
        caps.insert("supports_streaming".to_string(), json!(false));
        caps.insert("supports_multimodal".to_string(), json!(false));
        caps.insert("supports_function_calling".to_string(), json!(false));
        caps.insert("models".to_string(), json!(["mock-model-v1"]));
        caps
    }

    fn model_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("provider".to_string(), json!("mock"));
        info.insert("model".to_string(), json!("mock-model-v1"));
        info
    }
}
