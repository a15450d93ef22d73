//! Request/response envelopes for the LLM gateway

use crate::{AgentType, RequestType, ResponseStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// REQUEST
// ============================================================================

/// Content payload of a gateway request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContent {
    /// The natural-language prompt.
    pub prompt: String,
    /// Arbitrary structured context made available to the model.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Call parameters (model, temperature, max_length, response_format, ...).
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl RequestContent {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Map::new(),
            parameters: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Typed request routed through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub request_id: String,
    pub agent_type: AgentType,
    pub request_type: RequestType,
    pub content: RequestContent,
}

impl LlmRequest {
    pub fn new(
        request_id: impl Into<String>,
        agent_type: AgentType,
        request_type: RequestType,
        content: RequestContent,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            agent_type,
            request_type,
            content,
        }
    }

    /// Explicit model override from the request parameters, if any.
    pub fn model_parameter(&self) -> Option<&str> {
        self.content.parameters.get("model").and_then(Value::as_str)
    }

    /// Sampling temperature from the request parameters, if any.
    pub fn temperature(&self) -> Option<f64> {
        self.content.parameters.get("temperature").and_then(Value::as_f64)
    }

    /// Output length cap from the request parameters, if any.
    pub fn max_length(&self) -> Option<u64> {
        self.content.parameters.get("max_length").and_then(Value::as_u64)
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Error triple carried inside an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmErrorInfo {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl LlmErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable,
        }
    }
}

/// Successful payload of a gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Typed response returned by the gateway.
///
/// Exactly one of `response` / `error` is populated for a terminal status;
/// `request_id` always echoes the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub request_id: String,
    pub status: ResponseStatus,
    pub response: Option<ResponsePayload>,
    pub error: Option<LlmErrorInfo>,
}

impl LlmResponse {
    pub fn success(
        request_id: impl Into<String>,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            response: Some(ResponsePayload {
                content: content.into(),
                metadata,
            }),
            error: None,
        }
    }

    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Error,
            response: None,
            error: Some(LlmErrorInfo::new(code, message, recoverable)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// True when this is the queued-for-later sentinel, not a final artifact.
    pub fn is_queued(&self) -> bool {
        self.response
            .as_ref()
            .and_then(|r| r.metadata.get("queued"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn content(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.content.as_str())
    }
}

// ============================================================================
// USAGE
// ============================================================================

/// Token usage reported by an upstream endpoint for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Accumulated per-model usage. All fields are monotonically non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub request_count: u64,
    pub total_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        let content = RequestContent::new("prompt")
            .with_parameter("model", Value::from("gpt4o"))
            .with_parameter("temperature", Value::from(0.3));
        LlmRequest::new("req-1", AgentType::Generation, RequestType::Generate, content)
    }

    #[test]
    fn model_parameter_is_read_from_content() {
        assert_eq!(request().model_parameter(), Some("gpt4o"));
        assert_eq!(request().temperature(), Some(0.3));
    }

    #[test]
    fn success_response_shape() {
        let resp = LlmResponse::success("req-1", "hello", Map::new());
        assert!(resp.is_success());
        assert!(!resp.is_queued());
        assert_eq!(resp.content(), Some("hello"));
        assert!(resp.error.is_none());
    }

    #[test]
    fn error_response_shape() {
        let resp = LlmResponse::error("req-1", "invalid_request", "bad", false);
        assert!(!resp.is_success());
        assert!(resp.response.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, "invalid_request");
        assert!(!err.recoverable);
    }

    #[test]
    fn queued_sentinel_is_detected() {
        let mut metadata = Map::new();
        metadata.insert("queued".to_string(), Value::from(true));
        let resp = LlmResponse::success("req-1", "queued", metadata);
        assert!(resp.is_queued());
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = request();
        let json = serde_json::to_string(&req).unwrap();
        let back: LlmRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
