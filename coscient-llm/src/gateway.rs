//! Argo gateway provider
//!
//! Routes typed requests to an OpenAI-compatible proxy, wrapping every call
//! in the reliability envelope: validation, capability check, per-model
//! circuit breaker with an outage queue, rate limiting, retry with
//! categorized backoff, and ranked fallback across alternative models.

use crate::breaker::{BreakerStateInfo, CircuitBreaker};
use crate::call_log::{CallLogger, CallRecord};
use crate::providers::Provider;
use crate::queue::RequestQueue;
use crate::rate_limit::{RateLimitConfig, RateLimiter, TokenBucketRateLimiter};
use crate::retry::RetryEngine;
use crate::selector::ModelSelector;
use crate::validation::validate_llm_request;
use async_trait::async_trait;
use coscient_core::{
    CapabilityManager, CapabilityRequirements, ErrorCategory, GatewayConfig, GatewayError,
    LlmRequest, LlmResponse, ModelCapabilities, RequestType, RetryConfig, TokenUsage,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Models routed through the gateway, in fallback preference order.
const GATEWAY_MODELS: [&str; 7] = [
    "gpto3",
    "gpt4o",
    "claudeopus4",
    "claudesonnet4",
    "gemini25pro",
    "gemini25flash",
    "gpt35",
];

/// Reasoning-class models take `max_completion_tokens` instead of
/// `max_tokens` and ignore sampling temperature.
const REASONING_MODELS: [&str; 1] = ["gpto3"];

const QUEUED_SENTINEL: &str = "Request queued for processing when service recovers";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ModelsEntry {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelsEntry>,
}

/// Strip the gateway namespace prefix from a model id.
fn strip_argo_prefix(id: &str) -> &str {
    id.strip_prefix("argo:").unwrap_or(id)
}

fn argo_capability_table() -> CapabilityManager {
    let caps = |ctx: u64, out: u64| ModelCapabilities {
        max_context: ctx,
        max_output_tokens: out,
        multimodal: false,
        streaming: false,
        function_calling: false,
        supports_json_mode: false,
        supports_temperature: true,
        cost_per_1k_input_tokens: 0.0,
        cost_per_1k_output_tokens: 0.0,
    };

    let mut manager = CapabilityManager::new();
    manager.register_model("gpto3", {
        let mut c = caps(200_000, 100_000).with_json_mode(true).with_costs(0.015, 0.06);
        c.supports_temperature = false;
        c
    });
    manager.register_model(
        "gpt4o",
        caps(128_000, 16_384)
            .with_flags(true, false, true)
            .with_json_mode(true)
            .with_costs(0.005, 0.015),
    );
    manager.register_model(
        "gpt35",
        caps(16_385, 4_096)
            .with_flags(false, false, true)
            .with_json_mode(true)
            .with_costs(0.0005, 0.0015),
    );
    manager.register_model(
        "claudeopus4",
        caps(200_000, 32_000).with_flags(true, false, false).with_costs(0.015, 0.075),
    );
    manager.register_model(
        "claudesonnet4",
        caps(200_000, 64_000).with_flags(true, false, false).with_costs(0.003, 0.015),
    );
    manager.register_model(
        "gemini25pro",
        caps(1_048_576, 65_536)
            .with_flags(true, false, true)
            .with_json_mode(true)
            .with_costs(0.0035, 0.0105),
    );
    manager.register_model(
        "gemini25flash",
        caps(1_048_576, 65_536)
            .with_flags(true, false, true)
            .with_json_mode(true)
            .with_costs(0.000075, 0.0003),
    );
    manager
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Gateway provider for an Argo-style OpenAI-compatible proxy.
pub struct ArgoGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    selector: Arc<ModelSelector>,
    capabilities: CapabilityManager,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    rate_limiter: Arc<dyn RateLimiter>,
    queue: Arc<RequestQueue>,
    retry: RetryEngine,
    call_log: Option<CallLogger>,
    default_model: String,
}

impl ArgoGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let rate_limiter = TokenBucketRateLimiter::new(RateLimitConfig::default())
            .map_err(|e| GatewayError::Connection { message: e.to_string() })?;
        Self::with_rate_limiter(config, Arc::new(rate_limiter))
    }

    /// Construct with a caller-provided rate limiter implementation.
    pub fn with_rate_limiter(
        config: GatewayConfig,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self, GatewayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(user) = &config.auth_user {
            let value = reqwest::header::HeaderValue::from_str(user).map_err(|e| {
                GatewayError::Connection {
                    message: format!("invalid ARGO_AUTH_USER: {e}"),
                }
            })?;
            headers.insert("X-User-Id", value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Connection { message: e.to_string() })?;

        let breakers = GATEWAY_MODELS
            .iter()
            .map(|model| {
                (
                    model.to_string(),
                    Arc::new(CircuitBreaker::new(*model, 3, Duration::from_secs(60), 2)),
                )
            })
            .collect();

        let retry = RetryEngine::new(
            RetryConfig {
                max_retries: config.max_retries,
                ..Default::default()
            },
            GATEWAY_MODELS.iter().map(|m| m.to_string()).collect(),
        );

        Ok(Self {
            client,
            selector: Arc::new(ModelSelector::new()),
            capabilities: argo_capability_table(),
            breakers,
            rate_limiter,
            queue: Arc::new(RequestQueue::new(config.queue_max_size, config.queue_max_wait)),
            retry,
            call_log: None,
            default_model: "gpt4o".to_string(),
            config,
        })
    }

    pub fn with_call_logger(mut self, logger: CallLogger) -> Self {
        self.call_log = Some(logger);
        self
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Update model availability in the selector.
    pub fn mark_model_status(&self, model: &str, available: bool) {
        if available {
            self.selector.mark_model_available(model);
        } else {
            self.selector.mark_model_unavailable(model);
        }
    }

    pub async fn circuit_breaker_status(&self) -> HashMap<String, BreakerStateInfo> {
        let mut status = HashMap::new();
        for (model, breaker) in &self.breakers {
            status.insert(model.clone(), breaker.state_info().await);
        }
        status
    }

    pub async fn reset_circuit_breaker(&self, model: &str) {
        if let Some(breaker) = self.breakers.get(model) {
            breaker.reset().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn breaker(&self, model: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(model)
    }

    // ------------------------------------------------------------------
    // Connectivity probes
    // ------------------------------------------------------------------

    /// Probe the `/models` endpoint with a short timeout.
    pub async fn test_connectivity(&self) -> bool {
        let url = format!("{}/models", self.config.proxy_url);
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Verify access to specific models via `/models`.
    ///
    /// Upstream ids may be bare or `argo:`-prefixed; matching strips the
    /// prefix on both sides.
    pub async fn verify_model_access(
        &self,
        models: &[&str],
    ) -> Result<HashMap<String, bool>, GatewayError> {
        let url = format!("{}/models", self.config.proxy_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            GatewayError::Connection {
                message: format!("failed to verify model access: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(GatewayError::Connection {
                message: format!("/models returned status {}", response.status()),
            });
        }

        let listing: ModelsResponse = response.json().await.map_err(|e| {
            GatewayError::InvalidResponse { reason: e.to_string() }
        })?;

        let known: std::collections::HashSet<String> = listing
            .models
            .iter()
            .map(|m| strip_argo_prefix(&m.id).to_string())
            .collect();

        Ok(models
            .iter()
            .map(|m| (m.to_string(), known.contains(strip_argo_prefix(m))))
            .collect())
    }

    /// Fetch detailed health status from the gateway's `/health` endpoint.
    pub async fn health_status(&self) -> Result<Value, GatewayError> {
        let url = format!("{}/health", self.config.proxy_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| GatewayError::Connection {
                message: format!("failed to get health status: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Connection {
                message: format!("/health returned status {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse { reason: e.to_string() })
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    fn estimate_tokens(request: &LlmRequest) -> u64 {
        let context_len = serde_json::to_string(&request.content.context)
            .map(|s| s.len())
            .unwrap_or(0);
        ((request.content.prompt.len() + context_len) / 4) as u64
    }

    fn error_response(request_id: &str, err: &GatewayError) -> LlmResponse {
        match err {
            GatewayError::QueueFull => {
                LlmResponse::error(request_id, "QUEUE_FULL", err.to_string(), true)
            }
            _ => {
                let category = ErrorCategory::of(err);
                let code = match category {
                    ErrorCategory::RateLimit => "rate_limit_exceeded",
                    other => other.as_str(),
                };
                LlmResponse::error(request_id, code, err.to_string(), category.recoverable())
            }
        }
    }

    async fn execute(&self, request: LlmRequest, operation: RequestType) -> LlmResponse {
        let started = Instant::now();

        // 1. Validation. Failures never reach HTTP.
        let request = match validate_llm_request(&request) {
            Ok(sanitized) => sanitized,
            Err(e) => {
                return LlmResponse::error(request.request_id, "invalid_request", e.to_string(), false);
            }
        };
        let request_id = request.request_id.clone();

        // 2. Resolve the model from the explicit parameter or the selector.
        let model = match request.model_parameter() {
            Some(model) => model.to_string(),
            None => match self.selector.select_model_for_agent(request.agent_type) {
                Ok(model) => model,
                Err(e) => return Self::error_response(&request_id, &e),
            },
        };

        // 3. Capability check.
        let requirements = CapabilityRequirements {
            context_size: Self::estimate_tokens(&request),
            output_size: request.max_length(),
            ..Default::default()
        };
        if let Err(e) = self.capabilities.validate_request(&model, &requirements) {
            return LlmResponse::error(&request_id, "invalid_request", e.to_string(), false);
        }

        // 4. Open breaker: queue the request instead of calling upstream.
        if let Some(breaker) = self.breakers.get(&model) {
            if breaker.is_open().await {
                return match self.queue.enqueue(request.clone()).await {
                    Some(_receipt) => {
                        info!(model, request_id, "breaker open, request queued");
                        let mut metadata = Map::new();
                        metadata.insert("queued".to_string(), json!(true));
                        metadata.insert("queue_size".to_string(), json!(self.queue.size().await));
                        LlmResponse::success(&request_id, QUEUED_SENTINEL, metadata)
                    }
                    None => Self::error_response(&request_id, &GatewayError::QueueFull),
                };
            }
        }

        // 5. Rate limit (request + optional token budget).
        let estimated = Self::estimate_tokens(&request);
        match self.rate_limiter.acquire_for_request(&request, Some(estimated)).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                return LlmResponse::error(
                    &request_id,
                    "rate_limit_exceeded",
                    "Local rate limit exceeded",
                    true,
                );
            }
        }

        // 6-7. Call upstream with retry, then ranked model fallback.
        let outcome = self
            .retry
            .call_with_fallback(
                |candidate: String| {
                    let request = request.clone();
                    async move { self.call_model(&candidate, &request).await }
                },
                operation.as_str(),
                &model,
            )
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((response, used_model)) => {
                debug!(model = used_model, request_id, duration_ms, "gateway call succeeded");
                if let Some(log) = &self.call_log {
                    log.log_operation(&CallRecord::new(
                        &request_id,
                        &used_model,
                        operation.as_str(),
                        duration_ms,
                        true,
                    ));
                }
                response
            }
            Err(err) => {
                warn!(model, request_id, duration_ms, "gateway call failed: {err}");
                if let Some(log) = &self.call_log {
                    log.log_error(
                        &CallRecord::new(&request_id, &model, operation.as_str(), duration_ms, false)
                            .with_detail("error", json!(err.to_string())),
                    );
                }
                Self::error_response(&request_id, &err)
            }
        }
    }

    /// One model attempt: availability gate, breaker admission, HTTP call,
    /// usage accounting.
    async fn call_model(&self, model: &str, request: &LlmRequest) -> Result<LlmResponse, GatewayError> {
        if !self.selector.is_available(model) {
            return Err(GatewayError::CircuitOpen {
                model: model.to_string(),
            });
        }

        let response = match self.breakers.get(model) {
            Some(breaker) => {
                let result = breaker.call(self.chat_completion(model, request)).await;
                if matches!(result, Err(GatewayError::CircuitOpen { .. })) {
                    self.selector.mark_model_unavailable(model);
                }
                result?
            }
            None => self.chat_completion(model, request).await?,
        };

        let (content, usage) = response;
        self.selector
            .track_usage(model, usage.prompt_tokens, usage.completion_tokens);

        let mut metadata = Map::new();
        metadata.insert("model_used".to_string(), json!(model));
        metadata.insert("prompt_tokens".to_string(), json!(usage.prompt_tokens));
        metadata.insert("completion_tokens".to_string(), json!(usage.completion_tokens));
        metadata.insert("total_tokens".to_string(), json!(usage.total_tokens));
        metadata.insert(
            "cost".to_string(),
            json!(self.selector.estimated_cost(model, usage.prompt_tokens, usage.completion_tokens)),
        );
        Ok(LlmResponse::success(&request.request_id, content, metadata))
    }

    /// Raw chat-completions HTTP call.
    async fn chat_completion(
        &self,
        model: &str,
        request: &LlmRequest,
    ) -> Result<(String, TokenUsage), GatewayError> {
        let _guard = self.rate_limiter.concurrent_request()?;

        let mut body = Map::new();
        body.insert("model".to_string(), json!(model));
        // Providers reject system-only prompt lists; always send the prompt
        // as a user message.
        body.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": request.content.prompt}]),
        );

        let supports_temperature = self
            .capabilities
            .get_capabilities(model)
            .map(|c| c.supports_temperature)
            .unwrap_or(true);
        if supports_temperature {
            if let Some(t) = request.temperature() {
                body.insert("temperature".to_string(), json!(t));
            }
        }
        if let Some(max_length) = request.max_length() {
            let key = if REASONING_MODELS.contains(&model) {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body.insert(key.to_string(), json!(max_length));
        }
        if let Some(top_p) = request.content.parameters.get("top_p").and_then(Value::as_f64) {
            body.insert("top_p".to_string(), json!(top_p));
        }

        let url = format!("{}/chat/completions", self.config.proxy_url);
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout { message: e.to_string() }
            } else if e.is_connect() {
                GatewayError::Network { message: e.to_string() }
            } else {
                GatewayError::Connection { message: e.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(match status.as_u16() {
                401 | 403 => GatewayError::Authentication { message },
                429 => GatewayError::Http {
                    model: model.to_string(),
                    status: 429,
                    message,
                },
                code => GatewayError::Http {
                    model: model.to_string(),
                    status: code,
                    message,
                },
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse { reason: e.to_string() })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::InvalidResponse {
                reason: "no choices in completion".to_string(),
            })?;

        Ok((content, completion.usage.unwrap_or_default()))
    }

    // ------------------------------------------------------------------
    // Queue processing
    // ------------------------------------------------------------------

    /// Background task that drains queued requests once the corresponding
    /// breaker leaves OPEN. Runs until the shutdown signal flips.
    pub fn spawn_queue_processor(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {
                        let processed = gateway.process_queued_requests().await;
                        if processed > 0 {
                            info!(processed, "drained queued requests");
                        }
                    }
                }
            }
        })
    }

    /// Process queued requests whose model has recovered. Returns the
    /// number of requests completed (successfully or not).
    pub async fn process_queued_requests(&self) -> usize {
        let mut processed = 0;

        loop {
            let Some(entry) = self.queue.dequeue().await else {
                break;
            };

            let model = entry
                .request
                .model_parameter()
                .unwrap_or(&self.default_model)
                .to_string();

            if let Some(breaker) = self.breakers.get(&model) {
                if breaker.is_open().await {
                    // Model still down: put the entry back and stop.
                    self.queue.requeue(entry).await;
                    break;
                }
            }

            let result = self.call_model(&model, &entry.request).await;
            entry.complete(result);
            processed += 1;
        }

        processed
    }
}

#[async_trait]
impl Provider for ArgoGateway {
    async fn generate(&self, request: LlmRequest) -> LlmResponse {
        self.execute(request, RequestType::Generate).await
    }

    async fn analyze(&self, request: LlmRequest) -> LlmResponse {
        self.execute(request, RequestType::Analyze).await
    }

    async fn evaluate(&self, request: LlmRequest) -> LlmResponse {
        self.execute(request, RequestType::Evaluate).await
    }

    async fn compare(&self, request: LlmRequest) -> LlmResponse {
        self.execute(request, RequestType::Compare).await
    }

    fn capabilities(&self) -> Map<String, Value> {
        let mut caps = Map::new();
        caps.insert("provider".to_string(), json!("argo"));
        caps.insert("supports_streaming".to_string(), json!(false));
        caps.insert("supports_multimodal".to_string(), json!(true));
        caps.insert("supports_function_calling".to_string(), json!(true));
        caps.insert("models".to_string(), json!(GATEWAY_MODELS));
        caps.insert("max_retries".to_string(), json!(self.config.max_retries));
        caps.insert(
            "timeout".to_string(),
            json!(self.config.request_timeout.as_secs()),
        );
        caps
    }

    fn model_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("provider".to_string(), json!("argo"));
        info.insert("proxy_url".to_string(), json!(self.config.proxy_url));
        info.insert("available_models".to_string(), json!(self.selector.available_models()));
        info.insert("auth_configured".to_string(), json!(self.config.auth_user.is_some()));
        info
    }
}

impl std::fmt::Debug for ArgoGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgoGateway")
            .field("proxy_url", &self.config.proxy_url)
            .field("models", &GATEWAY_MODELS.len())
            .finish()
    }
}
