//! COSCIENT LLM - Gateway and Reliability Envelope
//!
//! Provider-agnostic gateway that routes typed requests to upstream model
//! endpoints. Features:
//! - Request validation and sanitization
//! - Per-model circuit breakers and rate limits
//! - Bounded outage queue with deferred-delivery futures
//! - Retry with error categorization and ranked fallback
//! - Model selection with usage/cost tracking
//! - Health monitoring with breaker reset on recovery

mod breaker;
mod call_log;
mod gateway;
mod health;
mod queue;
mod rate_limit;
mod registry;
mod retry;
mod selector;
mod validation;

pub mod providers;

pub use breaker::{BreakerStateInfo, CircuitBreaker, CircuitState};
pub use call_log::{CallLogConfig, CallLogger, CallRecord};
pub use gateway::ArgoGateway;
pub use health::{HealthMonitor, HealthMonitorHandle, HealthMonitorStats, HealthProbe, StatusChangeCallback};
pub use providers::{MockConfiguration, MockPattern, MockProvider, MockResponse, Provider};
pub use queue::{QueuedReceipt, RequestQueue};
pub use rate_limit::{
    ConcurrencyGuard, RateLimitConfig, RateLimiter, SlidingWindowRateLimiter,
    TokenBucketRateLimiter,
};
pub use registry::ProviderRegistry;
pub use retry::{ErrorRecord, FallbackAttempt, RetryEngine};
pub use selector::ModelSelector;
pub use validation::{validate_llm_request, validate_parameters, validate_request, sanitize_text};
