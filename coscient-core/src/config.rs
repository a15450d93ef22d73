//! Configuration types
//!
//! Environment overrides are applied at construction only; after that the
//! configuration is an immutable value passed into the components that
//! need it.

use crate::{AgentType, ConfigError};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// GATEWAY CONFIG
// ============================================================================

/// Connection settings for the upstream model gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Base URL for the OpenAI-compatible proxy.
    pub proxy_url: String,
    /// Value for the `X-User-Id` header, when set.
    pub auth_user: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Cap on retry attempts.
    pub max_retries: u32,
    /// Capacity of the outage request queue.
    pub queue_max_size: usize,
    /// TTL for queued entries.
    pub queue_max_wait: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_url: "http://localhost:8000/v1".to_string(),
            auth_user: None,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            queue_max_size: 1000,
            queue_max_wait: Duration::from_secs(300),
        }
    }
}

impl GatewayConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `ARGO_PROXY_URL`: Base URL (default: `http://localhost:8000/v1`)
    /// - `ARGO_AUTH_USER`: Value for the `X-User-Id` header
    /// - `ARGO_REQUEST_TIMEOUT`: Per-request timeout seconds (default: 30)
    /// - `ARGO_MAX_RETRIES`: Retry cap (default: 3)
    /// - `ARGO_QUEUE_MAX_SIZE`: Queue capacity (default: 1000)
    /// - `ARGO_QUEUE_MAX_WAIT`: TTL per queued entry in seconds (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            proxy_url: std::env::var("ARGO_PROXY_URL").unwrap_or(defaults.proxy_url),
            auth_user: std::env::var("ARGO_AUTH_USER").ok().filter(|s| !s.is_empty()),
            request_timeout: std::env::var("ARGO_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: std::env::var("ARGO_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            queue_max_size: std::env::var("ARGO_QUEUE_MAX_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.queue_max_size),
            queue_max_wait: std::env::var("ARGO_QUEUE_MAX_WAIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.queue_max_wait),
        }
    }
}

// ============================================================================
// RETRY CONFIG
// ============================================================================

/// Backoff settings for the retry engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exponential_base <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "exponential_base".to_string(),
                value: self.exponential_base.to_string(),
                reason: "exponential_base must be positive".to_string(),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue {
                field: "max_delay".to_string(),
                value: format!("{:?}", self.max_delay),
                reason: "max_delay must be at least base_delay".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// MODEL ASSIGNMENTS
// ============================================================================

/// Models the gateway knows how to route to.
pub const KNOWN_MODELS: [&str; 7] = [
    "gpto3",
    "gpt4o",
    "gpt35",
    "claudeopus4",
    "claudesonnet4",
    "gemini25pro",
    "gemini25flash",
];

/// Default model plus per-agent overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAssignments {
    pub default_model: String,
    pub agent_models: HashMap<AgentType, String>,
}

impl Default for ModelAssignments {
    fn default() -> Self {
        Self {
            default_model: "gpto3".to_string(),
            agent_models: HashMap::new(),
        }
    }
}

impl ModelAssignments {
    /// Create from environment variables.
    ///
    /// - `DEFAULT_MODEL`: fallback model for every agent (default: `gpto3`)
    /// - `<AGENT>_MODEL` (e.g. `GENERATION_MODEL`, `META_REVIEW_MODEL`):
    ///   per-agent override
    pub fn from_env() -> Self {
        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpto3".to_string());

        let mut agent_models = HashMap::new();
        for agent in AgentType::ALL {
            let env_var = format!("{}_MODEL", agent.as_str().replace('-', "_").to_uppercase());
            if let Ok(model) = std::env::var(&env_var) {
                if !model.is_empty() {
                    agent_models.insert(agent, model);
                }
            }
        }

        Self {
            default_model,
            agent_models,
        }
    }

    /// The model to use for a specific agent type.
    pub fn model_for_agent(&self, agent: AgentType) -> &str {
        self.agent_models
            .get(&agent)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Validate that every configured model is in the known table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |model: &str| -> Result<(), ConfigError> {
            if KNOWN_MODELS.contains(&model) {
                Ok(())
            } else {
                Err(ConfigError::UnknownModel {
                    model: model.to_string(),
                })
            }
        };

        check(&self.default_model)?;
        for model in self.agent_models.values() {
            check(model)?;
        }
        Ok(())
    }
}

// ============================================================================
// MEMORY CONFIG
// ============================================================================

/// Settings for the Context Memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Days to retain active data before archival.
    pub retention_days: i64,
    /// Minutes between automatic checkpoints.
    pub checkpoint_interval_minutes: u64,
    /// Maximum storage size in gigabytes.
    pub max_storage_gb: u64,
    /// Bounded wait for the cross-process checkpoint lock.
    pub lock_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            checkpoint_interval_minutes: 5,
            max_storage_gb: 50,
            lock_timeout: Duration::from_secs(30),
        }
    }
}
