//! Error types for COSCIENT operations

use crate::AgentType;
use thiserror::Error;

/// Validation errors for incoming requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} exceeds maximum size: {size} > {limit}")]
    SizeExceeded { field: String, size: usize, limit: usize },
}

/// Gateway and reliability-layer errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("Circuit breaker is OPEN for {model}")]
    CircuitOpen { model: String },

    #[error("Rate limit exceeded: {reason}")]
    RateLimitExceeded { reason: String },

    #[error("Request queue is full")]
    QueueFull,

    #[error("Request expired in queue after {waited_secs}s")]
    RequestExpired { waited_secs: u64 },

    #[error("{model} cannot satisfy {field}: limit {limit}, requested {requested}")]
    CapabilityMismatch {
        model: String,
        field: String,
        limit: u64,
        requested: u64,
    },

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("Request to {model} failed with status {status}: {message}")]
    Http {
        model: String,
        status: u16,
        message: String,
    },

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Model error from {model}: {message}")]
    Model { model: String, message: String },

    #[error("Invalid response from upstream: {reason}")]
    InvalidResponse { reason: String },

    #[error("No models available for task: {task}")]
    NoModelsAvailable { task: String },

    #[error("Provider '{name}' not found")]
    ProviderNotFound { name: String },

    #[error("Provider '{name}' is already registered")]
    ProviderAlreadyRegistered { name: String },

    #[error("Connection to gateway failed: {message}")]
    Connection { message: String },
}

/// Context Memory errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Storage limit exceeded")]
    StorageLimitExceeded,

    #[error("Iteration {number} is already active")]
    ActiveIterationExists { number: u32 },

    #[error("Iteration {number} not found")]
    IterationNotFound { number: u32 },

    #[error("Failed to acquire checkpoint lock within {timeout_secs}s")]
    LockTimeout { timeout_secs: u64 },

    #[error("Checkpoint {id} is invalid: {reason}")]
    CheckpointInvalid { id: String, reason: String },

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl MemoryError {
    /// Wrap an `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        MemoryError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Model '{model}' is not in the known model table")]
    UnknownModel { model: String },
}

/// Agent envelope errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Unknown generation method: {method}")]
    UnknownMethod { method: String },

    #[error("Agent {agent_type} is not registered")]
    NotRegistered { agent_type: AgentType },

    #[error("Failed to decode {artifact} from model output: {reason}")]
    DecodeFailed { artifact: String, reason: String },

    #[error("LLM call failed ({code}): {message}")]
    Llm { code: String, message: String },

    #[error("Task queue is full")]
    QueueFull,
}

/// Master error type for all COSCIENT errors.
#[derive(Debug, Clone, Error)]
pub enum CoscientError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Result type alias for COSCIENT operations.
pub type CoscientResult<T> = Result<T, CoscientError>;

// ============================================================================
// ERROR CATEGORIZATION
// ============================================================================

/// Error category used by the retry engine to decide recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    InvalidRequest,
    Authentication,
    Network,
    Model,
    CircuitOpen,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Network => "network",
            ErrorCategory::Model => "model_error",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether errors of this category are worth retrying with backoff.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Model
                | ErrorCategory::Unknown
        )
    }

    /// Categorize a typed gateway error.
    pub fn of(err: &GatewayError) -> ErrorCategory {
        match err {
            GatewayError::Timeout { .. } => ErrorCategory::Timeout,
            GatewayError::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            GatewayError::CapabilityMismatch { .. } | GatewayError::UnknownModel { .. } => {
                ErrorCategory::InvalidRequest
            }
            GatewayError::Authentication { .. } => ErrorCategory::Authentication,
            GatewayError::Network { .. } | GatewayError::Connection { .. } => ErrorCategory::Network,
            GatewayError::Model { .. } | GatewayError::InvalidResponse { .. } => ErrorCategory::Model,
            GatewayError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            GatewayError::Http { status, message, .. } => Self::of_status(*status, message),
            _ => ErrorCategory::Unknown,
        }
    }

    fn of_status(status: u16, message: &str) -> ErrorCategory {
        match status {
            429 => ErrorCategory::RateLimit,
            400 => ErrorCategory::InvalidRequest,
            401 | 403 => ErrorCategory::Authentication,
            408 | 504 => ErrorCategory::Timeout,
            _ => Self::of_message(message),
        }
    }

    /// Substring categorization for free-form error text reported upstream.
    pub fn of_message(message: &str) -> ErrorCategory {
        let m = message.to_lowercase();
        if m.contains("timeout") || m.contains("timed out") {
            ErrorCategory::Timeout
        } else if m.contains("rate limit") || m.contains("429") {
            ErrorCategory::RateLimit
        } else if m.contains("invalid request") || m.contains("400") {
            ErrorCategory::InvalidRequest
        } else if m.contains("authentication") || m.contains("401") || m.contains("403") {
            ErrorCategory::Authentication
        } else if m.contains("network") || m.contains("connection") {
            ErrorCategory::Network
        } else if m.contains("model") {
            ErrorCategory::Model
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
