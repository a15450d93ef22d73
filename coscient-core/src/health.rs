//! Unified health check types
//!
//! Shared between the gateway's `/health` probe and the health monitor so
//! both speak the same status vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Health status for a service or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded
    Degraded,
    /// Component is not operational
    Unhealthy,
    /// Health status is unknown (e.g., not yet checked)
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Parse an upstream status string; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-model availability entry from the gateway health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ModelHealth {
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

/// Parsed result of the gateway `/health` probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Per-model availability, when the endpoint reports it.
    #[serde(default)]
    pub models: HashMap<String, ModelHealth>,
    /// Everything else the endpoint returned.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl HealthReport {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(HealthReport {
            status: HealthStatus::Unknown,
            models: HashMap::new(),
            extra: HashMap::new(),
        })
    }
}
