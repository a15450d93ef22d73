//! COSCIENT Agents - Agent Envelope
//!
//! The uniform contract every specialized agent honors: accept a typed
//! task, call the gateway through the typed task client, convert the reply
//! into a canonical domain artifact, persist it into the active iteration,
//! and honor safety checks.

mod artifacts;
mod client;
mod evolution;
mod generation;
mod meta_review;
mod proximity;
mod ranking;
mod reflection;
mod safety;

pub use artifacts::*;
pub use client::TaskClient;
pub use evolution::EvolutionAgent;
pub use generation::GenerationAgent;
pub use meta_review::MetaReviewAgent;
pub use proximity::ProximityAgent;
pub use ranking::RankingAgent;
pub use reflection::{review_profile, ReflectionAgent, ReviewProfile};
pub use safety::{SafetyLogEntry, SafetyLogger};

use async_trait::async_trait;
use coscient_core::{AgentType, CoscientResult};
use serde_json::{Map, Value};
use std::time::Duration;

// ============================================================================
// AGENT CONFIG
// ============================================================================

/// Per-agent tunables, overridable from a configuration map at
/// construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub max_retries: u32,
    pub confidence_threshold: f64,
    pub generation_timeout: Duration,
    pub enable_caching: bool,
    pub generation_strategies: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confidence_threshold: 0.7,
            generation_timeout: Duration::from_secs(300),
            enable_caching: false,
            generation_strategies: vec![
                "literature_based".to_string(),
                "debate".to_string(),
                "assumptions".to_string(),
                "expansion".to_string(),
            ],
        }
    }
}

impl AgentConfig {
    /// Apply overrides from a configuration map; unknown keys are ignored.
    pub fn from_map(overrides: &Map<String, Value>) -> Self {
        let mut config = Self::default();

        if let Some(n) = overrides.get("max_retries").and_then(Value::as_u64) {
            config.max_retries = n as u32;
        }
        if let Some(t) = overrides.get("confidence_threshold").and_then(Value::as_f64) {
            config.confidence_threshold = t;
        }
        if let Some(secs) = overrides.get("generation_timeout").and_then(Value::as_u64) {
            config.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = overrides.get("enable_caching").and_then(Value::as_bool) {
            config.enable_caching = flag;
        }
        if let Some(strategies) = overrides.get("generation_strategies").and_then(Value::as_array) {
            let parsed: Vec<String> = strategies
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            if !parsed.is_empty() {
                config.generation_strategies = parsed;
            }
        }

        config
    }
}

// ============================================================================
// AGENT TASK & TRAIT
// ============================================================================

/// A unit of work dispatched to an agent by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTask {
    pub task_id: String,
    pub description: String,
    pub parameters: Map<String, Value>,
}

impl AgentTask {
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Uniform surface of a specialized agent.
///
/// `execute` produces the structured artifact for the task; persistence of
/// the artifact into the active iteration is the implementation's
/// responsibility.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    async fn execute(&self, task: AgentTask) -> CoscientResult<Value>;
}
