//! Evolution agent
//!
//! Produces improved variants of existing hypotheses along a chosen
//! enhancement focus and persists every variant.

use crate::artifacts::Hypothesis;
use crate::client::TaskClient;
use crate::safety::SafetyLogger;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct EvolutionAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    safety_logger: Option<Arc<SafetyLogger>>,
    #[allow(dead_code)]
    config: AgentConfig,
    enhancement_count: AtomicU64,
}

impl EvolutionAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        Self {
            client,
            memory,
            safety_logger: None,
            config,
            enhancement_count: AtomicU64::new(0),
        }
    }

    pub fn with_safety_logger(mut self, logger: Arc<SafetyLogger>) -> Self {
        self.safety_logger = Some(logger);
        self
    }

    pub fn enhancement_count(&self) -> u64 {
        self.enhancement_count.load(Ordering::SeqCst)
    }

    /// Enhance a hypothesis along the given focus.
    pub async fn enhance(
        &self,
        hypothesis: &Hypothesis,
        enhancement_focus: &str,
    ) -> CoscientResult<Hypothesis> {
        self.enhancement_count.fetch_add(1, Ordering::SeqCst);

        let enhanced = self.client.enhance_hypothesis(hypothesis, enhancement_focus).await?;

        if let Some(logger) = &self.safety_logger {
            logger.log_artifact(
                AgentType::Evolution,
                "hypothesis",
                &serde_json::to_value(&enhanced).unwrap_or(Value::Null),
            );
        }

        let mut output = AgentOutput::new(AgentType::Evolution, enhanced.id.clone());
        output.results.insert(
            "hypothesis".to_string(),
            serde_json::to_value(&enhanced).unwrap_or(Value::Null),
        );
        output
            .results
            .insert("parent_id".to_string(), json!(hypothesis.id));
        output
            .results
            .insert("enhancement_focus".to_string(), json!(enhancement_focus));

        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!("failed to persist enhanced hypothesis: {:?}", stored.error);
        }

        Ok(enhanced)
    }
}

#[async_trait]
impl Agent for EvolutionAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Evolution
    }

    async fn execute(&self, task: AgentTask) -> CoscientResult<Value> {
        let hypothesis: Hypothesis = task
            .parameters
            .get("hypothesis")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| AgentError::DecodeFailed {
                artifact: "Hypothesis".to_string(),
                reason: "task is missing a hypothesis parameter".to_string(),
            })?;
        let focus = task
            .parameters
            .get("enhancement_focus")
            .and_then(Value::as_str)
            .unwrap_or("feasibility")
            .to_string();

        let enhanced = self.enhance(&hypothesis, &focus).await?;
        Ok(serde_json::to_value(&enhanced).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for EvolutionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionAgent")
            .field("enhancement_count", &self.enhancement_count())
            .finish()
    }
}
