//! Generation agent
//!
//! Produces hypotheses via one of four strategies selected by explicit
//! parameter. Tracks a per-strategy success rate (exponentially weighted,
//! initialized at 0.5) and a generation counter, persists every artifact
//! into the active iteration, and reports each one to the safety logger.

use crate::artifacts::{Hypothesis, ResearchGoal};
use crate::client::TaskClient;
use crate::safety::SafetyLogger;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Exponential weight applied to strategy success-rate updates.
const SUCCESS_RATE_ALPHA: f64 = 0.2;

pub struct GenerationAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    safety_logger: Option<Arc<SafetyLogger>>,
    config: AgentConfig,
    generation_count: AtomicU64,
    strategy_success_rates: Mutex<HashMap<String, f64>>,
}

impl GenerationAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        let rates = config
            .generation_strategies
            .iter()
            .map(|s| (s.clone(), 0.5))
            .collect();
        Self {
            client,
            memory,
            safety_logger: None,
            config,
            generation_count: AtomicU64::new(0),
            strategy_success_rates: Mutex::new(rates),
        }
    }

    pub fn with_safety_logger(mut self, logger: Arc<SafetyLogger>) -> Self {
        self.safety_logger = Some(logger);
        self
    }

    pub fn generation_count(&self) -> u64 {
        self.generation_count.load(Ordering::SeqCst)
    }

    pub fn strategy_success_rates(&self) -> HashMap<String, f64> {
        match self.strategy_success_rates.lock() {
            Ok(rates) => rates.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_outcome(&self, method: &str, success: bool) {
        let mut rates = match self.strategy_success_rates.lock() {
            Ok(rates) => rates,
            Err(poisoned) => poisoned.into_inner(),
        };
        let rate = rates.entry(method.to_string()).or_insert(0.5);
        let observed = if success { 1.0 } else { 0.0 };
        *rate = *rate * (1.0 - SUCCESS_RATE_ALPHA) + observed * SUCCESS_RATE_ALPHA;
    }

    /// Generate one hypothesis using the named method.
    ///
    /// Unknown methods are rejected before any model call.
    pub async fn generate_hypothesis(
        &self,
        research_goal: &ResearchGoal,
        generation_method: &str,
        focus_area: Option<&str>,
        existing_hypotheses: &[Hypothesis],
    ) -> CoscientResult<Hypothesis> {
        if !self
            .config
            .generation_strategies
            .iter()
            .any(|s| s == generation_method)
        {
            return Err(AgentError::UnknownMethod {
                method: generation_method.to_string(),
            }
            .into());
        }

        self.generation_count.fetch_add(1, Ordering::SeqCst);

        let result = match generation_method {
            "literature_based" => {
                self.generate_from_literature(research_goal, focus_area, existing_hypotheses)
                    .await
            }
            "debate" => self.generate_from_debate(research_goal, existing_hypotheses).await,
            "assumptions" => {
                self.generate_from_assumptions(research_goal, existing_hypotheses).await
            }
            "expansion" => self.generate_from_expansion(research_goal, existing_hypotheses).await,
            other => Err(AgentError::UnknownMethod {
                method: other.to_string(),
            }
            .into()),
        };

        match result {
            Ok(mut hypothesis) => {
                hypothesis.generation_method = Some(generation_method.to_string());
                self.record_outcome(generation_method, true);

                if let Some(logger) = &self.safety_logger {
                    logger.log_artifact(
                        AgentType::Generation,
                        "hypothesis",
                        &serde_json::to_value(&hypothesis).unwrap_or(Value::Null),
                    );
                }

                self.persist(&hypothesis).await;
                info!(
                    hypothesis_id = hypothesis.id,
                    method = generation_method,
                    "generated hypothesis"
                );
                Ok(hypothesis)
            }
            Err(e) => {
                self.record_outcome(generation_method, false);
                Err(e)
            }
        }
    }

    async fn generate_from_literature(
        &self,
        goal: &ResearchGoal,
        focus_area: Option<&str>,
        existing: &[Hypothesis],
    ) -> CoscientResult<Hypothesis> {
        self.client
            .generate_hypothesis(
                &goal.description,
                &goal.constraints,
                existing,
                focus_area,
                "literature_based",
            )
            .await
    }

    async fn generate_from_debate(
        &self,
        goal: &ResearchGoal,
        existing: &[Hypothesis],
    ) -> CoscientResult<Hypothesis> {
        self.client
            .generate_hypothesis(&goal.description, &goal.constraints, existing, None, "debate")
            .await
    }

    async fn generate_from_assumptions(
        &self,
        goal: &ResearchGoal,
        existing: &[Hypothesis],
    ) -> CoscientResult<Hypothesis> {
        self.client
            .generate_hypothesis(&goal.description, &goal.constraints, existing, None, "assumptions")
            .await
    }

    async fn generate_from_expansion(
        &self,
        goal: &ResearchGoal,
        existing: &[Hypothesis],
    ) -> CoscientResult<Hypothesis> {
        self.client
            .generate_hypothesis(&goal.description, &goal.constraints, existing, None, "expansion")
            .await
    }

    async fn persist(&self, hypothesis: &Hypothesis) {
        let mut output = AgentOutput::new(AgentType::Generation, hypothesis.id.clone());
        output.results.insert(
            "hypothesis".to_string(),
            serde_json::to_value(hypothesis).unwrap_or(Value::Null),
        );
        output
            .results
            .insert("confidence".to_string(), json!(hypothesis.confidence));

        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!(
                hypothesis_id = hypothesis.id,
                "failed to persist hypothesis: {:?}",
                stored.error
            );
        }
    }
}

#[async_trait]
impl Agent for GenerationAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Generation
    }

    async fn execute(&self, task: AgentTask) -> CoscientResult<Value> {
        let goal = ResearchGoal {
            description: task.description.clone(),
            constraints: task
                .parameters
                .get("constraints")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };
        let method = task
            .parameters
            .get("generation_method")
            .and_then(Value::as_str)
            .unwrap_or("literature_based")
            .to_string();
        let focus = task
            .parameters
            .get("focus_area")
            .and_then(Value::as_str)
            .map(String::from);

        let hypothesis = self
            .generate_hypothesis(&goal, &method, focus.as_deref(), &[])
            .await?;
        Ok(serde_json::to_value(&hypothesis).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for GenerationAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationAgent")
            .field("generation_count", &self.generation_count())
            .finish()
    }
}
