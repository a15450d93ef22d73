//! Reflection agent
//!
//! Reviews hypotheses from a chosen perspective. Each review type carries
//! its own tool/timeout profile; every produced review is persisted into
//! the active iteration and reported to the safety logger.

use crate::artifacts::{Hypothesis, Review, ReviewType};
use crate::client::TaskClient;
use crate::safety::SafetyLogger;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Execution profile for one review perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewProfile {
    pub use_tools: bool,
    pub timeout: Duration,
}

/// Tool/timeout profile per review type.
pub fn review_profile(review_type: ReviewType) -> ReviewProfile {
    match review_type {
        ReviewType::Initial => ReviewProfile {
            use_tools: false,
            timeout: Duration::from_secs(60),
        },
        ReviewType::Full => ReviewProfile {
            use_tools: true,
            timeout: Duration::from_secs(300),
        },
        ReviewType::DeepVerification => ReviewProfile {
            use_tools: true,
            timeout: Duration::from_secs(600),
        },
        ReviewType::Observation => ReviewProfile {
            use_tools: false,
            timeout: Duration::from_secs(120),
        },
        ReviewType::Simulation => ReviewProfile {
            use_tools: false,
            timeout: Duration::from_secs(300),
        },
        ReviewType::Tournament => ReviewProfile {
            use_tools: false,
            timeout: Duration::from_secs(60),
        },
    }
}

pub struct ReflectionAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    safety_logger: Option<Arc<SafetyLogger>>,
    config: AgentConfig,
    review_count: AtomicU64,
}

impl ReflectionAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        Self {
            client,
            memory,
            safety_logger: None,
            config,
            review_count: AtomicU64::new(0),
        }
    }

    pub fn with_safety_logger(mut self, logger: Arc<SafetyLogger>) -> Self {
        self.safety_logger = Some(logger);
        self
    }

    pub fn review_count(&self) -> u64 {
        self.review_count.load(Ordering::SeqCst)
    }

    /// Review a hypothesis from the given perspective.
    pub async fn review_hypothesis(
        &self,
        hypothesis: &Hypothesis,
        review_type: ReviewType,
        criteria: &[String],
    ) -> CoscientResult<Review> {
        self.review_count.fetch_add(1, Ordering::SeqCst);

        let review = self
            .client
            .evaluate_hypothesis(hypothesis, review_type, criteria)
            .await?;

        if let Some(logger) = &self.safety_logger {
            logger.log_artifact(
                AgentType::Reflection,
                "review",
                &serde_json::to_value(&review).unwrap_or(Value::Null),
            );
        }

        let mut output = AgentOutput::new(AgentType::Reflection, review.hypothesis_id.clone());
        output.results.insert(
            "review".to_string(),
            serde_json::to_value(&review).unwrap_or(Value::Null),
        );
        if let Some(score) = review.scores.get("overall").and_then(Value::as_f64) {
            output.results.insert("score".to_string(), json!(score));
            if score < self.config.confidence_threshold {
                info!(
                    hypothesis_id = review.hypothesis_id,
                    score, "review below confidence threshold"
                );
            }
        }

        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!("failed to persist review: {:?}", stored.error);
        }

        Ok(review)
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Reflection
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
        let review_type = task
            .parameters
            .get("review_type")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(ReviewType::Initial);

        let review = self.review_hypothesis(&hypothesis, review_type, &[]).await?;
        Ok(serde_json::to_value(&review).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for ReflectionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionAgent")
            .field("review_count", &self.review_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coscient_core::MemoryConfig;
    use coscient_llm::{MockConfiguration, MockPattern, MockProvider, MockResponse};

    async fn temp_memory() -> (tempfile::TempDir, Arc<ContextMemory>) {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        memory.start_new_iteration().await.unwrap();
        (dir, memory)
    }

    fn review_client() -> TaskClient {
        let mut config = MockConfiguration::new();
        config.add_response(
            MockPattern::any(),
            MockResponse::new(
                r#"{"hypothesis_id": "h1", "review_type": "initial",
                    "scores": {"overall": 0.4}, "narrative": "weak protocol"}"#,
            ),
        );
        TaskClient::new(Arc::new(MockProvider::new(config)))
    }

    fn hypothesis() -> Hypothesis {
        serde_json::from_value(json!({"id": "h1", "summary": "s"})).unwrap()
    }

    #[test]
    fn every_review_type_has_a_profile() {
        let types = [
            ReviewType::Initial,
            ReviewType::Full,
            ReviewType::DeepVerification,
            ReviewType::Observation,
            ReviewType::Simulation,
            ReviewType::Tournament,
        ];
        for t in types {
            let profile = review_profile(t);
            assert!(profile.timeout > Duration::ZERO);
        }
        assert!(!review_profile(ReviewType::Initial).use_tools);
        assert_eq!(review_profile(ReviewType::Initial).timeout, Duration::from_secs(60));
        assert!(review_profile(ReviewType::Full).use_tools);
        assert_eq!(review_profile(ReviewType::Full).timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn reviews_are_persisted_and_counted() {
        let (_dir, memory) = temp_memory().await;
        let agent = ReflectionAgent::new(review_client(), Arc::clone(&memory), AgentConfig::default());

        let review = agent
            .review_hypothesis(&hypothesis(), ReviewType::Initial, &[])
            .await
            .unwrap();
        assert_eq!(review.hypothesis_id, "h1");
        assert_eq!(agent.review_count(), 1);

        let stats = memory.get_iteration_statistics(1).await.unwrap();
        assert_eq!(stats.agent_type_breakdown["reflection"], 1);
    }

    #[tokio::test]
    async fn execute_requires_a_hypothesis() {
        let (_dir, memory) = temp_memory().await;
        let agent = ReflectionAgent::new(review_client(), memory, AgentConfig::default());

        let err = agent.execute(AgentTask::new("t1", "review")).await.unwrap_err();
        assert!(err.to_string().contains("hypothesis"));

        let task = AgentTask::new("t2", "review")
            .with_parameter("hypothesis", json!({"id": "h1", "summary": "s"}));
        let artifact = agent.execute(task).await.unwrap();
        assert_eq!(artifact["hypothesis_id"], json!("h1"));
    }
}
