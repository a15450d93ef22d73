//! Meta-review agent
//!
//! Synthesizes recurring patterns across a batch of reviews and stores the
//! resulting meta-review with the iteration it critiques.

use crate::artifacts::{ResearchPatterns, Review};
use crate::client::TaskClient;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use chrono::Utc;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory, MetaReview};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct MetaReviewAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    #[allow(dead_code)]
    config: AgentConfig,
    synthesis_count: AtomicU64,
}

impl MetaReviewAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        Self {
            client,
            memory,
            config,
            synthesis_count: AtomicU64::new(0),
        }
    }

    pub fn synthesis_count(&self) -> u64 {
        self.synthesis_count.load(Ordering::SeqCst)
    }

    /// Extract patterns from a batch of reviews and persist the
    /// meta-review into the iteration it belongs to.
    pub async fn synthesize(
        &self,
        iteration_number: u32,
        reviews: &[Review],
    ) -> CoscientResult<ResearchPatterns> {
        self.synthesis_count.fetch_add(1, Ordering::SeqCst);

        let patterns = self.client.extract_research_patterns(reviews).await?;

        let mut critique = Map::new();
        critique.insert("common_patterns".to_string(), json!(patterns.common_patterns));
        critique.insert(
            "agent_feedback".to_string(),
            Value::Object(patterns.agent_feedback.clone()),
        );
        let mut overview = Map::new();
        overview.insert("next_priorities".to_string(), json!(patterns.improvement_areas));
        overview.insert("reviews_considered".to_string(), json!(reviews.len()));

        let stored = self
            .memory
            .store_meta_review(MetaReview {
                iteration_number,
                timestamp: Utc::now(),
                critique,
                research_overview: overview,
            })
            .await;
        if !stored.success {
            warn!("failed to persist meta-review: {:?}", stored.error);
        }

        let mut output = AgentOutput::new(
            AgentType::MetaReview,
            format!("iteration_{iteration_number}"),
        );
        output.results.insert(
            "patterns".to_string(),
            serde_json::to_value(&patterns).unwrap_or(Value::Null),
        );
        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!("failed to persist pattern extraction: {:?}", stored.error);
        }

        Ok(patterns)
    }
}

#[async_trait]
impl Agent for MetaReviewAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::MetaReview
    }

    async fn execute(&self, task: AgentTask) -> CoscientResult<Value> {
        let reviews: Vec<Review> = task
            .parameters
            .get("reviews")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let iteration_number = match task.parameters.get("iteration_number").and_then(Value::as_u64)
        {
            Some(n) => n as u32,
            None => self.memory.get_active_iteration().await.ok_or_else(|| {
                AgentError::DecodeFailed {
                    artifact: "MetaReview".to_string(),
                    reason: "no iteration_number given and no iteration active".to_string(),
                }
            })?,
        };

        let patterns = self.synthesize(iteration_number, &reviews).await?;
        Ok(serde_json::to_value(&patterns).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for MetaReviewAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaReviewAgent")
            .field("synthesis_count", &self.synthesis_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ReviewType;
    use coscient_core::MemoryConfig;
    use coscient_llm::{MockConfiguration, MockPattern, MockProvider, MockResponse};

    fn review(id: &str) -> Review {
        Review {
            hypothesis_id: id.to_string(),
            review_type: ReviewType::Initial,
            scores: Map::new(),
            narrative: String::new(),
            decision: None,
        }
    }

    #[tokio::test]
    async fn synthesis_stores_meta_review_and_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        memory.start_new_iteration().await.unwrap();

        let mut mock = MockConfiguration::new();
        mock.add_response(
            MockPattern::any(),
            MockResponse::new(
                r#"{"common_patterns": ["weak controls"],
                    "improvement_areas": ["add replication"]}"#,
            ),
        );
        let agent = MetaReviewAgent::new(
            TaskClient::new(Arc::new(MockProvider::new(mock))),
            Arc::clone(&memory),
            AgentConfig::default(),
        );

        let patterns = agent.synthesize(1, &[review("h1"), review("h2")]).await.unwrap();
        assert_eq!(patterns.common_patterns, vec!["weak controls"]);
        assert_eq!(agent.synthesis_count(), 1);

        // Meta-review landed in the iteration and is visible both as
        // feedback and in the statistics.
        let feedback = memory.retrieve_feedback(1, None).await.unwrap();
        assert_eq!(
            feedback.feedback_content["general_recommendations"],
            json!(["weak controls"])
        );
        let stats = memory.get_iteration_statistics(1).await.unwrap();
        assert!(stats.has_meta_review);
        assert_eq!(stats.agent_type_breakdown["meta-review"], 1);
    }

    #[tokio::test]
    async fn execute_defaults_to_active_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        memory.start_new_iteration().await.unwrap();

        let mut mock = MockConfiguration::new();
        mock.add_response(MockPattern::any(), MockResponse::new(r#"{"common_patterns": []}"#));
        let agent = MetaReviewAgent::new(
            TaskClient::new(Arc::new(MockProvider::new(mock))),
            Arc::clone(&memory),
            AgentConfig::default(),
        );

        let artifact = agent.execute(AgentTask::new("t1", "synthesize")).await.unwrap();
        assert_eq!(artifact["common_patterns"], json!([]));
        assert!(memory.get_iteration_statistics(1).await.unwrap().has_meta_review);
    }
}
