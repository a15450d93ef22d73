//! Proximity agent
//!
//! Scores pairwise similarity between hypotheses so the scheduler can
//! cluster near-duplicates before tournament ranking.

use crate::artifacts::{Hypothesis, SimilarityScore};
use crate::client::TaskClient;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct ProximityAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    #[allow(dead_code)]
    config: AgentConfig,
    similarity_count: AtomicU64,
}

impl ProximityAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        Self {
            client,
            memory,
            config,
            similarity_count: AtomicU64::new(0),
        }
    }

    pub fn similarity_count(&self) -> u64 {
        self.similarity_count.load(Ordering::SeqCst)
    }

    /// Score the similarity of two hypotheses and persist the result.
    pub async fn similarity(
        &self,
        first: &Hypothesis,
        second: &Hypothesis,
    ) -> CoscientResult<SimilarityScore> {
        self.similarity_count.fetch_add(1, Ordering::SeqCst);

        let score = self.client.calculate_similarity(first, second).await?;

        let mut output = AgentOutput::new(
            AgentType::Proximity,
            format!("{}_{}", first.id, second.id),
        );
        output.results.insert(
            "similarity".to_string(),
            serde_json::to_value(&score).unwrap_or(Value::Null),
        );
        output.results.insert("score".to_string(), json!(score.score));

        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!("failed to persist similarity score: {:?}", stored.error);
        }

        Ok(score)
    }
}

#[async_trait]
impl Agent for ProximityAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Proximity
    }

    async fn execute(&self, task: AgentTask) -> CoscientResult<Value> {
        let pair = |name: &str| -> CoscientResult<Hypothesis> {
            task.parameters
                .get(name)
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| {
                    AgentError::DecodeFailed {
                        artifact: "Hypothesis".to_string(),
                        reason: format!("task is missing the {name} parameter"),
                    }
                    .into()
                })
        };
        let first = pair("first")?;
        let second = pair("second")?;

        let score = self.similarity(&first, &second).await?;
        Ok(serde_json::to_value(&score).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for ProximityAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityAgent")
            .field("similarity_count", &self.similarity_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coscient_core::MemoryConfig;
    use coscient_llm::{MockConfiguration, MockPattern, MockProvider, MockResponse};

    #[tokio::test]
    async fn similarity_is_scored_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        memory.start_new_iteration().await.unwrap();

        let mut mock = MockConfiguration::new();
        mock.add_response(
            MockPattern::any(),
            MockResponse::new(
                r#"{"hypothesis_a": "h1", "hypothesis_b": "h2", "score": 0.85,
                    "shared_concepts": ["membrane transport"]}"#,
            ),
        );
        let agent = ProximityAgent::new(
            TaskClient::new(Arc::new(MockProvider::new(mock))),
            Arc::clone(&memory),
            AgentConfig::default(),
        );

        let first: Hypothesis = serde_json::from_value(json!({"id": "h1", "summary": "a"})).unwrap();
        let second: Hypothesis = serde_json::from_value(json!({"id": "h2", "summary": "b"})).unwrap();

        let score = agent.similarity(&first, &second).await.unwrap();
        assert!((score.score - 0.85).abs() < 1e-9);
        assert_eq!(agent.similarity_count(), 1);

        // The numeric score is queryable through aggregate statistics.
        let stats = memory
            .compute_aggregate_statistics(AgentType::Proximity, "score")
            .await
            .unwrap();
        assert_eq!(stats.count, 1);
        assert!((stats.average - 0.85).abs() < 1e-9);
    }
}
