//! Ranking agent
//!
//! Runs pairwise tournament comparisons between hypotheses and persists
//! the outcome of every match.

use crate::artifacts::{ComparisonResult, Hypothesis};
use crate::client::TaskClient;
use crate::{Agent, AgentConfig, AgentTask};
use async_trait::async_trait;
use coscient_core::{AgentError, AgentType, CoscientResult};
use coscient_memory::{AgentOutput, ContextMemory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub struct RankingAgent {
    client: TaskClient,
    memory: Arc<ContextMemory>,
    #[allow(dead_code)]
    config: AgentConfig,
    comparison_count: AtomicU64,
}

impl RankingAgent {
    pub fn new(client: TaskClient, memory: Arc<ContextMemory>, config: AgentConfig) -> Self {
        Self {
            client,
            memory,
            config,
            comparison_count: AtomicU64::new(0),
        }
    }

    pub fn comparison_count(&self) -> u64 {
        self.comparison_count.load(Ordering::SeqCst)
    }

    /// Compare two hypotheses and persist the match result.
    pub async fn compare(
        &self,
        first: &Hypothesis,
        second: &Hypothesis,
        criteria: &[String],
    ) -> CoscientResult<ComparisonResult> {
        self.comparison_count.fetch_add(1, Ordering::SeqCst);

        let result = self.client.compare_hypotheses(first, second, criteria).await?;

        let mut output = AgentOutput::new(
            AgentType::Ranking,
            format!("{}_vs_{}", first.id, second.id),
        );
        output.results.insert(
            "comparison".to_string(),
            serde_json::to_value(&result).unwrap_or(Value::Null),
        );
        output.results.insert("winner".to_string(), json!(result.winner));

        let stored = self.memory.store_agent_output(output).await;
        if !stored.success {
            warn!("failed to persist comparison: {:?}", stored.error);
        }

        Ok(result)
    }
}

#[async_trait]
impl Agent for RankingAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Ranking
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

        let result = self.compare(&first, &second, &[]).await?;
        Ok(serde_json::to_value(&result).unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for RankingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingAgent")
            .field("comparison_count", &self.comparison_count())
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

    fn hypothesis(id: &str) -> Hypothesis {
        serde_json::from_value(json!({"id": id, "summary": id})).unwrap()
    }

    #[tokio::test]
    async fn comparison_round_trip() {
        let (_dir, memory) = temp_memory().await;
        let mut mock = MockConfiguration::new();
        mock.add_response(
            MockPattern::any(),
            MockResponse::new(r#"{"winner": "h2", "rationale": "testable sooner"}"#),
        );
        let agent = RankingAgent::new(
            TaskClient::new(Arc::new(MockProvider::new(mock))),
            Arc::clone(&memory),
            AgentConfig::default(),
        );

        let result = agent
            .compare(&hypothesis("h1"), &hypothesis("h2"), &[])
            .await
            .unwrap();
        assert_eq!(result.winner, "h2");
        assert_eq!(agent.comparison_count(), 1);

        let stats = memory.get_iteration_statistics(1).await.unwrap();
        assert_eq!(stats.agent_type_breakdown["ranking"], 1);
    }

    #[tokio::test]
    async fn execute_requires_both_hypotheses() {
        let (_dir, memory) = temp_memory().await;
        let agent = RankingAgent::new(
            TaskClient::new(Arc::new(MockProvider::default())),
            memory,
            AgentConfig::default(),
        );

        let task = AgentTask::new("t1", "rank")
            .with_parameter("first", json!({"id": "h1", "summary": "s"}));
        let err = agent.execute(task).await.unwrap_err();
        assert!(err.to_string().contains("second"));
    }
}
