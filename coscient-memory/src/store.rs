//! State-update and agent-output writes
//!
//! Filenames encode a UTC-microsecond timestamp; an exclusive-create loop
//! appends `_k` suffixes until a fresh name is found, so concurrent
//! writers never collide and readers see a total order.

use crate::memory::{read_json, write_json, write_json_new, ContextMemory};
use crate::records::{
    AgentOutput, FeedbackData, MetaReview, RetrievedState, StateUpdate, StorageResult,
    StoredAgentOutput, StoredStateUpdate, RECORD_VERSION,
};
use coscient_core::AgentType;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

impl ContextMemory {
    /// Directory receiving writes: the active iteration when one exists,
    /// otherwise the most recent ("current") iteration.
    async fn write_dir(&self) -> PathBuf {
        let name = match self.get_active_iteration().await {
            Some(number) => Self::iteration_dir_name(number),
            None => self.current_iteration_name(),
        };
        self.iterations_dir().join(name)
    }

    /// Create `<dir>/<stem>[_k].json` exclusively, bumping `k` until an
    /// unused name is found. Returns the path written.
    fn write_unique<T: serde::Serialize>(
        dir: &PathBuf,
        stem: &str,
        record: &T,
    ) -> Result<PathBuf, coscient_core::MemoryError> {
        let mut candidate = dir.join(format!("{stem}.json"));
        let mut counter = 0u32;
        loop {
            if write_json_new(&candidate, record)? {
                return Ok(candidate);
            }
            counter += 1;
            candidate = dir.join(format!("{stem}_{counter}.json"));
        }
    }

    /// Store a state update under the active iteration.
    pub async fn store_state_update(&self, update: StateUpdate) -> StorageResult {
        if !self.within_storage_limit() {
            error!("storage limit exceeded, cannot store state update");
            return StorageResult::fail("Storage limit exceeded");
        }

        let dir = self.write_dir().await;
        if let Err(e) = fs::create_dir_all(&dir) {
            return StorageResult::fail(e.to_string());
        }

        let timestamp_str = update.timestamp.format("%Y%m%d_%H%M%S_%6f").to_string();
        let stem = format!("system_state_{timestamp_str}");

        let stored = StoredStateUpdate {
            timestamp: update.timestamp,
            update_type: update.update_type,
            system_statistics: update.system_statistics,
            orchestration_state: update.orchestration_state,
            checkpoint_data: update.checkpoint_data,
            version: RECORD_VERSION,
            writer_id: update
                .writer_id
                .unwrap_or_else(|| format!("supervisor_{timestamp_str}")),
        };

        let path = match Self::write_unique(&dir, &stem, &stored) {
            Ok(path) => path,
            Err(e) => {
                error!("failed to store state update: {e}");
                return StorageResult::fail(e.to_string());
            }
        };

        self.indices
            .lock()
            .await
            .temporal
            .entry(stored.timestamp)
            .or_default()
            .push(path.clone());

        info!("stored state update in {}", path.display());
        StorageResult::ok(path)
    }

    /// Store output from a specialized agent under the active iteration.
    pub async fn store_agent_output(&self, output: AgentOutput) -> StorageResult {
        if !self.within_storage_limit() {
            error!("storage limit exceeded, cannot store agent output");
            return StorageResult::fail("Storage limit exceeded");
        }

        let dir = self.write_dir().await.join("agent_outputs");
        if let Err(e) = fs::create_dir_all(&dir) {
            return StorageResult::fail(e.to_string());
        }

        let stem = format!(
            "{}_{}_{}",
            output.agent_type,
            output.task_id,
            output.timestamp.format("%Y%m%d_%H%M%S")
        );

        let stored = StoredAgentOutput {
            writer_id: format!("{}_{}", output.agent_type, output.task_id),
            agent_type: output.agent_type,
            task_id: output.task_id,
            timestamp: output.timestamp,
            results: output.results,
            state_data: output.state_data,
            version: RECORD_VERSION,
        };

        let path = match Self::write_unique(&dir, &stem, &stored) {
            Ok(path) => path,
            Err(e) => {
                error!("failed to store agent output: {e}");
                return StorageResult::fail(e.to_string());
            }
        };

        self.indices
            .lock()
            .await
            .component
            .entry(stored.agent_type)
            .or_default()
            .push(path.clone());

        info!("stored agent output in {}", path.display());
        StorageResult::ok(path)
    }

    /// Store a meta-review into its iteration directory.
    pub async fn store_meta_review(&self, review: MetaReview) -> StorageResult {
        let dir = self
            .iterations_dir()
            .join(Self::iteration_dir_name(review.iteration_number));
        if let Err(e) = fs::create_dir_all(&dir) {
            return StorageResult::fail(e.to_string());
        }

        let path = dir.join("meta_review.json");
        match write_json(&path, &review) {
            Ok(()) => {
                info!("stored meta-review in {}", path.display());
                StorageResult::ok(path)
            }
            Err(e) => {
                error!("failed to store meta-review: {e}");
                StorageResult::fail(e.to_string())
            }
        }
    }

    /// Latest stored state update, if any.
    pub(crate) async fn latest_state(&self) -> Option<StoredStateUpdate> {
        let indices = self.indices.lock().await;
        for (_, paths) in indices.temporal.iter().rev() {
            for path in paths.iter().rev() {
                if let Ok(state) = read_json::<StoredStateUpdate>(path) {
                    return Some(state);
                }
            }
        }
        None
    }

    pub(crate) fn project_state(state: &StoredStateUpdate, request_type: &str) -> RetrievedState {
        let mut system_state = state.orchestration_state.clone();
        if let Some(progress) = state.system_statistics.get("tournament_progress") {
            system_state.insert("tournament_progress".to_string(), progress.clone());
        }

        let mut content = Map::new();
        content.insert("system_state".to_string(), Value::Object(system_state));
        content.insert(
            "statistics".to_string(),
            Value::Object(state.system_statistics.clone()),
        );
        content.insert("timestamp".to_string(), Value::from(state.timestamp.to_rfc3339()));

        RetrievedState {
            request_type: request_type.to_string(),
            timestamp_range: None,
            content,
        }
    }

    /// Retrieve the latest system state.
    pub async fn retrieve_state(&self) -> Option<RetrievedState> {
        self.latest_state()
            .await
            .map(|state| Self::project_state(&state, "latest"))
    }

    /// Retrieve meta-review feedback for an iteration.
    pub async fn retrieve_feedback(
        &self,
        iteration_requested: u32,
        agent_type: Option<AgentType>,
    ) -> Option<FeedbackData> {
        let path = self
            .iterations_dir()
            .join(Self::iteration_dir_name(iteration_requested))
            .join("meta_review.json");
        let review: MetaReview = read_json(&path).ok()?;

        let mut feedback_content = Map::new();
        if let Some(patterns) = review.critique.get("common_patterns") {
            feedback_content.insert("general_recommendations".to_string(), patterns.clone());
        }
        if let Some(agent_feedback) = review.critique.get("agent_feedback") {
            feedback_content.insert("agent_specific".to_string(), agent_feedback.clone());
        }
        if let Some(priorities) = review.research_overview.get("next_priorities") {
            feedback_content.insert("priority_improvements".to_string(), priorities.clone());
        }

        Some(FeedbackData {
            iteration_requested,
            agent_type,
            feedback_content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coscient_core::{MemoryConfig, UpdateType};
    use serde_json::json;
    use std::sync::Arc;

    async fn temp_memory() -> (tempfile::TempDir, Arc<ContextMemory>) {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        (dir, memory)
    }

    fn update_with(counter: i64, writer: &str) -> StateUpdate {
        let mut update = StateUpdate::new(UpdateType::Periodic).with_writer(writer);
        update
            .system_statistics
            .insert("counter".to_string(), json!(counter));
        update
    }

    #[tokio::test]
    async fn state_update_round_trips_byte_for_byte() {
        let (_dir, memory) = temp_memory().await;
        memory.start_new_iteration().await.unwrap();

        let result = memory.store_state_update(update_with(7, "A")).await;
        assert!(result.success, "{:?}", result.error);

        let path = result.storage_path.unwrap();
        let stored: StoredStateUpdate = read_json(&path).unwrap();
        assert_eq!(stored.system_statistics["counter"], json!(7));
        assert_eq!(stored.writer_id, "A");
        assert_eq!(stored.version, RECORD_VERSION);

        // The filename stem encodes the record's timestamp.
        let stem = path.file_stem().unwrap().to_str().unwrap();
        let encoded = stored.timestamp.format("%Y%m%d_%H%M%S_%6f").to_string();
        assert!(stem.contains(&encoded));

        // Byte-for-byte round trip through serialization.
        let bytes = std::fs::read(&path).unwrap();
        let reparsed: StoredStateUpdate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(serde_json::to_vec_pretty(&reparsed).unwrap(), bytes);
    }

    #[tokio::test]
    async fn concurrent_writes_get_distinct_filenames() {
        let (_dir, memory) = temp_memory().await;
        memory.start_new_iteration().await.unwrap();

        // Same timestamp on every record forces the `_k` suffix path.
        let shared_ts = Utc::now();
        let mut handles = Vec::new();
        for i in 0..8 {
            let memory = Arc::clone(&memory);
            handles.push(tokio::spawn(async move {
                let mut update = update_with(i, "writer");
                update.timestamp = shared_ts;
                memory.store_state_update(update).await
            }));
        }

        let mut paths = std::collections::HashSet::new();
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.success);
            assert!(paths.insert(result.storage_path.unwrap()));
        }
        assert_eq!(paths.len(), 8);
    }

    #[tokio::test]
    async fn agent_output_is_stored_and_indexed() {
        let (_dir, memory) = temp_memory().await;
        memory.start_new_iteration().await.unwrap();

        let mut output = AgentOutput::new(AgentType::Generation, "t1");
        output.results.insert("confidence".to_string(), json!(0.9));
        let result = memory.store_agent_output(output).await;
        assert!(result.success);

        let stored: StoredAgentOutput = read_json(&result.storage_path.unwrap()).unwrap();
        assert_eq!(stored.agent_type, AgentType::Generation);
        assert_eq!(stored.writer_id, "generation_t1");

        let stats = memory.get_iteration_statistics(1).await.unwrap();
        assert_eq!(stats.agent_outputs_count, 1);
        assert_eq!(stats.agent_type_breakdown["generation"], 1);
    }

    #[tokio::test]
    async fn retrieve_state_returns_latest() {
        let (_dir, memory) = temp_memory().await;
        memory.start_new_iteration().await.unwrap();

        let mut first = update_with(1, "A");
        first.timestamp = Utc::now() - chrono::Duration::seconds(10);
        memory.store_state_update(first).await;
        memory.store_state_update(update_with(2, "B")).await;

        let state = memory.retrieve_state().await.unwrap();
        assert_eq!(state.content["statistics"]["counter"], json!(2));
    }

    #[tokio::test]
    async fn meta_review_feedback_round_trip() {
        let (_dir, memory) = temp_memory().await;
        memory.start_new_iteration().await.unwrap();

        let mut critique = Map::new();
        critique.insert("common_patterns".to_string(), json!(["pattern-a"]));
        critique.insert("agent_feedback".to_string(), json!({"generation": "more depth"}));
        let mut overview = Map::new();
        overview.insert("next_priorities".to_string(), json!(["priority-1"]));

        let result = memory
            .store_meta_review(MetaReview {
                iteration_number: 1,
                timestamp: Utc::now(),
                critique,
                research_overview: overview,
            })
            .await;
        assert!(result.success);

        let feedback = memory.retrieve_feedback(1, None).await.unwrap();
        assert_eq!(feedback.feedback_content["general_recommendations"], json!(["pattern-a"]));
        assert_eq!(feedback.feedback_content["priority_improvements"], json!(["priority-1"]));
        assert!(memory.retrieve_feedback(9, None).await.is_none());
    }
}
