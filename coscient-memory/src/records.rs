//! Record types persisted by the Context Memory
//!
//! Stored records are immutable once written; every write carries a
//! `version` and a `writer_id` for read-your-writes matching.

use chrono::{DateTime, Utc};
use coscient_core::{AgentType, UpdateType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Record schema version stamped into every stored file.
pub const RECORD_VERSION: u32 = 1;

// ============================================================================
// STATE UPDATES
// ============================================================================

/// State update from the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub timestamp: DateTime<Utc>,
    pub update_type: UpdateType,
    pub system_statistics: Map<String, Value>,
    pub orchestration_state: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_data: Option<Map<String, Value>>,
    /// Logical identity of the writing agent/component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_id: Option<String>,
}

impl StateUpdate {
    pub fn new(update_type: UpdateType) -> Self {
        Self {
            timestamp: Utc::now(),
            update_type,
            system_statistics: Map::new(),
            orchestration_state: Map::new(),
            checkpoint_data: None,
            writer_id: None,
        }
    }

    pub fn with_writer(mut self, writer_id: impl Into<String>) -> Self {
        self.writer_id = Some(writer_id.into());
        self
    }
}

/// On-disk form of a state update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStateUpdate {
    pub timestamp: DateTime<Utc>,
    pub update_type: UpdateType,
    pub system_statistics: Map<String, Value>,
    pub orchestration_state: Map<String, Value>,
    #[serde(default)]
    pub checkpoint_data: Option<Map<String, Value>>,
    pub version: u32,
    pub writer_id: String,
}

// ============================================================================
// AGENT OUTPUTS
// ============================================================================

/// Output from a specialized agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_type: AgentType,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_data: Option<Map<String, Value>>,
}

impl AgentOutput {
    pub fn new(agent_type: AgentType, task_id: impl Into<String>) -> Self {
        Self {
            agent_type,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            results: Map::new(),
            state_data: None,
        }
    }
}

/// On-disk form of an agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAgentOutput {
    pub agent_type: AgentType,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Map<String, Value>,
    #[serde(default)]
    pub state_data: Option<Map<String, Value>>,
    pub version: u32,
    pub writer_id: String,
}

// ============================================================================
// META-REVIEW
// ============================================================================

/// Meta-review produced at the end of an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaReview {
    pub iteration_number: u32,
    pub timestamp: DateTime<Utc>,
    pub critique: Map<String, Value>,
    pub research_overview: Map<String, Value>,
}

/// Feedback projection derived from a stored meta-review.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackData {
    pub iteration_requested: u32,
    pub agent_type: Option<AgentType>,
    pub feedback_content: Map<String, Value>,
}

// ============================================================================
// ITERATIONS
// ============================================================================

/// Iteration lifecycle status. At most one iteration is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Active,
    Completed,
}

/// Per-iteration metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetadata {
    pub iteration_number: u32,
    pub started_at: DateTime<Utc>,
    pub status: IterationStatus,
    #[serde(default)]
    pub checkpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Map<String, Value>>,
}

/// Per-iteration storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationStatistics {
    pub state_updates_count: u64,
    pub agent_outputs_count: u64,
    pub has_meta_review: bool,
    pub storage_size_bytes: u64,
    pub agent_type_breakdown: std::collections::HashMap<String, u64>,
}

// ============================================================================
// CHECKPOINTS & RECOVERY
// ============================================================================

/// On-disk checkpoint record. `checkpoint_id` always equals the directory
/// name the record lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub system_statistics: Map<String, Value>,
    pub orchestration_state: Map<String, Value>,
    #[serde(default)]
    pub checkpoint_data: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    pub writer_id: String,
}

/// Summary entry for checkpoint listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// State synthesized from a checkpoint for resuming orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryState {
    pub checkpoint_timestamp: DateTime<Utc>,
    pub system_configuration: Map<String, Value>,
    pub active_tasks: Vec<Value>,
    pub completed_work: Map<String, Value>,
    pub resume_points: Map<String, Value>,
    pub data_integrity: Map<String, Value>,
}

// ============================================================================
// RETRIEVAL & RESULTS
// ============================================================================

/// Result of a storage operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageResult {
    pub success: bool,
    pub storage_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl StorageResult {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            success: true,
            storage_path: Some(path),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            storage_path: None,
            error: Some(error.into()),
        }
    }
}

/// Retrieved state projection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedState {
    pub request_type: String,
    pub timestamp_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub content: Map<String, Value>,
}

/// One entry of the version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub writer_id: String,
    pub update_type: UpdateType,
}

/// One entry of a session's causal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub step: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    pub update_type: UpdateType,
}

/// Persisted, time-bounded hint that an agent intends to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReservation {
    pub agent_id: String,
    pub start_time: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_state_update_round_trips() {
        let mut stats = Map::new();
        stats.insert("total_hypotheses".to_string(), Value::from(42));
        let stored = StoredStateUpdate {
            timestamp: Utc::now(),
            update_type: UpdateType::Periodic,
            system_statistics: stats,
            orchestration_state: Map::new(),
            checkpoint_data: None,
            version: RECORD_VERSION,
            writer_id: "agent-a".to_string(),
        };
        let json = serde_json::to_string_pretty(&stored).unwrap();
        let back: StoredStateUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn iteration_metadata_omits_absent_fields() {
        let metadata = IterationMetadata {
            iteration_number: 1,
            started_at: Utc::now(),
            status: IterationStatus::Active,
            checkpoints: Vec::new(),
            completed_at: None,
            duration_seconds: None,
            summary: None,
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("completed_at"));
        assert!(json.contains("\"status\":\"active\""));
    }

    #[test]
    fn storage_result_constructors() {
        let ok = StorageResult::ok(PathBuf::from("/tmp/x.json"));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let fail = StorageResult::fail("disk full");
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("disk full"));
    }
}
