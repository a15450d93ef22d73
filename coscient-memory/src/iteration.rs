//! Iteration lifecycle
//!
//! Iterations are the organizational scope for state updates and agent
//! outputs. Derived state (active iteration, listings, statistics) is
//! always computed by scanning the metadata files on disk, never cached.

use crate::memory::{glob_json, read_json, write_json, ContextMemory};
use crate::records::{IterationMetadata, IterationStatistics, IterationStatus};
use chrono::Utc;
use coscient_core::{CoscientResult, MemoryError};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

impl ContextMemory {
    fn iteration_metadata_path(&self, number: u32) -> PathBuf {
        self.iterations_dir()
            .join(Self::iteration_dir_name(number))
            .join("metadata.json")
    }

    fn iteration_numbers(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(self.iterations_dir()) else {
            return Vec::new();
        };
        let mut numbers: Vec<u32> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("iteration_"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }

    /// Number the next iteration would get.
    pub async fn get_current_iteration_number(&self) -> u32 {
        self.iteration_numbers().last().map(|n| n + 1).unwrap_or(1)
    }

    /// Directory name of the most recent iteration (or the first, when the
    /// store is empty) for writes outside any active iteration.
    pub(crate) fn current_iteration_name(&self) -> String {
        let latest = self.iteration_numbers().last().copied().unwrap_or(1);
        Self::iteration_dir_name(latest)
    }

    /// The currently active iteration number, if any.
    pub async fn get_active_iteration(&self) -> Option<u32> {
        for number in self.iteration_numbers() {
            let path = self.iteration_metadata_path(number);
            if let Ok(metadata) = read_json::<IterationMetadata>(&path) {
                if metadata.status == IterationStatus::Active {
                    return Some(metadata.iteration_number);
                }
            }
        }
        None
    }

    /// Start a new iteration and return its number.
    ///
    /// Fails when another iteration is still active.
    pub async fn start_new_iteration(&self) -> CoscientResult<u32> {
        if let Some(active) = self.get_active_iteration().await {
            return Err(MemoryError::ActiveIterationExists { number: active }.into());
        }

        let number = self.get_current_iteration_number().await;
        let iter_dir = self.iterations_dir().join(Self::iteration_dir_name(number));

        for sub in ["agent_outputs", "tournament_data"] {
            let path = iter_dir.join(sub);
            fs::create_dir_all(&path).map_err(|e| MemoryError::io(path.display().to_string(), e))?;
        }

        let metadata = IterationMetadata {
            iteration_number: number,
            started_at: Utc::now(),
            status: IterationStatus::Active,
            checkpoints: Vec::new(),
            completed_at: None,
            duration_seconds: None,
            summary: None,
        };
        write_json(&iter_dir.join("metadata.json"), &metadata)?;

        info!(iteration = number, "started new iteration");
        Ok(number)
    }

    /// Complete an iteration with summary data.
    ///
    /// Returns `false` when the iteration does not exist or is not active.
    pub async fn complete_iteration(&self, number: u32, summary: Map<String, Value>) -> bool {
        let path = self.iteration_metadata_path(number);
        let mut metadata = match read_json::<IterationMetadata>(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(iteration = number, "cannot complete iteration: {e}");
                return false;
            }
        };

        if metadata.status != IterationStatus::Active {
            warn!(iteration = number, "cannot complete iteration: not active");
            return false;
        }

        let completed_at = Utc::now();
        metadata.status = IterationStatus::Completed;
        metadata.completed_at = Some(completed_at);
        metadata.duration_seconds = Some(
            (completed_at - metadata.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        metadata.summary = Some(summary);

        match write_json(&path, &metadata) {
            Ok(()) => {
                info!(iteration = number, "completed iteration");
                true
            }
            Err(e) => {
                warn!(iteration = number, "failed to complete iteration: {e}");
                false
            }
        }
    }

    /// Metadata for a specific iteration.
    pub async fn get_iteration_info(&self, number: u32) -> Option<IterationMetadata> {
        read_json(&self.iteration_metadata_path(number)).ok()
    }

    /// All iterations, ordered by number.
    pub async fn list_iterations(&self) -> Vec<IterationMetadata> {
        let mut iterations = Vec::new();
        for number in self.iteration_numbers() {
            if let Some(info) = self.get_iteration_info(number).await {
                iterations.push(info);
            }
        }
        iterations
    }

    /// Detailed storage statistics for an iteration: state-update and
    /// agent-output counts, meta-review presence, summed byte sizes.
    pub async fn get_iteration_statistics(&self, number: u32) -> Option<IterationStatistics> {
        let iter_dir = self.iterations_dir().join(Self::iteration_dir_name(number));
        if !iter_dir.is_dir() {
            return None;
        }

        let mut stats = IterationStatistics::default();
        let file_size = |path: &PathBuf| fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        for state_file in glob_json(&iter_dir, "system_state_") {
            stats.state_updates_count += 1;
            stats.storage_size_bytes += file_size(&state_file);
        }

        for output_file in glob_json(&iter_dir.join("agent_outputs"), "") {
            stats.agent_outputs_count += 1;
            stats.storage_size_bytes += file_size(&output_file);
            if let Ok(data) = read_json::<Value>(&output_file) {
                let agent = data
                    .get("agent_type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                *stats.agent_type_breakdown.entry(agent).or_insert(0) += 1;
            }
        }

        let meta_review = iter_dir.join("meta_review.json");
        if meta_review.exists() {
            stats.has_meta_review = true;
            stats.storage_size_bytes += file_size(&meta_review);
        }

        let metadata = iter_dir.join("metadata.json");
        if metadata.exists() {
            stats.storage_size_bytes += file_size(&metadata);
        }

        Some(stats)
    }
}
