//! Append-only aggregates
//!
//! Each aggregate type is a single JSON file holding entries sorted
//! ascending by timestamp. Updates append via one of three strategies;
//! numeric accumulation is commutative over numeric fields.

use crate::memory::{glob_json, read_json, write_json, ContextMemory};
use chrono::{DateTime, Utc};
use coscient_core::AgentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// How `update_aggregate` folds new data into the latest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Append a new entry; the latest entry wins.
    Replace,
    /// Deep-merge into the latest entry (nested objects merged
    /// recursively, scalars overwritten).
    Merge,
    /// Add numeric fields into the latest entry; non-numeric fields
    /// overwrite.
    Accumulate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AggregateEntry {
    timestamp: DateTime<Utc>,
    data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AggregateFile {
    entries: Vec<AggregateEntry>,
}

/// Numeric statistics over one metric of an agent's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatistics {
    pub count: u64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

/// Summary entry for one aggregate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub entry_count: u64,
    pub file_size: u64,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

fn deep_merge(base: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match (base.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(new)) => {
                let mut merged = existing.clone();
                deep_merge(&mut merged, new);
                base.insert(key.clone(), Value::Object(merged));
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn accumulate(base: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        let summed = match (base.get(key).and_then(Value::as_f64), value.as_f64()) {
            (Some(existing), Some(new)) => Some(existing + new),
            _ => None,
        };
        match summed {
            Some(sum) => {
                base.insert(key.clone(), Value::from(sum));
            }
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

impl ContextMemory {
    fn aggregate_file(&self, aggregate_type: &str) -> PathBuf {
        self.aggregates_dir().join(format!("{aggregate_type}.json"))
    }

    fn load_aggregate(&self, aggregate_type: &str) -> AggregateFile {
        let path = self.aggregate_file(aggregate_type);
        if path.exists() {
            read_json(&path).unwrap_or_default()
        } else {
            AggregateFile::default()
        }
    }

    /// Append an aggregate entry at the given timestamp.
    pub async fn store_aggregate(
        &self,
        aggregate_type: &str,
        data: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let mut file = self.load_aggregate(aggregate_type);
        file.entries.push(AggregateEntry { timestamp, data });
        file.entries.sort_by_key(|e| e.timestamp);

        match write_json(&self.aggregate_file(aggregate_type), &file) {
            Ok(()) => {
                info!(aggregate_type, "stored aggregate data");
                true
            }
            Err(e) => {
                warn!("failed to store aggregate: {e}");
                false
            }
        }
    }

    /// Data of the newest entry, if any.
    pub async fn retrieve_aggregate_latest(&self, aggregate_type: &str) -> Option<Map<String, Value>> {
        self.load_aggregate(aggregate_type)
            .entries
            .last()
            .map(|entry| entry.data.clone())
    }

    /// Entry data within `[start, end]`, in timestamp order.
    pub async fn retrieve_aggregate_range(
        &self,
        aggregate_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Map<String, Value>> {
        self.load_aggregate(aggregate_type)
            .entries
            .into_iter()
            .filter(|entry| entry.timestamp >= start && entry.timestamp <= end)
            .map(|entry| entry.data)
            .collect()
    }

    /// Fold `data` into the aggregate using the given strategy.
    pub async fn update_aggregate(
        &self,
        aggregate_type: &str,
        data: Map<String, Value>,
        strategy: MergeStrategy,
    ) -> bool {
        let folded = match strategy {
            MergeStrategy::Replace => data,
            MergeStrategy::Merge => match self.retrieve_aggregate_latest(aggregate_type).await {
                Some(mut latest) => {
                    deep_merge(&mut latest, &data);
                    latest
                }
                None => data,
            },
            MergeStrategy::Accumulate => match self.retrieve_aggregate_latest(aggregate_type).await {
                Some(mut latest) => {
                    accumulate(&mut latest, &data);
                    latest
                }
                None => data,
            },
        };

        self.store_aggregate(aggregate_type, folded, Utc::now()).await
    }

    /// Remove aggregate entries older than the retention period across all
    /// aggregate files. Returns the number of entries removed.
    pub async fn cleanup_aggregate_entries(&self) -> u64 {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let mut cleaned = 0;

        for path in glob_json(&self.aggregates_dir(), "") {
            let mut file: AggregateFile = match read_json(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("failed to clean aggregate {}: {e}", path.display());
                    continue;
                }
            };

            let before = file.entries.len();
            file.entries.retain(|entry| entry.timestamp >= cutoff);
            cleaned += (before - file.entries.len()) as u64;

            if let Err(e) = write_json(&path, &file) {
                warn!("failed to clean aggregate {}: {e}", path.display());
            }
        }

        cleaned
    }

    /// All aggregate types on disk.
    pub async fn list_aggregate_types(&self) -> Vec<String> {
        glob_json(&self.aggregates_dir(), "")
            .into_iter()
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect()
    }

    /// Entry counts, file sizes and newest timestamps per aggregate type.
    pub async fn get_aggregate_summary(&self) -> HashMap<String, AggregateSummary> {
        let mut summary = HashMap::new();
        for path in glob_json(&self.aggregates_dir(), "") {
            let Some(aggregate_type) = path.file_stem().and_then(|s| s.to_str()).map(String::from)
            else {
                continue;
            };
            let Ok(file) = read_json::<AggregateFile>(&path) else {
                continue;
            };
            let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            summary.insert(
                aggregate_type,
                AggregateSummary {
                    entry_count: file.entries.len() as u64,
                    file_size,
                    latest_timestamp: file.entries.last().map(|e| e.timestamp),
                },
            );
        }
        summary
    }

    /// Numeric statistics over `results[metric]` across the agent's
    /// outputs in the active (or most recent) iteration.
    pub async fn compute_aggregate_statistics(
        &self,
        agent_type: AgentType,
        metric: &str,
    ) -> Option<AggregateStatistics> {
        let iteration = match self.get_active_iteration().await {
            Some(number) => number,
            None => self.list_iterations().await.last()?.iteration_number,
        };

        let outputs_dir = self
            .iterations_dir()
            .join(Self::iteration_dir_name(iteration))
            .join("agent_outputs");

        let prefix = format!("{agent_type}_");
        let mut values = Vec::new();
        for path in glob_json(&outputs_dir, &prefix) {
            let Ok(data) = read_json::<Value>(&path) else {
                continue;
            };
            if data.get("agent_type").and_then(Value::as_str) != Some(agent_type.as_str()) {
                continue;
            }
            if let Some(value) = data
                .get("results")
                .and_then(|r| r.get(metric))
                .and_then(Value::as_f64)
            {
                values.push(value);
            }
        }

        if values.is_empty() {
            return None;
        }

        let count = values.len() as u64;
        let sum: f64 = values.iter().sum();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Some(AggregateStatistics {
            count,
            average: sum / count as f64,
            min,
            max,
        })
    }
}
