//! Append-only safety audit log
//!
//! Every artifact an agent produces is appended as one JSON line for later
//! audit. The log is never rewritten or truncated by the runtime.

use chrono::{DateTime, Utc};
use coscient_core::{AgentType, CoscientResult, MemoryError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_type: AgentType,
    pub artifact_kind: String,
    pub artifact: Value,
}

/// Append-only log of generated artifacts.
pub struct SafetyLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SafetyLogger {
    pub fn new(path: impl Into<PathBuf>) -> CoscientResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent.display().to_string(), e))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one artifact. Logging failures are reported, never fatal to
    /// the producing agent.
    pub fn log_artifact(&self, agent_type: AgentType, artifact_kind: &str, artifact: &Value) {
        let entry = SafetyLogEntry {
            timestamp: Utc::now(),
            agent_type,
            artifact_kind: artifact_kind.to_string(),
            artifact: artifact.clone(),
        };

        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let line = serde_json::to_string(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{line}")
        })();

        if let Err(e) = result {
            warn!("failed to append safety log entry: {e}");
        }
    }

    /// Read back every logged entry, oldest first.
    pub fn entries(&self) -> CoscientResult<Vec<SafetyLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .map_err(|e| MemoryError::io(self.path.display().to_string(), e))?;

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| MemoryError::io(self.path.display().to_string(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("skipping malformed safety log line: {e}"),
            }
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for SafetyLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyLogger").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_and_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SafetyLogger::new(dir.path().join("audit").join("safety.jsonl")).unwrap();

        logger.log_artifact(AgentType::Generation, "hypothesis", &json!({"id": "h1"}));
        logger.log_artifact(AgentType::Reflection, "review", &json!({"id": "r1"}));

        let entries = logger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].artifact_kind, "hypothesis");
        assert_eq!(entries[0].artifact, json!({"id": "h1"}));
        assert_eq!(entries[1].agent_type, AgentType::Reflection);
    }

    #[test]
    fn empty_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SafetyLogger::new(dir.path().join("safety.jsonl")).unwrap();
        assert!(logger.entries().unwrap().is_empty());
    }
}
