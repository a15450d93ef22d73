//! Context Memory root: storage bootstrap, configuration, indices

use chrono::{DateTime, Utc};
use coscient_core::{AgentType, CoscientResult, MemoryConfig, MemoryError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::retention::CleanupMetrics;

/// In-memory indices rebuilt from disk at startup.
#[derive(Debug, Default)]
pub(crate) struct Indices {
    /// Timestamp -> state-update files, append-only in timestamp order.
    pub temporal: BTreeMap<DateTime<Utc>, Vec<PathBuf>>,
    /// Agent type -> agent-output files.
    pub component: HashMap<AgentType, Vec<PathBuf>>,
}

/// Key-value cache mirroring `kv_store/` on disk.
#[derive(Debug, Default)]
pub(crate) struct KvState {
    pub cache: HashMap<String, Value>,
    pub dirty: HashSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SystemConfig {
    retention_days: i64,
    checkpoint_interval_minutes: u64,
    max_storage_gb: u64,
    created_at: DateTime<Utc>,
    version: String,
}

/// Persistent state management for the co-scientist runtime.
///
/// Exclusively owns all on-disk state under its storage root. Indices are
/// per-process and rebuilt from disk at startup via [`initialize`].
///
/// [`initialize`]: ContextMemory::initialize
pub struct ContextMemory {
    pub(crate) storage_path: PathBuf,
    pub(crate) config: MemoryConfig,
    pub(crate) indices: Mutex<Indices>,
    pub(crate) kv: Mutex<KvState>,
    /// In-process half of the checkpoint serialization; the other half is
    /// the advisory lock file.
    pub(crate) checkpoint_mutex: Mutex<()>,
    pub(crate) cleanup_batch_size: Mutex<usize>,
    pub(crate) cleanup_metrics: Mutex<Option<CleanupMetrics>>,
}

impl ContextMemory {
    /// Create a Context Memory rooted at `storage_path`.
    ///
    /// Creates the directory tree and loads (or saves) the persisted
    /// system configuration. Call [`initialize`] afterwards to rebuild
    /// indices and the key-value cache from disk.
    ///
    /// [`initialize`]: ContextMemory::initialize
    pub fn new(storage_path: impl Into<PathBuf>, mut config: MemoryConfig) -> CoscientResult<Self> {
        let storage_path = storage_path.into();

        for dir in ["iterations", "checkpoints", "aggregates", "configuration", "kv_store"] {
            let path = storage_path.join(dir);
            fs::create_dir_all(&path).map_err(|e| MemoryError::io(path.display().to_string(), e))?;
        }

        // Stored configuration wins over the constructor arguments so a
        // reopened store keeps its original retention policy.
        let config_file = storage_path.join("configuration").join("system_config.json");
        if config_file.exists() {
            match read_json::<SystemConfig>(&config_file) {
                Ok(stored) => {
                    config.retention_days = stored.retention_days;
                    config.checkpoint_interval_minutes = stored.checkpoint_interval_minutes;
                    config.max_storage_gb = stored.max_storage_gb;
                    info!("loaded existing configuration from storage");
                }
                Err(e) => warn!("failed to load configuration: {e}"),
            }
        } else {
            let stored = SystemConfig {
                retention_days: config.retention_days,
                checkpoint_interval_minutes: config.checkpoint_interval_minutes,
                max_storage_gb: config.max_storage_gb,
                created_at: Utc::now(),
                version: "1.0.0".to_string(),
            };
            if let Err(e) = write_json(&config_file, &stored) {
                warn!("failed to save configuration: {e}");
            }
        }

        info!("initialized storage structure at {}", storage_path.display());

        Ok(Self {
            storage_path,
            config,
            indices: Mutex::new(Indices::default()),
            kv: Mutex::new(KvState::default()),
            checkpoint_mutex: Mutex::new(()),
            cleanup_batch_size: Mutex::new(10),
            cleanup_metrics: Mutex::new(None),
        })
    }

    /// Rebuild the temporal/component indices and the key-value cache from
    /// whatever is already on disk.
    pub async fn initialize(&self) -> CoscientResult<()> {
        self.load_indices().await;
        self.load_kv_cache().await;
        info!("context memory initialization complete");
        Ok(())
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn retention_days(&self) -> i64 {
        self.config.retention_days
    }

    // ------------------------------------------------------------------
    // Directory helpers
    // ------------------------------------------------------------------

    pub(crate) fn iterations_dir(&self) -> PathBuf {
        self.storage_path.join("iterations")
    }

    pub(crate) fn checkpoints_dir(&self) -> PathBuf {
        self.storage_path.join("checkpoints")
    }

    pub(crate) fn aggregates_dir(&self) -> PathBuf {
        self.storage_path.join("aggregates")
    }

    pub(crate) fn kv_dir(&self) -> PathBuf {
        self.storage_path.join("kv_store")
    }

    pub(crate) fn configuration_dir(&self) -> PathBuf {
        self.storage_path.join("configuration")
    }

    pub(crate) fn archive_dir(&self) -> PathBuf {
        self.storage_path.join("archive")
    }

    pub(crate) fn iteration_dir_name(number: u32) -> String {
        format!("iteration_{number:03}")
    }

    // ------------------------------------------------------------------
    // Index loading
    // ------------------------------------------------------------------

    async fn load_indices(&self) {
        let mut indices = self.indices.lock().await;
        indices.temporal.clear();
        indices.component.clear();

        let iterations_dir = self.iterations_dir();
        let Ok(entries) = fs::read_dir(&iterations_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let iter_dir = entry.path();
            if !iter_dir.is_dir() {
                continue;
            }

            for state_file in glob_json(&iter_dir, "system_state_") {
                match read_json::<Value>(&state_file) {
                    Ok(data) => {
                        if let Some(ts) = data.get("timestamp").and_then(parse_timestamp) {
                            indices.temporal.entry(ts).or_default().push(state_file);
                        }
                    }
                    Err(e) => warn!("failed to index {}: {e}", state_file.display()),
                }
            }

            let outputs_dir = iter_dir.join("agent_outputs");
            for output_file in glob_json(&outputs_dir, "") {
                match read_json::<Value>(&output_file) {
                    Ok(data) => {
                        let agent = data
                            .get("agent_type")
                            .and_then(Value::as_str)
                            .and_then(|s| s.parse::<AgentType>().ok());
                        if let Some(agent) = agent {
                            indices.component.entry(agent).or_default().push(output_file);
                        }
                    }
                    Err(e) => warn!("failed to index {}: {e}", output_file.display()),
                }
            }
        }

        info!("loaded {} temporal entries from storage", indices.temporal.len());
    }

    async fn load_kv_cache(&self) {
        let mut kv = self.kv.lock().await;
        kv.cache.clear();
        kv.dirty.clear();

        for file in glob_json(&self.kv_dir(), "") {
            let Some(key) = file.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match read_json::<Value>(&file) {
                Ok(value) => {
                    kv.cache.insert(key, value);
                }
                Err(e) => warn!("failed to load key-value pair {key}: {e}"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Storage accounting
    // ------------------------------------------------------------------

    /// Total size of the storage tree in bytes.
    pub async fn get_total_storage_size(&self) -> u64 {
        dir_size(&self.storage_path)
    }

    /// Storage size by top-level component.
    pub async fn get_storage_breakdown(&self) -> HashMap<String, u64> {
        ["iterations", "checkpoints", "aggregates", "kv_store"]
            .into_iter()
            .map(|component| (component.to_string(), dir_size(&self.storage_path.join(component))))
            .collect()
    }

    /// True while total usage stays under 80% of the configured maximum.
    pub(crate) fn within_storage_limit(&self) -> bool {
        let max_bytes = self.config.max_storage_gb.saturating_mul(1024 * 1024 * 1024);
        dir_size(&self.storage_path) < (max_bytes as f64 * 0.8) as u64
    }
}

impl std::fmt::Debug for ContextMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextMemory")
            .field("storage_path", &self.storage_path)
            .field("retention_days", &self.config.retention_days)
            .finish()
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, MemoryError> {
    let content = fs::read_to_string(path).map_err(|e| MemoryError::io(path.display().to_string(), e))?;
    serde_json::from_str(&content).map_err(|e| MemoryError::Serialization { reason: e.to_string() })
}

/// Write a pretty-printed JSON record, replacing any existing file.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MemoryError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| MemoryError::Serialization { reason: e.to_string() })?;
    fs::write(path, content).map_err(|e| MemoryError::io(path.display().to_string(), e))
}

/// Create a new JSON record, failing if the path already exists. The
/// exclusive create is what makes concurrent writers pick distinct names.
pub(crate) fn write_json_new<T: Serialize>(path: &Path, value: &T) -> Result<bool, MemoryError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| MemoryError::Serialization { reason: e.to_string() })?;
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(content.as_bytes())
                .map_err(|e| MemoryError::io(path.display().to_string(), e))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(MemoryError::io(path.display().to_string(), e)),
    }
}

/// JSON files in `dir` whose stem starts with `prefix`.
pub(crate) fn glob_json(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().is_some_and(|ext| ext == "json")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    files.sort();
    files
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            total += dir_size(&entry_path);
        } else if let Ok(metadata) = entry.metadata() {
            total += metadata.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_memory() -> (tempfile::TempDir, ContextMemory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap();
        (dir, memory)
    }

    #[test]
    fn creates_directory_tree() {
        let (dir, memory) = temp_memory();
        for sub in ["iterations", "checkpoints", "aggregates", "configuration", "kv_store"] {
            assert!(memory.storage_path().join(sub).is_dir(), "{sub} missing");
        }
        drop(dir);
    }

    #[test]
    fn persists_and_reloads_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("context");

        let custom = MemoryConfig {
            retention_days: 7,
            ..Default::default()
        };
        let _first = ContextMemory::new(&root, custom).unwrap();

        // A second open with different constructor arguments keeps the
        // stored retention policy.
        let second = ContextMemory::new(&root, MemoryConfig::default()).unwrap();
        assert_eq!(second.retention_days(), 7);
    }

    #[tokio::test]
    async fn storage_breakdown_covers_components() {
        let (_dir, memory) = temp_memory();
        let breakdown = memory.get_storage_breakdown().await;
        assert!(breakdown.contains_key("iterations"));
        assert!(breakdown.contains_key("kv_store"));
    }

    #[test]
    fn write_json_new_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        assert!(write_json_new(&path, &serde_json::json!({"a": 1})).unwrap());
        assert!(!write_json_new(&path, &serde_json::json!({"a": 2})).unwrap());
    }
}
