//! General key-value store
//!
//! File-per-key under `kv_store/`, mirrored by an in-memory cache that is
//! reloaded at startup. Batch writes validate everything before touching
//! disk, so they are all-or-nothing.

use crate::memory::{glob_json, read_json, write_json, ContextMemory};
use coscient_core::{CoscientResult, MemoryError};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

const FORBIDDEN_KEY_CHARS: [char; 7] = [' ', '/', '\\', ':', '*', '?', '|'];

fn validate_key(key: &str) -> Result<(), MemoryError> {
    if key.trim().is_empty() {
        return Err(MemoryError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty or whitespace".to_string(),
        });
    }
    if let Some(bad) = key.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
        return Err(MemoryError::InvalidKey {
            key: key.to_string(),
            reason: format!("key cannot contain '{bad}'"),
        });
    }
    Ok(())
}

impl ContextMemory {
    fn kv_file(&self, key: &str) -> PathBuf {
        self.kv_dir().join(format!("{key}.json"))
    }

    /// Flush dirty keys: present keys written, absent keys deleted.
    async fn persist_kv_changes(&self) -> Result<(), MemoryError> {
        let mut kv = self.kv.lock().await;
        let dirty: Vec<String> = kv.dirty.drain().collect();

        for key in dirty {
            let path = self.kv_file(&key);
            match kv.cache.get(&key) {
                Some(value) => write_json(&path, value)?,
                None => {
                    if path.exists() {
                        fs::remove_file(&path)
                            .map_err(|e| MemoryError::io(path.display().to_string(), e))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Set a key-value pair. Invalid keys are an error; I/O failures
    /// return `false`.
    pub async fn set(&self, key: &str, value: Value) -> CoscientResult<bool> {
        validate_key(key)?;

        {
            let mut kv = self.kv.lock().await;
            kv.cache.insert(key.to_string(), value);
            kv.dirty.insert(key.to_string());
        }

        match self.persist_kv_changes().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("failed to set key {key}: {e}");
                Ok(false)
            }
        }
    }

    /// Get a value, consulting the cache first and falling back to disk.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if validate_key(key).is_err() {
            return None;
        }

        {
            let kv = self.kv.lock().await;
            if let Some(value) = kv.cache.get(key) {
                return Some(value.clone());
            }
        }

        let path = self.kv_file(key);
        if path.exists() {
            if let Ok(value) = read_json::<Value>(&path) {
                self.kv.lock().await.cache.insert(key.to_string(), value.clone());
                return Some(value);
            }
        }
        None
    }

    /// Delete a key. Returns `false` when the key did not exist.
    pub async fn delete(&self, key: &str) -> CoscientResult<bool> {
        validate_key(key)?;

        let existed = {
            let mut kv = self.kv.lock().await;
            let in_cache = kv.cache.remove(key).is_some();
            let on_disk = self.kv_file(key).exists();
            if in_cache || on_disk {
                kv.dirty.insert(key.to_string());
                true
            } else {
                false
            }
        };

        if !existed {
            return Ok(false);
        }

        match self.persist_kv_changes().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("failed to delete key {key}: {e}");
                Ok(false)
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        if self.kv.lock().await.cache.contains_key(key) {
            return true;
        }
        self.kv_file(key).exists()
    }

    /// All keys, optionally filtered by prefix, sorted.
    pub async fn list_keys(&self, prefix: Option<&str>) -> Vec<String> {
        let mut keys: std::collections::HashSet<String> =
            self.kv.lock().await.cache.keys().cloned().collect();

        for file in glob_json(&self.kv_dir(), "") {
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                keys.insert(stem.to_string());
            }
        }

        let mut keys: Vec<String> = match prefix {
            Some(prefix) => keys.into_iter().filter(|k| k.starts_with(prefix)).collect(),
            None => keys.into_iter().collect(),
        };
        keys.sort();
        keys
    }

    /// Set multiple pairs atomically: every key and value is validated
    /// before any disk mutation, so either all are written or none is.
    pub async fn batch_set(&self, data: HashMap<String, Value>) -> CoscientResult<bool> {
        for key in data.keys() {
            validate_key(key)?;
        }

        {
            let mut kv = self.kv.lock().await;
            for (key, value) in data {
                kv.dirty.insert(key.clone());
                kv.cache.insert(key, value);
            }
        }

        match self.persist_kv_changes().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("failed to batch set: {e}");
                Ok(false)
            }
        }
    }

    /// Get multiple values; missing keys map to `None`.
    pub async fn batch_get(&self, keys: &[&str]) -> HashMap<String, Option<Value>> {
        let mut results = HashMap::new();
        for key in keys {
            results.insert(key.to_string(), self.get(key).await);
        }
        results
    }

    /// Remove every key-value pair from cache and disk.
    pub async fn clear(&self) -> bool {
        {
            let mut kv = self.kv.lock().await;
            kv.cache.clear();
            kv.dirty.clear();
        }

        for file in glob_json(&self.kv_dir(), "") {
            if let Err(e) = fs::remove_file(&file) {
                warn!("failed to clear key-value store: {e}");
                return false;
            }
        }
        true
    }

    /// Total on-disk size of the key-value store in bytes.
    pub async fn get_kv_storage_size(&self) -> u64 {
        glob_json(&self.kv_dir(), "")
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|m| m.len())
            .sum()
    }
}
