//! Retention, archival and garbage collection
//!
//! Iterations past the retention period are archived as gzip-compressed
//! tarballs and removed. Garbage collection sweeps orphan directories and
//! temp files, logging errors without aborting. Incremental cleanup
//! processes a bounded batch per call to avoid long pauses.

use crate::memory::{dir_size, read_json, write_json, ContextMemory};
use crate::records::{IterationMetadata, IterationStatus};
use chrono::{DateTime, Duration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

// ============================================================================
// METRIC TYPES
// ============================================================================

/// One recorded cleanup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupRun {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub items_cleaned: u64,
    pub bytes_freed: i64,
}

/// Rolling cleanup performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupMetrics {
    pub last_cleanup_duration: f64,
    pub items_cleaned: u64,
    pub storage_freed_bytes: i64,
    pub cleanup_history: Vec<CleanupRun>,
}

/// Result of an orphan-sweep garbage collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GarbageStats {
    pub orphaned_files: u64,
    pub orphaned_directories: u64,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveMetadata {
    archives: Vec<ArchiveEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEntry {
    timestamp: DateTime<Utc>,
    archived_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastArchive {
    timestamp: DateTime<Utc>,
    archived_count: u64,
}

fn is_temp_name(name: &str) -> bool {
    name.ends_with(".tmp") || name == ".DS_Store"
}

impl ContextMemory {
    fn retention_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.config.retention_days)
    }

    /// Whether an iteration directory is non-active and past retention.
    fn eligible_for_cleanup(&self, iter_dir: &Path, cutoff: DateTime<Utc>) -> bool {
        let Ok(metadata) = read_json::<IterationMetadata>(&iter_dir.join("metadata.json")) else {
            return false;
        };
        metadata.status != IterationStatus::Active && metadata.started_at < cutoff
    }

    // ------------------------------------------------------------------
    // Archival
    // ------------------------------------------------------------------

    /// Tarball one iteration directory into `archive/`.
    fn archive_iteration(&self, iter_dir: &Path) -> bool {
        let archive_dir = self.archive_dir();
        if let Err(e) = fs::create_dir_all(&archive_dir) {
            warn!("failed to create archive dir: {e}");
            return false;
        }

        let Some(iteration_name) = iter_dir.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_path = archive_dir.join(format!("{iteration_name}_{stamp}.tar.gz"));

        let result = (|| -> std::io::Result<()> {
            let file = fs::File::create(&archive_path)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(iteration_name, iter_dir)?;
            builder.into_inner()?.finish()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!("archived iteration to {}", archive_path.display());
                true
            }
            Err(e) => {
                warn!("failed to archive iteration {}: {e}", iter_dir.display());
                false
            }
        }
    }

    fn update_archive_metadata(&self, archived_count: u64) {
        let archive_dir = self.archive_dir();
        if let Err(e) = fs::create_dir_all(&archive_dir) {
            warn!("failed to update archive metadata: {e}");
            return;
        }

        let path = archive_dir.join("archive_metadata.json");
        let mut metadata: ArchiveMetadata = if path.exists() {
            read_json(&path).unwrap_or_default()
        } else {
            ArchiveMetadata::default()
        };
        metadata.archives.push(ArchiveEntry {
            timestamp: Utc::now(),
            archived_count,
        });
        if let Err(e) = write_json(&path, &metadata) {
            warn!("failed to update archive metadata: {e}");
        }
    }

    /// Archive every non-active iteration past retention. Returns the
    /// number archived.
    pub async fn archive_old_data(&self) -> u64 {
        let cutoff = self.retention_cutoff();
        let mut archived = 0;

        if let Ok(entries) = fs::read_dir(self.iterations_dir()) {
            for entry in entries.flatten() {
                let iter_dir = entry.path();
                if !iter_dir.is_dir() {
                    continue;
                }
                if self.eligible_for_cleanup(&iter_dir, cutoff) && self.archive_iteration(&iter_dir) {
                    archived += 1;
                }
            }
        }

        self.update_archive_metadata(archived);
        archived
    }

    /// Whether 24 hours have passed since the last archive rotation.
    pub async fn check_archive_rotation_needed(&self) -> bool {
        let path = self.configuration_dir().join("last_archive.json");
        let Ok(last) = read_json::<LastArchive>(&path) else {
            return true;
        };
        Utc::now() - last.timestamp >= Duration::hours(24)
    }

    /// Archive old data and stamp the rotation time.
    pub async fn rotate_archives(&self) -> bool {
        let archived_count = self.archive_old_data().await;

        let path = self.configuration_dir().join("last_archive.json");
        let stamp = LastArchive {
            timestamp: Utc::now(),
            archived_count,
        };
        match write_json(&path, &stamp) {
            Ok(()) => {
                info!(archived_count, "archive rotation completed");
                true
            }
            Err(e) => {
                warn!("failed to rotate archives: {e}");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Archive then remove every eligible iteration, and clean old
    /// checkpoints. Returns the total number of items cleaned.
    pub async fn cleanup_old_iterations(&self) -> u64 {
        let started = Instant::now();
        let monitoring = self.cleanup_metrics.lock().await.is_some();
        let initial_size = if monitoring { dir_size(&self.storage_path) } else { 0 };

        let cutoff = self.retention_cutoff();
        let mut cleaned = 0;

        if let Ok(entries) = fs::read_dir(self.iterations_dir()) {
            for entry in entries.flatten() {
                let iter_dir = entry.path();
                if !iter_dir.is_dir() || !self.eligible_for_cleanup(&iter_dir, cutoff) {
                    continue;
                }

                self.archive_iteration(&iter_dir);
                match fs::remove_dir_all(&iter_dir) {
                    Ok(()) => {
                        cleaned += 1;
                        info!("cleaned up old iteration: {}", iter_dir.display());
                    }
                    Err(e) => warn!("failed to remove iteration {}: {e}", iter_dir.display()),
                }
            }
        }

        let total = cleaned + self.cleanup_old_checkpoints().await;

        if monitoring {
            let duration = started.elapsed().as_secs_f64();
            let freed = initial_size as i64 - dir_size(&self.storage_path) as i64;
            let mut metrics = self.cleanup_metrics.lock().await;
            if let Some(metrics) = metrics.as_mut() {
                metrics.last_cleanup_duration = duration;
                metrics.items_cleaned = total;
                metrics.storage_freed_bytes = freed;
                metrics.cleanup_history.push(CleanupRun {
                    timestamp: Utc::now(),
                    duration_seconds: duration,
                    items_cleaned: total,
                    bytes_freed: freed,
                });
            }
        }

        total
    }

    /// True iff total usage exceeds 80% of the configured maximum.
    pub async fn check_garbage_collection_needed(&self) -> bool {
        let max_bytes = self.config.max_storage_gb.saturating_mul(1024 * 1024 * 1024);
        dir_size(&self.storage_path) > (max_bytes as f64 * 0.8) as u64
    }

    /// Run iteration cleanup then aggregate cleanup. Returns bytes freed.
    pub async fn run_garbage_collection(&self) -> i64 {
        let initial = dir_size(&self.storage_path) as i64;
        self.cleanup_old_iterations().await;
        self.cleanup_aggregate_entries().await;
        let freed = initial - dir_size(&self.storage_path) as i64;
        info!(freed, "garbage collection finished");
        freed
    }

    /// Sweep orphan directories and temp files.
    ///
    /// Orphans are directories under `iterations/` that either do not
    /// match `iteration_NNN` or have no metadata file, stray files in the
    /// iterations root, and temp files (`*.tmp`, `.DS_Store`) under the
    /// component directories. Errors are collected, not fatal.
    pub async fn collect_garbage(&self) -> GarbageStats {
        let mut stats = GarbageStats::default();

        if let Ok(entries) = fs::read_dir(self.iterations_dir()) {
            for entry in entries.flatten() {
                let item = entry.path();
                let result: std::io::Result<()> = (|| {
                    if item.is_dir() {
                        let valid_name = item
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("iteration_"));
                        let has_metadata = item.join("metadata.json").exists();
                        if !valid_name || !has_metadata {
                            stats.orphaned_directories += 1;
                            stats.bytes_freed += dir_size(&item);
                            fs::remove_dir_all(&item)?;
                        }
                    } else {
                        stats.orphaned_files += 1;
                        stats.bytes_freed += fs::metadata(&item).map(|m| m.len()).unwrap_or(0);
                        fs::remove_file(&item)?;
                    }
                    Ok(())
                })();
                if let Err(e) = result {
                    warn!("failed to collect garbage for {}: {e}", item.display());
                    stats.errors.push(e.to_string());
                }
            }
        }

        for subdir in ["checkpoints", "aggregates", "kv_store"] {
            let dir = self.storage_path.join(subdir);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let item = entry.path();
                let is_temp = item
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_temp_name);
                if item.is_file() && is_temp {
                    stats.orphaned_files += 1;
                    stats.bytes_freed += fs::metadata(&item).map(|m| m.len()).unwrap_or(0);
                    if let Err(e) = fs::remove_file(&item) {
                        stats.errors.push(e.to_string());
                    }
                }
            }
        }

        info!(?stats, "garbage collection completed");
        stats
    }

    // ------------------------------------------------------------------
    // Incremental cleanup
    // ------------------------------------------------------------------

    /// Cap on iterations processed per `cleanup_batch` call.
    pub async fn set_cleanup_batch_size(&self, batch_size: usize) {
        *self.cleanup_batch_size.lock().await = batch_size;
    }

    /// Clean at most one batch of eligible iterations. Returns the number
    /// cleaned this call.
    pub async fn cleanup_batch(&self) -> u64 {
        let batch_size = *self.cleanup_batch_size.lock().await;
        let cutoff = self.retention_cutoff();
        let mut cleaned = 0u64;

        let Ok(entries) = fs::read_dir(self.iterations_dir()) else {
            return 0;
        };
        for entry in entries.flatten() {
            if cleaned as usize >= batch_size {
                break;
            }
            let iter_dir = entry.path();
            if !iter_dir.is_dir() || !self.eligible_for_cleanup(&iter_dir, cutoff) {
                continue;
            }
            self.archive_iteration(&iter_dir);
            match fs::remove_dir_all(&iter_dir) {
                Ok(()) => cleaned += 1,
                Err(e) => warn!("failed to remove {}: {e}", iter_dir.display()),
            }
        }

        cleaned
    }

    // ------------------------------------------------------------------
    // Performance monitoring
    // ------------------------------------------------------------------

    /// Start recording per-run cleanup metrics.
    pub async fn enable_performance_monitoring(&self) {
        let mut metrics = self.cleanup_metrics.lock().await;
        if metrics.is_none() {
            *metrics = Some(CleanupMetrics::default());
        }
    }

    pub async fn get_cleanup_metrics(&self) -> Option<CleanupMetrics> {
        self.cleanup_metrics.lock().await.clone()
    }

    /// Number of archives on disk (tarballs only).
    pub async fn archive_count(&self) -> u64 {
        let Ok(entries) = fs::read_dir(self.archive_dir()) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|e| {
                e.path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".tar.gz"))
            })
            .count() as u64
    }

    /// Timestamps of recorded archive runs, oldest first.
    pub async fn archive_history(&self) -> Vec<(DateTime<Utc>, u64)> {
        let path = self.archive_dir().join("archive_metadata.json");
        let Ok(metadata) = read_json::<ArchiveMetadata>(&path) else {
            return Vec::new();
        };
        metadata
            .archives
            .iter()
            .map(|a| (a.timestamp, a.archived_count))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coscient_core::MemoryConfig;
    use serde_json::{json, Map};

    async fn temp_memory(retention_days: i64) -> (tempfile::TempDir, ContextMemory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::new(
            dir.path().join("context"),
            MemoryConfig {
                retention_days,
                ..Default::default()
            },
        )
        .unwrap();
        memory.initialize().await.unwrap();
        (dir, memory)
    }

    /// Complete iteration `number` and backdate its start time.
    async fn backdate_iteration(memory: &ContextMemory, number: u32, days: i64) {
        let path = memory
            .iterations_dir()
            .join(ContextMemory::iteration_dir_name(number))
            .join("metadata.json");
        let mut metadata: IterationMetadata = read_json(&path).unwrap();
        metadata.started_at = Utc::now() - Duration::days(days);
        write_json(&path, &metadata).unwrap();
    }

    #[tokio::test]
    async fn old_completed_iterations_are_archived_and_removed() {
        let (_dir, memory) = temp_memory(7).await;

        let number = memory.start_new_iteration().await.unwrap();
        memory.complete_iteration(number, Map::new()).await;
        backdate_iteration(&memory, number, 30).await;

        assert_eq!(memory.cleanup_old_iterations().await, 1);
        assert!(!memory
            .iterations_dir()
            .join(ContextMemory::iteration_dir_name(number))
            .exists());
        assert_eq!(memory.archive_count().await, 1);
    }

    #[tokio::test]
    async fn active_iterations_are_never_cleaned() {
        let (_dir, memory) = temp_memory(7).await;
        let number = memory.start_new_iteration().await.unwrap();
        backdate_iteration(&memory, number, 30).await;

        assert_eq!(memory.cleanup_old_iterations().await, 0);
        assert!(memory
            .iterations_dir()
            .join(ContextMemory::iteration_dir_name(number))
            .exists());
    }

    #[tokio::test]
    async fn recent_iterations_are_kept() {
        let (_dir, memory) = temp_memory(7).await;
        let number = memory.start_new_iteration().await.unwrap();
        memory.complete_iteration(number, Map::new()).await;

        assert_eq!(memory.cleanup_old_iterations().await, 0);
    }

    #[tokio::test]
    async fn archive_metadata_records_runs() {
        let (_dir, memory) = temp_memory(7).await;
        let number = memory.start_new_iteration().await.unwrap();
        memory.complete_iteration(number, Map::new()).await;
        backdate_iteration(&memory, number, 30).await;

        assert_eq!(memory.archive_old_data().await, 1);
        let history = memory.archive_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1, 1);
    }

    #[tokio::test]
    async fn rotation_stamps_last_archive() {
        let (_dir, memory) = temp_memory(7).await;
        assert!(memory.check_archive_rotation_needed().await);
        assert!(memory.rotate_archives().await);
        assert!(!memory.check_archive_rotation_needed().await);
    }

    #[tokio::test]
    async fn gc_need_tracks_storage_threshold() {
        let (_dir, memory) = temp_memory(7).await;
        // Default 50 GB limit: a fresh store is far below 80%.
        assert!(!memory.check_garbage_collection_needed().await);
    }

    #[tokio::test]
    async fn run_garbage_collection_reports_freed_bytes() {
        let (_dir, memory) = temp_memory(7).await;
        let number = memory.start_new_iteration().await.unwrap();
        memory.complete_iteration(number, Map::new()).await;
        backdate_iteration(&memory, number, 30).await;

        // The iteration directory is removed, but the archive tarball is
        // added, so freed bytes may have either sign; the iteration dir
        // itself must be gone.
        memory.run_garbage_collection().await;
        assert!(!memory
            .iterations_dir()
            .join(ContextMemory::iteration_dir_name(number))
            .exists());
    }

    #[tokio::test]
    async fn orphan_sweep_removes_strays() {
        let (_dir, memory) = temp_memory(7).await;

        // Orphan directory without metadata, misnamed directory, stray
        // file, and a temp file in kv_store.
        fs::create_dir_all(memory.iterations_dir().join("iteration_005")).unwrap();
        fs::create_dir_all(memory.iterations_dir().join("scratch")).unwrap();
        fs::write(memory.iterations_dir().join("stray.json"), b"{}").unwrap();
        fs::write(memory.kv_dir().join("partial.tmp"), b"x").unwrap();
        fs::write(memory.kv_dir().join(".DS_Store"), b"x").unwrap();

        let stats = memory.collect_garbage().await;
        assert_eq!(stats.orphaned_directories, 2);
        assert_eq!(stats.orphaned_files, 3);
        assert!(stats.errors.is_empty());
        assert!(!memory.iterations_dir().join("scratch").exists());
        assert!(!memory.kv_dir().join("partial.tmp").exists());
    }

    #[tokio::test]
    async fn orphan_sweep_keeps_valid_iterations() {
        let (_dir, memory) = temp_memory(7).await;
        let number = memory.start_new_iteration().await.unwrap();

        let stats = memory.collect_garbage().await;
        assert_eq!(stats.orphaned_directories, 0);
        assert!(memory
            .iterations_dir()
            .join(ContextMemory::iteration_dir_name(number))
            .exists());
    }

    #[tokio::test]
    async fn batch_cleanup_is_bounded() {
        let (_dir, memory) = temp_memory(7).await;

        for _ in 0..3 {
            let number = memory.start_new_iteration().await.unwrap();
            memory.complete_iteration(number, Map::new()).await;
            backdate_iteration(&memory, number, 30).await;
        }

        memory.set_cleanup_batch_size(2).await;
        assert_eq!(memory.cleanup_batch().await, 2);
        assert_eq!(memory.cleanup_batch().await, 1);
        assert_eq!(memory.cleanup_batch().await, 0);
    }

    #[tokio::test]
    async fn performance_monitoring_records_history() {
        let (_dir, memory) = temp_memory(7).await;
        memory.enable_performance_monitoring().await;

        let number = memory.start_new_iteration().await.unwrap();
        memory.complete_iteration(number, Map::new()).await;
        backdate_iteration(&memory, number, 30).await;
        memory.cleanup_old_iterations().await;

        let metrics = memory.get_cleanup_metrics().await.unwrap();
        assert_eq!(metrics.items_cleaned, 1);
        assert_eq!(metrics.cleanup_history.len(), 1);
        assert!(metrics.cleanup_history[0].duration_seconds >= 0.0);
    }

    #[tokio::test]
    async fn kv_payload_counts_toward_storage_size() {
        let (_dir, memory) = temp_memory(7).await;
        let before = memory.get_total_storage_size().await;
        memory.set("bulk", json!("x".repeat(4096))).await.unwrap();
        assert!(memory.get_total_storage_size().await > before);
    }
}
