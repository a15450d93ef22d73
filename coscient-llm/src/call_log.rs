//! Structured call logging for gateway operations
//!
//! Three rotating text logs (operations, performance, errors) under a
//! configurable directory. Each line is a timestamped structured record
//! tagged with request id, client name, function name, duration and
//! success. Privacy mode redacts values whose field names look like
//! credentials before anything reaches disk.

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

static SENSITIVE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)password|token|key|secret|api").expect("valid literal regex"));

/// Configuration for the call logger.
#[derive(Debug, Clone, PartialEq)]
pub struct CallLogConfig {
    /// Directory for log files.
    pub log_dir: PathBuf,
    /// Max size of each log file before rotation, in megabytes.
    pub max_log_size_mb: u64,
    /// Number of rotated backups to keep per file.
    pub backup_count: u32,
    /// Redact credential-looking fields.
    pub privacy_mode: bool,
}

impl Default for CallLogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/llm"),
            max_log_size_mb: 100,
            backup_count: 5,
            privacy_mode: false,
        }
    }
}

/// One structured log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub request_id: String,
    pub client_name: String,
    pub function_name: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl CallRecord {
    pub fn new(
        request_id: impl Into<String>,
        client_name: impl Into<String>,
        function_name: impl Into<String>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            client_name: client_name.into(),
            function_name: function_name.into(),
            duration_ms,
            success,
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.detail.insert(key.into(), value);
        self
    }
}

struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Size-based rotation: shift `.1 .. .N` up, rename the live file to
    /// `.1`, reopen fresh.
    fn rotate_if_needed(&mut self, max_bytes: u64, backup_count: u32) -> std::io::Result<()> {
        let size = self.file.metadata()?.len();
        if size < max_bytes || backup_count == 0 {
            return Ok(());
        }

        for i in (1..backup_count).rev() {
            let from = rotated_path(&self.path, i);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.path, i + 1))?;
            }
        }
        fs::rename(&self.path, rotated_path(&self.path, 1))?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn write_line(&mut self, line: &str, max_bytes: u64, backup_count: u32) -> std::io::Result<()> {
        self.rotate_if_needed(max_bytes, backup_count)?;
        writeln!(self.file, "{line}")
    }
}

fn rotated_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Redact values whose field name matches the sensitive-field pattern,
/// recursively through nested objects.
pub(crate) fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                if SENSITIVE_FIELD.is_match(key) {
                    out.insert(key.clone(), Value::from("[REDACTED]"));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Rotating file logger for gateway call records.
pub struct CallLogger {
    config: CallLogConfig,
    operations: Mutex<LogFile>,
    performance: Mutex<LogFile>,
    errors: Mutex<LogFile>,
}

impl CallLogger {
    pub fn new(config: CallLogConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.log_dir)?;
        Ok(Self {
            operations: Mutex::new(LogFile::open(config.log_dir.join("operations.log"))?),
            performance: Mutex::new(LogFile::open(config.log_dir.join("performance.log"))?),
            errors: Mutex::new(LogFile::open(config.log_dir.join("errors.log"))?),
            config,
        })
    }

    fn format_line(&self, level: &str, record: &CallRecord) -> String {
        let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
        if self.config.privacy_mode {
            value = redact(&value);
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        format!("{timestamp} - {level} - {value}")
    }

    fn write(&self, target: &Mutex<LogFile>, line: &str) {
        let max_bytes = self.config.max_log_size_mb * 1024 * 1024;
        let mut file = match target.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_line(line, max_bytes, self.config.backup_count) {
            warn!("failed to write call log: {e}");
        }
    }

    /// Log a completed operation.
    pub fn log_operation(&self, record: &CallRecord) {
        let line = self.format_line("INFO", record);
        self.write(&self.operations, &line);
    }

    /// Log timing for an operation.
    pub fn log_performance(&self, record: &CallRecord) {
        let line = self.format_line("PERF", record);
        self.write(&self.performance, &line);
    }

    /// Log a failed operation.
    pub fn log_error(&self, record: &CallRecord) {
        let line = self.format_line("ERROR", record);
        self.write(&self.errors, &line);
    }
}

impl std::fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLogger")
            .field("log_dir", &self.config.log_dir)
            .field("privacy_mode", &self.config.privacy_mode)
            .finish()
    }
}
