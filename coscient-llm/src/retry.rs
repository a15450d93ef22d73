//! Retry engine with error categorization and ranked fallback
//!
//! Recoverable errors are retried with exponential backoff up to the
//! configured attempt cap; non-recoverable errors fail immediately. After
//! local exhaustion the fallback layer walks a ranked list of alternative
//! clients, recording every attempt, until one succeeds or the list runs
//! out.

use chrono::{DateTime, Utc};
use coscient_core::{ErrorCategory, GatewayError, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// ============================================================================
// RECORDS
// ============================================================================

/// Record of a single error occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub message: String,
    pub client_name: String,
    pub function_name: String,
    pub retry_attempt: u32,
    pub recoverable: bool,
}

/// Record of a fallback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub timestamp: DateTime<Utc>,
    pub from_client: String,
    pub to_client: String,
    pub reason: String,
    pub success: bool,
    pub duration: Duration,
}

/// Aggregated view over the error history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub by_category: HashMap<&'static str, usize>,
    pub by_client: HashMap<String, usize>,
    pub by_function: HashMap<String, usize>,
}

/// Aggregated view over the fallback history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackSummary {
    pub total_attempts: usize,
    pub successful: usize,
    pub by_target: HashMap<String, usize>,
}

// ============================================================================
// RETRY ENGINE
// ============================================================================

/// Retry/fallback engine shared by gateway call sites.
pub struct RetryEngine {
    config: RetryConfig,
    fallback_clients: Vec<String>,
    error_history: Mutex<Vec<ErrorRecord>>,
    error_counts: Mutex<HashMap<String, u64>>,
    fallback_history: Mutex<Vec<FallbackAttempt>>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig, fallback_clients: Vec<String>) -> Self {
        Self {
            config,
            fallback_clients,
            error_history: Mutex::new(Vec::new()),
            error_counts: Mutex::new(HashMap::new()),
            fallback_history: Mutex::new(Vec::new()),
        }
    }

    /// Backoff delay for a 0-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.config.base_delay.as_secs_f64()
            * self.config.exponential_base.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    async fn record_error(
        &self,
        err: &GatewayError,
        client_name: &str,
        function_name: &str,
        retry_attempt: u32,
    ) -> ErrorRecord {
        let category = ErrorCategory::of(err);
        let record = ErrorRecord {
            timestamp: Utc::now(),
            category,
            message: err.to_string(),
            client_name: client_name.to_string(),
            function_name: function_name.to_string(),
            retry_attempt,
            recoverable: category.recoverable(),
        };

        self.error_history.lock().await.push(record.clone());
        let key = format!("{client_name}:{function_name}");
        *self.error_counts.lock().await.entry(key).or_insert(0) += 1;

        warn!(
            client = client_name,
            function = function_name,
            category = category.as_str(),
            attempt = retry_attempt,
            recoverable = record.recoverable,
            "llm call error: {}",
            record.message
        );

        record
    }

    async fn record_fallback(
        &self,
        from_client: &str,
        to_client: &str,
        reason: &str,
        success: bool,
        duration: Duration,
    ) {
        let attempt = FallbackAttempt {
            timestamp: Utc::now(),
            from_client: from_client.to_string(),
            to_client: to_client.to_string(),
            reason: reason.to_string(),
            success,
            duration,
        };
        info!(
            from = from_client,
            to = to_client,
            success,
            duration_ms = duration.as_millis() as u64,
            "llm fallback: {reason}"
        );
        self.fallback_history.lock().await.push(attempt);
    }

    /// Call a function with automatic retry.
    ///
    /// Circuit-open rejections and other non-recoverable errors propagate
    /// immediately; recoverable errors back off exponentially until the
    /// attempt cap is reached.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        f: F,
        client_name: &str,
        function_name: &str,
    ) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            debug!(
                client = client_name,
                function = function_name,
                attempt = attempt + 1,
                max = self.config.max_retries + 1,
                "llm call"
            );

            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            client = client_name,
                            function = function_name,
                            retries = attempt,
                            "llm call succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let record = self.record_error(&err, client_name, function_name, attempt).await;

                    if attempt < self.config.max_retries && record.recoverable {
                        let delay = self.delay_for_attempt(attempt);
                        warn!(
                            client = client_name,
                            function = function_name,
                            delay_ms = delay.as_millis() as u64,
                            "llm call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(err);
                    } else {
                        error!(
                            client = client_name,
                            function = function_name,
                            attempts = attempt + 1,
                            "llm call failed"
                        );
                        return Err(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Connection {
            message: "retry loop exhausted without an error".to_string(),
        }))
    }

    /// Call a client-parameterized function, falling back through the
    /// ranked client list when the preferred client fails.
    ///
    /// Returns the result together with the name of the client that
    /// succeeded. When every client fails the last error is rethrown.
    pub async fn call_with_fallback<T, F, Fut>(
        &self,
        factory: F,
        function_name: &str,
        preferred_client: &str,
    ) -> Result<(T, String), GatewayError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut client_order = vec![preferred_client.to_string()];
        client_order.extend(
            self.fallback_clients
                .iter()
                .filter(|c| c.as_str() != preferred_client)
                .cloned(),
        );

        let mut last_error = None;

        for client_name in client_order {
            let start = Instant::now();
            let result = self
                .call_with_retry(|| factory(client_name.clone()), &client_name, function_name)
                .await;
            let duration = start.elapsed();

            match result {
                Ok(value) => {
                    if client_name != preferred_client {
                        self.record_fallback(
                            preferred_client,
                            &client_name,
                            "Primary client failed",
                            true,
                            duration,
                        )
                        .await;
                    }
                    return Ok((value, client_name));
                }
                Err(err) => {
                    if client_name != preferred_client {
                        self.record_fallback(
                            preferred_client,
                            &client_name,
                            "Primary client failed",
                            false,
                            duration,
                        )
                        .await;
                    }
                    last_error = Some(err);
                }
            }
        }

        error!(function = function_name, "all fallback clients failed");
        Err(last_error.unwrap_or(GatewayError::Connection {
            message: format!("no clients configured for {function_name}"),
        }))
    }

    pub async fn error_summary(&self, since: Option<DateTime<Utc>>) -> ErrorSummary {
        let history = self.error_history.lock().await;
        let mut summary = ErrorSummary::default();

        for record in history.iter() {
            if let Some(cutoff) = since {
                if record.timestamp < cutoff {
                    continue;
                }
            }
            summary.total_errors += 1;
            *summary.by_category.entry(record.category.as_str()).or_insert(0) += 1;
            *summary.by_client.entry(record.client_name.clone()).or_insert(0) += 1;
            *summary.by_function.entry(record.function_name.clone()).or_insert(0) += 1;
        }

        summary
    }

    pub async fn fallback_summary(&self) -> FallbackSummary {
        let history = self.fallback_history.lock().await;
        let mut summary = FallbackSummary {
            total_attempts: history.len(),
            ..Default::default()
        };
        for attempt in history.iter() {
            if attempt.success {
                summary.successful += 1;
            }
            *summary.by_target.entry(attempt.to_client.clone()).or_insert(0) += 1;
        }
        summary
    }

    pub async fn fallback_history(&self) -> Vec<FallbackAttempt> {
        self.fallback_history.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn engine(max_retries: u32) -> RetryEngine {
        RetryEngine::new(
            RetryConfig {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                exponential_base: 2.0,
            },
            vec!["backup-a".to_string(), "backup-b".to_string()],
        )
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let engine = engine(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = engine
            .call_with_retry(
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, GatewayError>(42)
                    }
                },
                "primary",
                "generate",
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recoverable_error_is_retried_until_success() {
        let engine = engine(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = engine
            .call_with_retry(
                move || {
                    let calls = calls2.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(GatewayError::Timeout { message: "t".into() })
                        } else {
                            Ok("ok")
                        }
                    }
                },
                "primary",
                "generate",
            )
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_recoverable_error_fails_immediately() {
        let engine = engine(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<(), _> = engine
            .call_with_retry(
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(GatewayError::Authentication { message: "401".into() })
                    }
                },
                "primary",
                "generate",
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Authentication { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_open_is_never_retried() {
        let engine = engine(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<(), _> = engine
            .call_with_retry(
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(GatewayError::CircuitOpen { model: "gpt4o".into() })
                    }
                },
                "primary",
                "generate",
            )
            .await;

        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_cap() {
        let engine = engine(2);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<(), _> = engine
            .call_with_retry(
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(GatewayError::Timeout { message: "t".into() })
                    }
                },
                "primary",
                "generate",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn backoff_delay_is_capped() {
        let engine = RetryEngine::new(
            RetryConfig {
                max_retries: 10,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(5),
                exponential_base: 2.0,
            },
            vec![],
        );
        assert_eq!(engine.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(engine.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(engine.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn fallback_succeeds_on_next_client() {
        // Preferred client times out; the first fallback returns "ok", and
        // the history records a single successful fallback attempt.
        let engine = engine(0);

        let (result, client) = engine
            .call_with_fallback(
                |client: String| async move {
                    if client == "primary" {
                        Err(GatewayError::Timeout { message: "t".into() })
                    } else {
                        Ok("ok")
                    }
                },
                "generate",
                "primary",
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(client, "backup-a");

        let history = engine.fallback_history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].from_client, "primary");
        assert_eq!(history[0].to_client, "backup-a");
    }

    #[tokio::test]
    async fn fallback_exhaustion_rethrows_last_error() {
        let engine = engine(0);

        let result: Result<((), String), _> = engine
            .call_with_fallback(
                |_client: String| async move {
                    Err(GatewayError::Timeout { message: "down".into() })
                },
                "generate",
                "primary",
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
        let summary = engine.fallback_summary().await;
        assert_eq!(summary.total_attempts, 2);
        assert_eq!(summary.successful, 0);
    }

    #[tokio::test]
    async fn error_summary_counts_by_category() {
        let engine = engine(0);
        let _: Result<(), _> = engine
            .call_with_retry(
                || async { Err(GatewayError::Timeout { message: "t".into() }) },
                "primary",
                "generate",
            )
            .await;
        let _: Result<(), _> = engine
            .call_with_retry(
                || async { Err(GatewayError::Authentication { message: "401".into() }) },
                "primary",
                "evaluate",
            )
            .await;

        let summary = engine.error_summary(None).await;
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.by_category["timeout"], 1);
        assert_eq!(summary.by_category["authentication"], 1);
        assert_eq!(summary.by_client["primary"], 2);
    }
}
