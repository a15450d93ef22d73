//! Circuit breaker for per-model fault tolerance
//!
//! Prevents cascading failures by monitoring error rates and temporarily
//! blocking calls to failing models. State transitions are totally ordered
//! by an async mutex; reading the state performs the OPEN → HALF_OPEN
//! transition once the recovery timeout has elapsed.

use chrono::{DateTime, Utc};
use coscient_core::GatewayError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failures exceeded threshold, rejecting calls
    Open,
    /// Testing if the model recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of breaker state for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStateInfo {
    pub state: String,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub recovery_timeout_secs: f64,
    pub half_open_calls: u32,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    half_open_calls: u32,
    half_open_successes: u32,
}

impl BreakerInner {
    /// Apply the OPEN → HALF_OPEN transition if the recovery timeout passed.
    fn refresh(&mut self, recovery_timeout: Duration) {
        if self.state == CircuitState::Open {
            if let Some(last) = self.last_failure_at {
                if last.elapsed() > recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 0;
                    self.half_open_successes = 0;
                }
            }
        }
    }

    fn on_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                // Close once every admitted trial call has succeeded.
                if self.half_open_successes >= self.half_open_calls.max(1) {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.last_failure_at = None;
                    self.last_failure_time = None;
                }
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self, failure_threshold: u32) {
        self.failure_count += 1;
        self.last_failure_at = Some(Instant::now());
        self.last_failure_time = Some(Utc::now());

        match self.state {
            // A failure during the trial period immediately reopens.
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            CircuitState::Closed => {
                if self.failure_count >= failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Per-model circuit breaker.
pub struct CircuitBreaker {
    model: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        model: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            model: model.into(),
            failure_threshold,
            recovery_timeout,
            half_open_max_calls,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                last_failure_time: None,
                half_open_calls: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// Breaker with the default thresholds used for gateway models.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self::new(model, 3, Duration::from_secs(60), 2)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Current state, applying the automatic OPEN → HALF_OPEN transition.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        inner.refresh(self.recovery_timeout);
        inner.state
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    /// Execute a call through the breaker.
    ///
    /// Rejects with `CircuitOpen` when the circuit is open or the half-open
    /// trial quota is exhausted; otherwise runs the future and records the
    /// outcome.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            inner.refresh(self.recovery_timeout);

            match inner.state {
                CircuitState::Open => {
                    return Err(GatewayError::CircuitOpen {
                        model: self.model.clone(),
                    });
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_calls >= self.half_open_max_calls {
                        return Err(GatewayError::CircuitOpen {
                            model: self.model.clone(),
                        });
                    }
                    inner.half_open_calls += 1;
                }
                CircuitState::Closed => {}
            }
        }

        match fut.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    pub async fn record_success(&self) {
        self.inner.lock().await.on_success();
    }

    pub async fn record_failure(&self) {
        self.inner.lock().await.on_failure(self.failure_threshold);
    }

    /// Manually force the breaker back to CLOSED.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.last_failure_time = None;
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;
    }

    pub async fn state_info(&self) -> BreakerStateInfo {
        let mut inner = self.inner.lock().await;
        inner.refresh(self.recovery_timeout);
        BreakerStateInfo {
            state: inner.state.as_str().to_string(),
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_time: inner.last_failure_time,
            recovery_timeout_secs: self.recovery_timeout.as_secs_f64(),
            half_open_calls: if inner.state == CircuitState::HalfOpen {
                inner.half_open_calls
            } else {
                0
            },
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("model", &self.model)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .finish()
    }
}
