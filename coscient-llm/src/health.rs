//! Health monitoring for the gateway
//!
//! A cooperatively scheduled loop that probes the gateway's health endpoint
//! on a fixed interval, updates model availability, resets breakers when
//! models recover, and keeps running through probe errors.

use crate::gateway::ArgoGateway;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coscient_core::{GatewayError, HealthReport, HealthStatus};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Probe surface the monitor drives. Implemented by the gateway; tests can
/// substitute their own.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health_status(&self) -> Result<Value, GatewayError>;
    fn mark_model_status(&self, model: &str, available: bool);
    async fn reset_circuit_breaker(&self, model: &str);
}

#[async_trait]
impl HealthProbe for ArgoGateway {
    async fn health_status(&self) -> Result<Value, GatewayError> {
        ArgoGateway::health_status(self).await
    }

    fn mark_model_status(&self, model: &str, available: bool) {
        ArgoGateway::mark_model_status(self, model, available)
    }

    async fn reset_circuit_breaker(&self, model: &str) {
        ArgoGateway::reset_circuit_breaker(self, model).await
    }
}

/// Callback invoked on overall status transitions.
pub type StatusChangeCallback = Box<dyn Fn(HealthStatus, HealthStatus) + Send + Sync>;

#[derive(Debug, Clone)]
struct MonitorState {
    current_status: HealthStatus,
    total_checks: u64,
    healthy_checks: u64,
    error_count: u64,
    last_status_change: Option<DateTime<Utc>>,
}

/// Snapshot of monitor statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorStats {
    pub current_status: HealthStatus,
    pub total_checks: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub uptime_percentage: f64,
    pub last_status_change: Option<DateTime<Utc>>,
}

/// Periodic health monitor.
pub struct HealthMonitor {
    interval: Duration,
    on_status_change: Option<StatusChangeCallback>,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            on_status_change: None,
        }
    }

    pub fn on_status_change(mut self, callback: StatusChangeCallback) -> Self {
        self.on_status_change = Some(callback);
        self
    }

    /// Start the monitoring loop. The first probe runs immediately.
    pub fn spawn(self, probe: Arc<dyn HealthProbe>) -> HealthMonitorHandle {
        let state = Arc::new(Mutex::new(MonitorState {
            current_status: HealthStatus::Unknown,
            total_checks: 0,
            healthy_checks: 0,
            error_count: 0,
            last_status_change: None,
        }));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let loop_state = Arc::clone(&state);
        let interval = self.interval;
        let on_status_change = self.on_status_change;

        let task = tokio::spawn(async move {
            // Models currently marked unavailable; used to reset breakers
            // exactly once on recovery.
            let mut unavailable: HashSet<String> = HashSet::new();

            loop {
                Self::check_once(&probe, &loop_state, &on_status_change, &mut unavailable).await;

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        HealthMonitorHandle {
            state,
            shutdown_tx,
            task,
        }
    }

    async fn check_once(
        probe: &Arc<dyn HealthProbe>,
        state: &Arc<Mutex<MonitorState>>,
        on_status_change: &Option<StatusChangeCallback>,
        unavailable: &mut HashSet<String>,
    ) {
        match probe.health_status().await {
            Ok(value) => {
                let report = HealthReport::from_value(&value);

                let transition = {
                    let mut state = match state.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    state.total_checks += 1;
                    if report.status == HealthStatus::Healthy {
                        state.healthy_checks += 1;
                    }
                    let old = state.current_status;
                    if old != report.status {
                        state.current_status = report.status;
                        state.last_status_change = Some(Utc::now());
                        Some((old, report.status))
                    } else {
                        None
                    }
                };

                if let (Some((old, new)), Some(callback)) = (transition, on_status_change) {
                    callback(old, new);
                }

                for (model, health) in &report.models {
                    if health.is_available() {
                        probe.mark_model_status(model, true);
                        if unavailable.remove(model) {
                            // Recovered: give the breaker a clean slate.
                            probe.reset_circuit_breaker(model).await;
                        }
                    } else {
                        probe.mark_model_status(model, false);
                        unavailable.insert(model.clone());
                    }
                }
            }
            Err(e) => {
                warn!("health probe failed: {e}");
                let mut state = match state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.total_checks += 1;
                state.error_count += 1;
            }
        }
    }
}

/// Handle over a running monitor: statistics access and shutdown.
pub struct HealthMonitorHandle {
    state: Arc<Mutex<MonitorState>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub fn stats(&self) -> HealthMonitorStats {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let total = state.total_checks.max(1) as f64;
        HealthMonitorStats {
            current_status: state.current_status,
            total_checks: state.total_checks,
            error_count: state.error_count,
            error_rate: state.error_count as f64 / total,
            uptime_percentage: state.healthy_checks as f64 / total * 100.0,
            last_status_change: state.last_status_change,
        }
    }

    /// Stop the monitoring loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
