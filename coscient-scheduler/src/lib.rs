//! COSCIENT Scheduler - Iteration Lifecycle and Agent Dispatch
//!
//! The scheduler owns the iteration lifecycle, a bounded task queue, and
//! the registered agent instances. Callers submit typed agent tasks; each
//! iteration drains the queue, dispatches to the matching agent, and
//! completes the iteration with a summary. Background tasks (queue
//! processor, health monitor) consume the scheduler's shutdown signal.

use coscient_agents::{Agent, AgentTask};
use coscient_core::{AgentError, AgentType, CoscientResult, MemoryError};
use coscient_memory::ContextMemory;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// A task bound to the agent type that will run it.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub agent_type: AgentType,
    pub task: AgentTask,
}

/// Outcome of one dispatched task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub agent_type: AgentType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one full iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration_number: u32,
    pub outcomes: Vec<TaskOutcome>,
}

impl IterationReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }
}

/// Coordinates agents against the Context Memory.
pub struct Scheduler {
    memory: Arc<ContextMemory>,
    agents: HashMap<AgentType, Arc<dyn Agent>>,
    queue: Mutex<VecDeque<ScheduledTask>>,
    max_queue_size: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(memory: Arc<ContextMemory>, max_queue_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            memory,
            agents: HashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            max_queue_size,
            shutdown_tx,
        }
    }

    /// Register an agent instance. The latest registration for an agent
    /// type wins.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.agent_type(), agent);
    }

    pub fn registered_agents(&self) -> Vec<AgentType> {
        let mut agents: Vec<AgentType> = self.agents.keys().copied().collect();
        agents.sort_by_key(|a| a.as_str());
        agents
    }

    pub fn memory(&self) -> &Arc<ContextMemory> {
        &self.memory
    }

    /// Shutdown signal receiver for background tasks (queue processor,
    /// health monitor). Closing the signal stops them.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Flip the shutdown signal; every subscribed background task exits at
    /// its next suspension point.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // ------------------------------------------------------------------
    // Task queue
    // ------------------------------------------------------------------

    /// Submit a task for the next iteration. Sheds load when the queue is
    /// full rather than blocking.
    pub async fn submit(&self, agent_type: AgentType, task: AgentTask) -> CoscientResult<()> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.max_queue_size {
            return Err(AgentError::QueueFull.into());
        }
        queue.push_back(ScheduledTask { agent_type, task });
        Ok(())
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn dispatch(&self, scheduled: ScheduledTask) -> TaskOutcome {
        let ScheduledTask { agent_type, task } = scheduled;
        let task_id = task.task_id.clone();

        let Some(agent) = self.agents.get(&agent_type) else {
            warn!(%agent_type, task_id, "no agent registered for task");
            return TaskOutcome {
                task_id,
                agent_type,
                success: false,
                artifact: None,
                error: Some(AgentError::NotRegistered { agent_type }.to_string()),
            };
        };

        match agent.execute(task).await {
            Ok(artifact) => TaskOutcome {
                task_id,
                agent_type,
                success: true,
                artifact: Some(artifact),
                error: None,
            },
            Err(e) => {
                warn!(%agent_type, task_id, "task failed: {e}");
                TaskOutcome {
                    task_id,
                    agent_type,
                    success: false,
                    artifact: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Iteration lifecycle
    // ------------------------------------------------------------------

    /// Run one iteration: start it, drain the queue dispatching each task
    /// to its agent, then complete the iteration with a summary.
    pub async fn run_iteration(&self) -> CoscientResult<IterationReport> {
        let iteration_number = self.memory.start_new_iteration().await?;
        info!(iteration = iteration_number, "iteration started");

        let mut outcomes = Vec::new();
        loop {
            let next = self.queue.lock().await.pop_front();
            let Some(scheduled) = next else {
                break;
            };
            outcomes.push(self.dispatch(scheduled).await);
        }

        let report = IterationReport {
            iteration_number,
            outcomes,
        };

        let mut summary = Map::new();
        summary.insert("tasks_completed".to_string(), json!(report.completed()));
        summary.insert("tasks_failed".to_string(), json!(report.failed()));

        if !self.memory.complete_iteration(iteration_number, summary).await {
            return Err(MemoryError::IterationNotFound {
                number: iteration_number,
            }
            .into());
        }

        info!(
            iteration = iteration_number,
            completed = report.completed(),
            failed = report.failed(),
            "iteration finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("agents", &self.agents.len())
            .field("max_queue_size", &self.max_queue_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coscient_core::MemoryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAgent {
        agent_type: AgentType,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingAgent {
        fn new(agent_type: AgentType, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                agent_type,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        async fn execute(&self, task: AgentTask) -> CoscientResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AgentError::Llm {
                    code: "model_error".to_string(),
                    message: "synthetic".to_string(),
                }
                .into())
            } else {
                Ok(json!({"task": task.task_id}))
            }
        }
    }

    async fn temp_scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        (dir, Scheduler::new(memory, 16))
    }

    #[tokio::test]
    async fn dispatches_tasks_to_registered_agents() {
        let (_dir, mut scheduler) = temp_scheduler().await;
        let generation = CountingAgent::new(AgentType::Generation, false);
        let reflection = CountingAgent::new(AgentType::Reflection, false);
        scheduler.register_agent(generation.clone());
        scheduler.register_agent(reflection.clone());

        scheduler
            .submit(AgentType::Generation, AgentTask::new("t1", "goal"))
            .await
            .unwrap();
        scheduler
            .submit(AgentType::Reflection, AgentTask::new("t2", "review"))
            .await
            .unwrap();

        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.iteration_number, 1);
        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reflection.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.queue_len().await, 0);
    }

    #[tokio::test]
    async fn iteration_summary_is_persisted() {
        let (_dir, mut scheduler) = temp_scheduler().await;
        scheduler.register_agent(CountingAgent::new(AgentType::Generation, false));
        scheduler.register_agent(CountingAgent::new(AgentType::Ranking, true));

        scheduler
            .submit(AgentType::Generation, AgentTask::new("ok", "goal"))
            .await
            .unwrap();
        scheduler
            .submit(AgentType::Ranking, AgentTask::new("boom", "rank"))
            .await
            .unwrap();

        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(report.failed(), 1);

        let info = scheduler.memory().get_iteration_info(1).await.unwrap();
        let summary = info.summary.unwrap();
        assert_eq!(summary["tasks_completed"], json!(1));
        assert_eq!(summary["tasks_failed"], json!(1));
    }

    #[tokio::test]
    async fn unregistered_agent_fails_the_task_not_the_iteration() {
        let (_dir, scheduler) = temp_scheduler().await;
        scheduler
            .submit(AgentType::Evolution, AgentTask::new("t1", "evolve"))
            .await
            .unwrap();

        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(report.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not registered"));
    }

    #[tokio::test]
    async fn full_queue_sheds_load() {
        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();
        let scheduler = Scheduler::new(memory, 1);

        scheduler
            .submit(AgentType::Generation, AgentTask::new("t1", "a"))
            .await
            .unwrap();
        let err = scheduler
            .submit(AgentType::Generation, AgentTask::new("t2", "b"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("queue is full"));
    }

    #[tokio::test]
    async fn consecutive_iterations_increment() {
        let (_dir, scheduler) = temp_scheduler().await;
        assert_eq!(scheduler.run_iteration().await.unwrap().iteration_number, 1);
        assert_eq!(scheduler.run_iteration().await.unwrap().iteration_number, 2);
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_subscribers() {
        let (_dir, scheduler) = temp_scheduler().await;
        let mut signal = scheduler.shutdown_signal();
        assert!(!*signal.borrow());

        scheduler.shutdown();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }

    #[tokio::test]
    async fn works_with_a_real_generation_agent() {
        use coscient_agents::{AgentConfig, GenerationAgent, TaskClient};
        use coscient_llm::{MockConfiguration, MockPattern, MockProvider, MockResponse};

        let dir = tempfile::tempdir().unwrap();
        let memory =
            Arc::new(ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap());
        memory.initialize().await.unwrap();

        let mut mock = MockConfiguration::new();
        mock.add_response(
            MockPattern::any(),
            MockResponse::new(r#"{"id": "h1", "summary": "s", "confidence": 0.9}"#),
        );
        let agent = GenerationAgent::new(
            TaskClient::new(Arc::new(MockProvider::new(mock))),
            Arc::clone(&memory),
            AgentConfig::default(),
        );

        let mut scheduler = Scheduler::new(Arc::clone(&memory), 8);
        scheduler.register_agent(Arc::new(agent));

        scheduler
            .submit(
                AgentType::Generation,
                AgentTask::new("t1", "map the proteome"),
            )
            .await
            .unwrap();

        let report = scheduler.run_iteration().await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(report.outcomes[0].artifact.as_ref().unwrap()["id"], json!("h1"));

        // The artifact was persisted into the iteration the scheduler ran.
        let stats = memory.get_iteration_statistics(1).await.unwrap();
        assert_eq!(stats.agent_outputs_count, 1);
    }
}
