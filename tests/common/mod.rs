#![allow(dead_code)]

use agent_orchestrator::agent::{Agent, AgentError};
use agent_orchestrator::config::{CoordinatorConfig, EngineConfig};
use agent_orchestrator::coordinator::AgentCoordinator;
use agent_orchestrator::error_recovery::ErrorRecoveryManager;
use agent_orchestrator::types::{AgentResult, AgentTask, AgentType};
use agent_orchestrator::workflow::WorkflowEngine;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fail every call with a connection error
    Fail,
    /// Fail the first n calls, then succeed
    FailTimes(u32),
    /// Report a failed result instead of an error
    ReportFailure(String),
    /// Never finish within any realistic timeout
    Hang,
    /// Succeed after the given delay
    Delay(Duration),
}

pub struct MockAgent {
    agent_type: AgentType,
    name: String,
    behavior: Behavior,
    healthy: AtomicBool,
    health_delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockAgent {
    pub fn new(agent_type: AgentType, behavior: Behavior) -> Self {
        Self {
            name: format!("mock-{}", agent_type),
            agent_type,
            behavior,
            healthy: AtomicBool::new(true),
            health_delay: Mutex::new(None),
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Share a completion log with other agents to observe ordering.
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = log;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_health_delay(&self, delay: Option<Duration>) {
        *self.health_delay.lock() = delay;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn completed_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_task(&self, task: &AgentTask) -> Result<AgentResult, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let outcome = match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(AgentError::Connection("connection refused".to_string())),
            Behavior::FailTimes(n) if call < *n => {
                Err(AgentError::Connection("connection reset".to_string()))
            }
            Behavior::FailTimes(_) => Ok(()),
            Behavior::ReportFailure(message) => {
                return Ok(AgentResult::failed(task, message.clone()));
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(())
            }
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        };

        outcome.map(|_| {
            self.log.lock().push(task.task_id.clone());
            AgentResult::completed(
                task,
                json!({ "agent": self.name, "task": task.task_id }),
                0.9,
            )
        })
    }

    async fn health_check(&self) -> bool {
        let delay = *self.health_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}

pub fn coordinator() -> Arc<AgentCoordinator> {
    coordinator_with(CoordinatorConfig::default())
}

pub fn coordinator_with(config: CoordinatorConfig) -> Arc<AgentCoordinator> {
    Arc::new(AgentCoordinator::new(config, Arc::new(ErrorRecoveryManager::new())))
}

pub fn engine(config: EngineConfig) -> Arc<WorkflowEngine> {
    let recovery = Arc::new(ErrorRecoveryManager::new());
    let coordinator = Arc::new(AgentCoordinator::new(
        CoordinatorConfig::default(),
        Arc::clone(&recovery),
    ));
    Arc::new(WorkflowEngine::new(config, coordinator, recovery))
}

pub fn task(id: &str, agent_type: AgentType) -> AgentTask {
    AgentTask::new(id, agent_type.clone(), format!("{}-agent", agent_type), json!({ "text": id }))
}
