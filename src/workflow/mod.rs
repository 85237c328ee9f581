//! Workflow Engine
//!
//! Builds a task graph for each workflow from a registered builder and runs
//! it with dependency-aware scheduling:
//! - at most `max_concurrent_tasks` tasks in flight per workflow
//! - higher priority first when slots are scarce, then declaration order
//! - per-attempt timeout and exponential retry backoff
//! - failed tasks resolve and never block their dependents
//! - cancellation through a per-workflow token

pub mod definitions;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentError};
use crate::config::EngineConfig;
use crate::coordinator::AgentCoordinator;
use crate::error::{OrchestratorError, Result};
use crate::error_recovery::{ErrorContext, ErrorRecoveryManager};
use crate::persistence::WorkflowPersistence;
use crate::recovery::{CheckpointType, WorkflowRecoveryManager};
use crate::types::{AgentResult, AgentTask, WorkflowState, WorkflowStatus};

/// Turns a workflow's input payload into its task list.
pub type WorkflowBuilder = Arc<dyn Fn(&Value) -> Result<Vec<AgentTask>> + Send + Sync>;

pub struct WorkflowEngine {
    config: EngineConfig,
    workflows: DashMap<String, WorkflowState>,
    builders: RwLock<HashMap<String, WorkflowBuilder>>,
    cancel_tokens: DashMap<String, CancellationToken>,
    executing: DashSet<String>,
    coordinator: Arc<AgentCoordinator>,
    error_recovery: Arc<ErrorRecoveryManager>,
    persistence: Option<Arc<WorkflowPersistence>>,
    checkpoints: Option<Arc<WorkflowRecoveryManager>>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        coordinator: Arc<AgentCoordinator>,
        error_recovery: Arc<ErrorRecoveryManager>,
    ) -> Self {
        Self {
            config,
            workflows: DashMap::new(),
            builders: RwLock::new(HashMap::new()),
            cancel_tokens: DashMap::new(),
            executing: DashSet::new(),
            coordinator,
            error_recovery,
            persistence: None,
            checkpoints: None,
        }
    }

    /// Snapshot every milestone to `persistence`.
    pub fn with_persistence(mut self, persistence: Arc<WorkflowPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Record a checkpoint after every resolved task.
    pub fn with_checkpoints(mut self, recovery: Arc<WorkflowRecoveryManager>) -> Self {
        self.checkpoints = Some(recovery);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<AgentCoordinator> {
        &self.coordinator
    }

    pub fn create_workflow(
        &self,
        submission_id: impl Into<String>,
        workflow_type: impl Into<String>,
        input_data: Value,
    ) -> WorkflowState {
        let state = WorkflowState::new(submission_id, workflow_type, input_data);
        info!(
            "Created workflow {} ({}) for submission {}",
            state.workflow_id, state.workflow_type, state.submission_id
        );
        self.workflows.insert(state.workflow_id.clone(), state.clone());
        state
    }

    /// Register `builder` under `workflow_type`. The last registration wins.
    pub fn register_workflow<F>(&self, workflow_type: impl Into<String>, builder: F)
    where
        F: Fn(&Value) -> Result<Vec<AgentTask>> + Send + Sync + 'static,
    {
        let workflow_type = workflow_type.into();
        if self
            .builders
            .write()
            .insert(workflow_type.clone(), Arc::new(builder))
            .is_some()
        {
            warn!("Replaced workflow builder for '{}'", workflow_type);
        } else {
            debug!("Registered workflow builder for '{}'", workflow_type);
        }
    }

    pub fn registered_workflow_types(&self) -> Vec<String> {
        self.builders.read().keys().cloned().collect()
    }

    pub fn is_workflow_registered(&self, workflow_type: &str) -> bool {
        self.builders.read().contains_key(workflow_type)
    }

    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.coordinator.register_agent(agent);
    }

    /// Build and run a created workflow to completion.
    ///
    /// Returns the final state. Workflow-level failures (unregistered type,
    /// builder error, dependency deadlock) mark the workflow failed and come
    /// back as `Err`. A workflow cancelled mid-run ends `Ok` with status
    /// cancelled.
    pub async fn execute_workflow(&self, workflow_id: &str) -> Result<WorkflowState> {
        let (workflow_type, input_data) = {
            let state = self
                .workflows
                .get(workflow_id)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
            if state.status.is_finished() || state.status == WorkflowStatus::Running {
                return Err(OrchestratorError::workflow(format!(
                    "Workflow {} cannot be executed while {}",
                    workflow_id, state.status
                )));
            }
            (state.workflow_type.clone(), state.input_data.clone())
        };
        if !self.executing.insert(workflow_id.to_string()) {
            return Err(OrchestratorError::workflow(format!(
                "Workflow {} is already executing",
                workflow_id
            )));
        }

        let token = self
            .cancel_tokens
            .entry(workflow_id.to_string())
            .or_default()
            .clone();

        let outcome = self
            .run_workflow(workflow_id, &workflow_type, &input_data, &token)
            .await;

        let final_state = self.update_workflow(workflow_id, |state| {
            state.end_time = Some(Utc::now());
            state.current_step = None;
            if token.is_cancelled() {
                state.status = WorkflowStatus::Cancelled;
                return;
            }
            match &outcome {
                Ok(()) => {
                    state.status = WorkflowStatus::Completed;
                    state.progress = 1.0;
                }
                Err(e) => {
                    state.status = WorkflowStatus::Failed;
                    state
                        .metadata
                        .insert("error".to_string(), serde_json::json!(e.to_string()));
                }
            }
        });
        self.cancel_tokens.remove(workflow_id);
        self.executing.remove(workflow_id);
        let final_state = final_state?;
        self.persist(&final_state).await;

        match outcome {
            Ok(()) => {
                info!(
                    "Workflow {} finished: {} ({} task(s), {} failed)",
                    workflow_id,
                    final_state.status,
                    final_state.total_tasks(),
                    final_state.failed_tasks.len()
                );
                Ok(final_state)
            }
            Err(e) => {
                error!("Workflow {} failed: {}", workflow_id, e);
                let context = ErrorContext::default().with_workflow(workflow_id);
                Err(self
                    .error_recovery
                    .handle_error(e.clone(), &context)
                    .err()
                    .unwrap_or(e))
            }
        }
    }

    async fn run_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input_data: &Value,
        token: &CancellationToken,
    ) -> Result<()> {
        let builder = self
            .builders
            .read()
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| OrchestratorError::WorkflowTypeNotRegistered(workflow_type.to_string()))?;

        let tasks = builder(input_data)?;
        let started = self.update_workflow(workflow_id, |state| {
            state.load_tasks(tasks);
            state.status = WorkflowStatus::Running;
        })?;
        info!(
            "Running workflow {} with {} task(s)",
            workflow_id,
            started.total_tasks()
        );
        self.persist(&started).await;

        self.schedule(workflow_id, token).await
    }

    /// Launch eligible tasks under the concurrency cap and resolve them as
    /// they finish, until every task is resolved.
    async fn schedule(&self, workflow_id: &str, token: &CancellationToken) -> Result<()> {
        let max_concurrent = self.config.max_concurrent_tasks.max(1);
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !token.is_cancelled() {
                let slots = max_concurrent.saturating_sub(in_flight.len());
                for task in self.eligible_tasks(workflow_id, slots)? {
                    self.update_workflow(workflow_id, |state| state.mark_running(&task.task_id))?;
                    debug!("Launching task {} on {}", task.task_id, task.agent_type);
                    in_flight.push(self.run_task(task, token.clone()));
                }
            }

            if in_flight.is_empty() {
                if token.is_cancelled() {
                    return Ok(());
                }
                let state = self.snapshot(workflow_id)?;
                let remaining = state.total_tasks() - state.completed_tasks.len();
                if remaining == 0 {
                    return Ok(());
                }
                return Err(OrchestratorError::DependencyDeadlock {
                    workflow_id: workflow_id.to_string(),
                    remaining,
                });
            }

            if let Some((result, attempts)) = in_flight.next().await {
                self.resolve(workflow_id, result, attempts).await?;
            }
        }
    }

    /// Up to `limit` pending tasks whose dependencies have all resolved,
    /// highest priority first.
    fn eligible_tasks(&self, workflow_id: &str, limit: usize) -> Result<Vec<AgentTask>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let state = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut ready: Vec<AgentTask> = state
            .tasks
            .iter()
            .filter(|t| state.pending_tasks.contains(&t.task_id))
            .filter(|t| t.dependencies_met(&state.completed_tasks))
            .cloned()
            .collect();
        ready.sort_by_key(|t| std::cmp::Reverse(t.priority));
        ready.truncate(limit);
        Ok(ready)
    }

    async fn resolve(&self, workflow_id: &str, result: AgentResult, attempts: u32) -> Result<()> {
        let task_id = result.task_id.clone();
        let failed = result.status.is_failure();
        debug!(
            "Task {} resolved as {} after {} attempt(s)",
            task_id, result.status, attempts
        );

        let state = self.update_workflow(workflow_id, |state| {
            if let Some(task) = state.task_mut(&task_id) {
                task.retry_count = attempts.saturating_sub(1);
            }
            state.resolve_task(result);
        })?;

        if let Some(recovery) = &self.checkpoints {
            let checkpoint_type = if failed {
                CheckpointType::ErrorOccurred
            } else {
                CheckpointType::TaskCompleted
            };
            let metadata = HashMap::from([("task_id".to_string(), serde_json::json!(task_id))]);
            recovery.create_checkpoint(&state, checkpoint_type, metadata);
        }
        self.persist(&state).await;
        Ok(())
    }

    /// Run one task to its final result unless the workflow is cancelled
    /// first. Also returns the number of attempts made.
    async fn run_task(&self, task: AgentTask, token: CancellationToken) -> (AgentResult, u32) {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Task {} cancelled", task.task_id);
                (AgentResult::cancelled(&task), 0)
            }
            outcome = self.execute_task(&task) => outcome,
        }
    }

    async fn execute_task(&self, task: &AgentTask) -> (AgentResult, u32) {
        if self.config.use_coordination {
            return (self.coordinator.execute_task_with_coordination(task).await, 1);
        }

        let Some(agent) = self.coordinator.get_agent(&task.agent_type) else {
            warn!("No agent registered for {} (task {})", task.agent_type, task.task_id);
            return (
                AgentResult::failed(task, format!("Agent {} not registered", task.agent_type)),
                0,
            );
        };

        if self.coordinator.is_offline(&task.agent_type) {
            return (self.coordinator.handle_agent_degradation(task), 0);
        }

        let check_timeout =
            Duration::from_secs(self.coordinator.config().health_check_timeout_secs);
        let healthy = matches!(
            tokio::time::timeout(check_timeout, agent.health_check()).await,
            Ok(true)
        );
        if !healthy {
            warn!("Agent {} failed its pre-task health check", task.agent_type);
            return (
                AgentResult::failed(task, format!("Agent {} failed health check", task.agent_type)),
                0,
            );
        }

        let mut attempt = 0u32;
        loop {
            let mut current = task.clone();
            current.retry_count = attempt;

            let started = Instant::now();
            let result = match self.coordinator.dispatch(&current).await {
                Ok(result) if result.is_success() => return (result, attempt + 1),
                Ok(result) => result,
                Err(AgentError::Timeout(_)) => {
                    AgentResult::timed_out(task, task.timeout_duration())
                }
                Err(e) => AgentResult::failed(task, e.to_string())
                    .with_processing_time(started.elapsed().as_secs_f64()),
            };

            if attempt >= task.max_retries {
                return (result, attempt + 1);
            }

            let delay = self.retry_delay(attempt);
            debug!(
                "Task {} attempt {} ended {}; retrying in {:?}",
                task.task_id,
                attempt + 1,
                result.status,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// 2^attempt times the base delay, capped when a maximum is configured.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self
            .config
            .retry_base_delay()
            .saturating_mul(2u32.saturating_pow(attempt));
        match self.config.max_retry_delay() {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Mark a workflow cancelled and stop its in-flight tasks. Returns false
    /// when the workflow had already finished.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<bool> {
        let state = {
            let mut state = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
            if state.status.is_finished() {
                return Ok(false);
            }
            state.status = WorkflowStatus::Cancelled;
            state.end_time = Some(Utc::now());
            state.clone()
        };

        self.cancel_tokens
            .entry(workflow_id.to_string())
            .or_default()
            .cancel();
        info!("Cancelled workflow {}", workflow_id);
        self.persist(&state).await;
        Ok(true)
    }

    /// In-memory state first, then persistence.
    pub async fn get_workflow_status(&self, workflow_id: &str) -> Result<WorkflowState> {
        if let Some(state) = self.workflows.get(workflow_id) {
            return Ok(state.clone());
        }
        if let Some(persistence) = &self.persistence {
            if let Some(state) = persistence.load_workflow_state(workflow_id).await? {
                return Ok(state);
            }
        }
        Err(OrchestratorError::WorkflowNotFound(workflow_id.to_string()))
    }

    pub fn is_executing(&self, workflow_id: &str) -> bool {
        self.executing.contains(workflow_id)
    }

    /// Replace the tracked state of an idle workflow, e.g. after recovery.
    /// Returns false when the workflow is untracked or executing.
    pub fn refresh_workflow(&self, state: WorkflowState) -> bool {
        if self.is_executing(&state.workflow_id) {
            debug!("Not refreshing workflow {} while it executes", state.workflow_id);
            return false;
        }
        match self.workflows.get_mut(&state.workflow_id) {
            Some(mut tracked) => {
                *tracked = state;
                true
            }
            None => false,
        }
    }

    /// Stop tracking an idle workflow. Returns whether it was removed.
    pub fn evict(&self, workflow_id: &str) -> bool {
        if self.is_executing(workflow_id) {
            return false;
        }
        self.cancel_tokens.remove(workflow_id);
        self.workflows.remove(workflow_id).is_some()
    }

    /// Evict every idle workflow that started at or before `cutoff`.
    pub fn evict_started_before(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .workflows
            .iter()
            .filter(|entry| entry.start_time <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        let evicted = stale.iter().filter(|id| self.evict(id)).count();
        if evicted > 0 {
            debug!("Evicted {} stale workflow(s) from the engine", evicted);
        }
        evicted
    }

    pub fn list_workflows(&self) -> Vec<WorkflowState> {
        let mut workflows: Vec<WorkflowState> =
            self.workflows.iter().map(|entry| entry.value().clone()).collect();
        workflows.sort_by_key(|w| w.start_time);
        workflows
    }

    fn snapshot(&self, workflow_id: &str) -> Result<WorkflowState> {
        self.workflows
            .get(workflow_id)
            .map(|state| state.clone())
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))
    }

    fn update_workflow<F>(&self, workflow_id: &str, f: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut state = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
        f(&mut state);
        Ok(state.clone())
    }

    async fn persist(&self, state: &WorkflowState) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_workflow_state(state).await {
                warn!("Failed to persist workflow {}: {}", state.workflow_id, e);
            }
        }
    }
}
