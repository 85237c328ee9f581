//! Workflow Recovery
//!
//! Labelled in-memory checkpoints plus the strategies used to bring a
//! persisted workflow back into a runnable state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::persistence::WorkflowPersistence;
use crate::types::{TaskStatus, WorkflowState, WorkflowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    TaskCompleted,
    StepCompleted,
    WorkflowPaused,
    ErrorOccurred,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub checkpoint_type: CheckpointType,
    pub created_at: DateTime<Utc>,
    pub state: WorkflowState,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RestartFromBeginning,
    ResumeFromLastSuccess,
    ResumeFromCheckpoint,
    SkipFailedTasks,
    ManualIntervention,
}

impl RecoveryStrategy {
    /// Strategy picked when the caller names none.
    pub fn for_status(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Failed => RecoveryStrategy::ResumeFromLastSuccess,
            WorkflowStatus::Running | WorkflowStatus::Paused => RecoveryStrategy::ResumeFromCheckpoint,
            WorkflowStatus::Created | WorkflowStatus::Completed | WorkflowStatus::Cancelled => {
                RecoveryStrategy::RestartFromBeginning
            }
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStrategy::RestartFromBeginning => "restart_from_beginning",
            RecoveryStrategy::ResumeFromLastSuccess => "resume_from_last_success",
            RecoveryStrategy::ResumeFromCheckpoint => "resume_from_checkpoint",
            RecoveryStrategy::SkipFailedTasks => "skip_failed_tasks",
            RecoveryStrategy::ManualIntervention => "manual_intervention",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for RecoveryStrategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "restart_from_beginning" => Ok(RecoveryStrategy::RestartFromBeginning),
            "resume_from_last_success" => Ok(RecoveryStrategy::ResumeFromLastSuccess),
            "resume_from_checkpoint" => Ok(RecoveryStrategy::ResumeFromCheckpoint),
            "skip_failed_tasks" => Ok(RecoveryStrategy::SkipFailedTasks),
            "manual_intervention" => Ok(RecoveryStrategy::ManualIntervention),
            other => Err(OrchestratorError::validation(format!(
                "Unknown recovery strategy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub workflow_id: String,
    pub strategy: RecoveryStrategy,
    pub success: bool,
    pub message: String,
    pub attempted_at: DateTime<Utc>,
}

pub struct WorkflowRecoveryManager {
    persistence: Arc<WorkflowPersistence>,
    checkpoints: RwLock<HashMap<String, Vec<WorkflowCheckpoint>>>,
    history: RwLock<Vec<RecoveryAttempt>>,
}

impl WorkflowRecoveryManager {
    pub fn new(persistence: Arc<WorkflowPersistence>) -> Self {
        Self {
            persistence,
            checkpoints: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot `state` under a new checkpoint id and return that id.
    pub fn create_checkpoint(
        &self,
        state: &WorkflowState,
        checkpoint_type: CheckpointType,
        metadata: HashMap<String, Value>,
    ) -> String {
        let checkpoint = WorkflowCheckpoint {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: state.workflow_id.clone(),
            checkpoint_type,
            created_at: Utc::now(),
            state: state.clone(),
            metadata,
        };
        let checkpoint_id = checkpoint.checkpoint_id.clone();
        self.checkpoints
            .write()
            .entry(state.workflow_id.clone())
            .or_default()
            .push(checkpoint);
        checkpoint_id
    }

    pub fn get_checkpoints(&self, workflow_id: &str) -> Vec<WorkflowCheckpoint> {
        self.checkpoints
            .read()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest_checkpoint(&self, workflow_id: &str) -> Option<WorkflowCheckpoint> {
        self.checkpoints
            .read()
            .get(workflow_id)
            .and_then(|cps| cps.last().cloned())
    }

    /// Drop every checkpoint of a workflow; returns how many were removed.
    pub fn clear_checkpoints(&self, workflow_id: &str) -> usize {
        self.checkpoints
            .write()
            .remove(workflow_id)
            .map(|cps| cps.len())
            .unwrap_or(0)
    }

    /// Bring a persisted workflow back with `strategy`, or the default for
    /// its status. The recovered state is persisted and the attempt recorded.
    pub async fn recover_workflow(
        &self,
        workflow_id: &str,
        strategy: Option<RecoveryStrategy>,
    ) -> Result<WorkflowState> {
        let state = self
            .persistence
            .load_workflow_state(workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
        let strategy = strategy.unwrap_or_else(|| RecoveryStrategy::for_status(state.status));

        let outcome = match self.apply_strategy(state, strategy) {
            Ok(mut recovered) => {
                recovered
                    .metadata
                    .insert("recovered_with".to_string(), serde_json::json!(strategy));
                recovered
                    .metadata
                    .insert("recovered_at".to_string(), serde_json::json!(Utc::now()));
                self.persistence
                    .save_workflow_state(&recovered)
                    .await
                    .map(|_| recovered)
            }
            Err(e) => Err(e),
        };

        let (success, message) = match &outcome {
            Ok(state) => (true, format!("Workflow recovered with status {}", state.status)),
            Err(e) => (false, e.to_string()),
        };
        if success {
            info!("Recovered workflow {} using {}", workflow_id, strategy);
        } else {
            warn!("Recovery of workflow {} using {} failed: {}", workflow_id, strategy, message);
        }
        self.history.write().push(RecoveryAttempt {
            workflow_id: workflow_id.to_string(),
            strategy,
            success,
            message,
            attempted_at: Utc::now(),
        });

        outcome
    }

    fn apply_strategy(&self, mut state: WorkflowState, strategy: RecoveryStrategy) -> Result<WorkflowState> {
        match strategy {
            RecoveryStrategy::RestartFromBeginning => {
                state.completed_steps.clear();
                state.pending_tasks.clear();
                state.running_tasks.clear();
                state.completed_tasks.clear();
                state.failed_tasks.clear();
                state.agent_results.clear();
                for task in &mut state.tasks {
                    task.status = TaskStatus::Pending;
                    task.retry_count = 0;
                    task.started_at = None;
                    task.completed_at = None;
                }
                state.current_step = None;
                state.status = WorkflowStatus::Created;
                state.progress = 0.0;
                state.end_time = None;
                Ok(state)
            }
            RecoveryStrategy::ResumeFromLastSuccess => {
                state.running_tasks.clear();
                state.status = WorkflowStatus::Running;
                state.end_time = None;
                Ok(state)
            }
            RecoveryStrategy::ResumeFromCheckpoint => {
                let checkpoint = self.latest_checkpoint(&state.workflow_id).ok_or_else(|| {
                    OrchestratorError::recovery(format!(
                        "No checkpoint available for workflow {}",
                        state.workflow_id
                    ))
                })?;
                let mut restored = checkpoint.state;
                restored.running_tasks.clear();
                restored.status = WorkflowStatus::Running;
                restored.end_time = None;
                restored.metadata.insert(
                    "restored_checkpoint".to_string(),
                    serde_json::json!(checkpoint.checkpoint_id),
                );
                Ok(restored)
            }
            RecoveryStrategy::SkipFailedTasks | RecoveryStrategy::ManualIntervention => {
                Err(OrchestratorError::UnsupportedRecoveryStrategy(strategy.to_string()))
            }
        }
    }

    /// Startup hook: fail interrupted workflows in persistence, then resume
    /// each from its last success.
    pub async fn auto_recover_interrupted_workflows(&self) -> Result<Vec<WorkflowState>> {
        let interrupted = self.persistence.recover_interrupted_workflows().await?;
        let mut recovered = Vec::with_capacity(interrupted.len());
        for state in interrupted {
            match self
                .recover_workflow(&state.workflow_id, Some(RecoveryStrategy::ResumeFromLastSuccess))
                .await
            {
                Ok(state) => recovered.push(state),
                Err(e) => warn!("Auto-recovery skipped workflow {}: {}", state.workflow_id, e),
            }
        }
        info!("Auto-recovered {} interrupted workflow(s)", recovered.len());
        Ok(recovered)
    }

    /// Recorded attempts, optionally for a single workflow.
    pub fn recovery_history(&self, workflow_id: Option<&str>) -> Vec<RecoveryAttempt> {
        self.history
            .read()
            .iter()
            .filter(|a| workflow_id.is_none_or(|id| a.workflow_id == id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_by_status() {
        assert_eq!(
            RecoveryStrategy::for_status(WorkflowStatus::Failed),
            RecoveryStrategy::ResumeFromLastSuccess
        );
        assert_eq!(
            RecoveryStrategy::for_status(WorkflowStatus::Paused),
            RecoveryStrategy::ResumeFromCheckpoint
        );
    }

    #[test]
    fn test_strategy_names() {
        let strategy: RecoveryStrategy = "resume_from_checkpoint".parse().unwrap();
        assert_eq!(strategy, RecoveryStrategy::ResumeFromCheckpoint);
        assert_eq!(strategy.to_string(), "resume_from_checkpoint");
        assert!("rewind".parse::<RecoveryStrategy>().is_err());
    }

    #[test]
    fn test_checkpoints_accumulate() {
        let manager = WorkflowRecoveryManager::new(Arc::new(WorkflowPersistence::in_memory()));
        let state = WorkflowState::new("sub", "t", serde_json::json!({}));

        manager.create_checkpoint(&state, CheckpointType::Manual, HashMap::new());
        let latest = manager.create_checkpoint(&state, CheckpointType::TaskCompleted, HashMap::new());

        assert_eq!(manager.get_checkpoints(&state.workflow_id).len(), 2);
        assert_eq!(
            manager.latest_checkpoint(&state.workflow_id).unwrap().checkpoint_id,
            latest
        );
        assert_eq!(manager.clear_checkpoints(&state.workflow_id), 2);
        assert!(manager.latest_checkpoint(&state.workflow_id).is_none());
    }
}
