use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::agent::{AgentResult, AgentTask, TaskStatus};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl WorkflowStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
            WorkflowStatus::Paused => write!(f, "paused"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" => Ok(WorkflowStatus::Created),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            "paused" => Ok(WorkflowStatus::Paused),
            _ => Err(OrchestratorError::validation(format!(
                "Invalid workflow status: {}",
                s
            ))),
        }
    }
}

/// WorkflowState is the full, serializable state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub submission_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(default)]
    pub running_tasks: Vec<String>,
    /// Resolved tasks, successful or not
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub failed_tasks: Vec<String>,
    #[serde(default)]
    pub agent_results: HashMap<String, AgentResult>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Fraction of tasks resolved, in [0, 1]
    pub progress: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Payload handed to the workflow builder
    #[serde(default)]
    pub input_data: serde_json::Value,
    /// Task graph produced by the builder
    #[serde(default)]
    pub tasks: Vec<AgentTask>,
}

impl WorkflowState {
    pub fn new(
        submission_id: impl Into<String>,
        workflow_type: impl Into<String>,
        input_data: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission_id.into(),
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Created,
            current_step: None,
            completed_steps: Vec::new(),
            pending_tasks: Vec::new(),
            running_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            agent_results: HashMap::new(),
            start_time: Utc::now(),
            end_time: None,
            progress: 0.0,
            metadata: HashMap::new(),
            input_data,
            tasks: Vec::new(),
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, task_id: &str) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut AgentTask> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    /// Install a freshly built task list; every task starts pending.
    pub fn load_tasks(&mut self, tasks: Vec<AgentTask>) {
        self.pending_tasks = tasks.iter().map(|t| t.task_id.clone()).collect();
        self.running_tasks.clear();
        self.completed_tasks.clear();
        self.failed_tasks.clear();
        self.agent_results.clear();
        self.tasks = tasks;
        self.update_progress();
    }

    pub fn mark_running(&mut self, task_id: &str) {
        self.pending_tasks.retain(|id| id != task_id);
        if !self.running_tasks.iter().any(|id| id == task_id) {
            self.running_tasks.push(task_id.to_string());
        }
        self.current_step = Some(task_id.to_string());
        if let Some(task) = self.task_mut(task_id) {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
    }

    /// Resolve a task with its final result. Failed, timed out and cancelled
    /// tasks are resolved too, and are additionally listed in `failed_tasks`.
    pub fn resolve_task(&mut self, result: AgentResult) {
        let task_id = result.task_id.clone();
        self.pending_tasks.retain(|id| id != &task_id);
        self.running_tasks.retain(|id| id != &task_id);
        if !self.completed_tasks.contains(&task_id) {
            self.completed_tasks.push(task_id.clone());
        }
        if result.status.is_failure() {
            if !self.failed_tasks.contains(&task_id) {
                self.failed_tasks.push(task_id.clone());
            }
        } else if !self.completed_steps.contains(&task_id) {
            self.completed_steps.push(task_id.clone());
        }
        if let Some(task) = self.task_mut(&task_id) {
            task.status = result.status;
            task.completed_at = Some(Utc::now());
        }
        self.agent_results.insert(task_id, result);
        self.update_progress();
    }

    /// Recompute progress as |completed| / |total|.
    pub fn update_progress(&mut self) {
        let total = self.total_tasks();
        self.progress = if total == 0 {
            0.0
        } else {
            self.completed_tasks.len() as f64 / total as f64
        };
    }

    pub fn successful_results(&self) -> impl Iterator<Item = &AgentResult> {
        self.agent_results.values().filter(|r| r.is_success())
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}
