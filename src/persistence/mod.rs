//! Workflow Persistence
//!
//! Snapshots every [`WorkflowState`] as JSON under `<prefix><workflow_id>`
//! with a TTL, and keeps an index set of known workflow ids. The storage
//! backend is any [`KeyValueStore`].

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::types::{AgentResult, WorkflowState, WorkflowStatus};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

const INTERRUPTED_MESSAGE: &str = "Task interrupted before completion";

/// Start time at or before which a workflow counts as stale, or `None` when
/// the age reaches past the representable time range.
pub fn stale_cutoff(max_age_hours: u64) -> Option<DateTime<Utc>> {
    i64::try_from(max_age_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .and_then(|age| Utc::now().checked_sub_signed(age))
}

/// Minimal TTL-capable key-value backend with set membership.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn add_to_set(&self, key: &str, member: &str) -> Result<()>;

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<()>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

pub struct WorkflowPersistence {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
    index_key: String,
    ttl: Duration,
}

impl WorkflowPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &PersistenceConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            index_key: config.index_key.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// In-memory persistence with default keys and TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &PersistenceConfig::default())
    }

    fn workflow_key(&self, workflow_id: &str) -> String {
        format!("{}{}", self.key_prefix, workflow_id)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    pub async fn save_workflow_state(&self, state: &WorkflowState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.store
            .set(&self.workflow_key(&state.workflow_id), &json, Some(self.ttl))
            .await?;
        self.store
            .add_to_set(&self.index_key, &state.workflow_id)
            .await?;
        debug!(
            "Saved workflow {} ({}, progress {:.2})",
            state.workflow_id, state.status, state.progress
        );
        Ok(())
    }

    pub async fn load_workflow_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        match self.store.get(&self.workflow_key(workflow_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_workflow_state(&self, workflow_id: &str) -> Result<bool> {
        let existed = self.store.delete(&self.workflow_key(workflow_id)).await?;
        self.store
            .remove_from_set(&self.index_key, workflow_id)
            .await?;
        Ok(existed)
    }

    /// All persisted workflows, optionally filtered by status. Index entries
    /// whose snapshot has expired are pruned on the way.
    pub async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<WorkflowState>> {
        let mut workflows = Vec::new();
        for workflow_id in self.store.set_members(&self.index_key).await? {
            match self.load_workflow_state(&workflow_id).await {
                Ok(Some(state)) => {
                    if status.is_none_or(|s| s == state.status) {
                        workflows.push(state);
                    }
                }
                Ok(None) => {
                    debug!("Pruning expired workflow {} from index", workflow_id);
                    self.store
                        .remove_from_set(&self.index_key, &workflow_id)
                        .await?;
                }
                Err(e) => warn!("Skipping unreadable workflow {}: {}", workflow_id, e),
            }
        }
        Ok(workflows)
    }

    /// Workflows that started at least `max_age_hours` ago, whatever their
    /// status. An age beyond the representable time range matches nothing.
    pub async fn get_stale_workflows(&self, max_age_hours: u64) -> Result<Vec<WorkflowState>> {
        let Some(cutoff) = stale_cutoff(max_age_hours) else {
            debug!("Max age of {}h is out of range; nothing is stale", max_age_hours);
            return Ok(Vec::new());
        };
        Ok(self
            .list_workflows(None)
            .await?
            .into_iter()
            .filter(|state| state.start_time <= cutoff)
            .collect())
    }

    /// Delete every stale workflow and return how many were removed.
    pub async fn cleanup_stale_workflows(&self, max_age_hours: u64) -> Result<usize> {
        let stale = self.get_stale_workflows(max_age_hours).await?;
        let mut removed = 0;
        for state in &stale {
            if self.delete_workflow_state(&state.workflow_id).await? {
                removed += 1;
            }
        }
        info!(
            "Cleaned up {} workflow(s) older than {}h",
            removed, max_age_hours
        );
        Ok(removed)
    }

    /// Fail every workflow persisted as running, along with its in-flight
    /// tasks, and persist the result.
    pub async fn recover_interrupted_workflows(&self) -> Result<Vec<WorkflowState>> {
        let mut recovered = Vec::new();
        for mut state in self.list_workflows(Some(WorkflowStatus::Running)).await? {
            let interrupted: Vec<String> = state.running_tasks.clone();
            for task_id in &interrupted {
                match state.task(task_id).cloned() {
                    Some(task) => state.resolve_task(AgentResult::failed(&task, INTERRUPTED_MESSAGE)),
                    None => {
                        state.running_tasks.retain(|id| id != task_id);
                        if !state.failed_tasks.contains(task_id) {
                            state.failed_tasks.push(task_id.clone());
                        }
                    }
                }
            }

            state.status = WorkflowStatus::Failed;
            state.end_time = Some(Utc::now());
            state.metadata.insert(
                "interrupted_tasks".to_string(),
                serde_json::json!(interrupted),
            );
            self.save_workflow_state(&state).await?;

            warn!(
                "Workflow {} was interrupted with {} task(s) in flight",
                state.workflow_id,
                interrupted.len()
            );
            recovered.push(state);
        }
        Ok(recovered)
    }
}
