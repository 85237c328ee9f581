//! Application context
//!
//! Everything the service shares is built once here and handed out by
//! reference: the engine, coordinator, persistence and both recovery
//! managers. `start` and `shutdown` bracket the background work.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::HttpAgent;
use crate::config::{AppConfig, PersistenceBackend};
use crate::coordinator::AgentCoordinator;
use crate::error::{OrchestratorError, Result};
use crate::error_recovery::ErrorRecoveryManager;
use crate::persistence::{stale_cutoff, KeyValueStore, MemoryStore, RedisStore, WorkflowPersistence};
use crate::recovery::{RecoveryStrategy, WorkflowRecoveryManager};
use crate::types::WorkflowState;
use crate::workflow::definitions::register_builtin_workflows;
use crate::workflow::WorkflowEngine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

impl StartupCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub error_recovery: Arc<ErrorRecoveryManager>,
    pub coordinator: Arc<AgentCoordinator>,
    pub persistence: Arc<WorkflowPersistence>,
    pub recovery: Arc<WorkflowRecoveryManager>,
    pub engine: Arc<WorkflowEngine>,
}

impl AppContext {
    /// Connect the configured store and wire every component together.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match config.persistence.backend {
            PersistenceBackend::Redis => {
                Arc::new(RedisStore::connect(&config.persistence.redis_url).await?)
            }
            PersistenceBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Wire every component on top of an existing store.
    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let error_recovery = Arc::new(ErrorRecoveryManager::new());
        let persistence = Arc::new(WorkflowPersistence::new(store, &config.persistence));

        let coordinator = Arc::new(AgentCoordinator::new(
            config.coordinator.clone(),
            Arc::clone(&error_recovery),
        ));
        if config.coordinator.default_degradation_strategies {
            coordinator.register_default_degradation_strategies();
        }
        for agent_config in &config.agents {
            let agent = HttpAgent::new(agent_config.clone()).map_err(|e| {
                OrchestratorError::Config(format!(
                    "Failed to set up agent '{}': {}",
                    agent_config.name, e
                ))
            })?;
            coordinator.register_agent(Arc::new(agent));
        }

        let recovery = Arc::new(WorkflowRecoveryManager::new(Arc::clone(&persistence)));
        let engine = WorkflowEngine::new(
            config.engine.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&error_recovery),
        )
        .with_persistence(Arc::clone(&persistence))
        .with_checkpoints(Arc::clone(&recovery));
        register_builtin_workflows(&engine);

        Ok(Self {
            config,
            error_recovery,
            coordinator,
            persistence,
            recovery,
            engine: Arc::new(engine),
        })
    }

    /// Start agent monitoring and, when enabled, recover workflows that were
    /// interrupted by the previous shutdown.
    pub async fn start(&self) -> Result<Vec<WorkflowState>> {
        if self.config.coordinator.monitoring_enabled {
            self.coordinator.start_monitoring();
        }

        if !self.config.persistence.auto_recover {
            return Ok(Vec::new());
        }
        match self.recovery.auto_recover_interrupted_workflows().await {
            Ok(recovered) => Ok(recovered),
            Err(e) => {
                error!("Auto-recovery failed: {}", e);
                Err(e)
            }
        }
    }

    /// Recover a persisted workflow and refresh the engine's copy of it.
    pub async fn recover_workflow(
        &self,
        workflow_id: &str,
        strategy: Option<RecoveryStrategy>,
    ) -> Result<WorkflowState> {
        let state = self.recovery.recover_workflow(workflow_id, strategy).await?;
        self.engine.refresh_workflow(state.clone());
        Ok(state)
    }

    /// Delete stale persisted workflows and stop tracking them in the engine.
    /// Returns how many persisted workflows were removed.
    pub async fn cleanup_stale_workflows(&self, max_age_hours: u64) -> Result<usize> {
        let removed = self.persistence.cleanup_stale_workflows(max_age_hours).await?;
        if let Some(cutoff) = stale_cutoff(max_age_hours) {
            self.engine.evict_started_before(cutoff);
        }
        Ok(removed)
    }

    pub async fn shutdown(&self) {
        self.coordinator.stop_monitoring().await;
        let running = self
            .engine
            .list_workflows()
            .into_iter()
            .filter(|w| !w.status.is_finished())
            .count();
        if running > 0 {
            warn!(
                "Shutting down with {} unfinished workflow(s); they will be recovered on restart",
                running
            );
        }
        info!("Orchestrator shut down");
    }

    /// Configuration, persistence and agent readiness, in that order.
    pub async fn startup_checks(&self) -> Vec<StartupCheck> {
        let mut checks = Vec::new();

        checks.push(match self.config.validate() {
            Ok(()) => StartupCheck::new("Configuration", CheckStatus::Success, "Valid"),
            Err(e) => StartupCheck::new("Configuration", CheckStatus::Failed, e.to_string()),
        });

        checks.push(match self.persistence.ping().await {
            Ok(()) => StartupCheck::new(
                "Persistence",
                CheckStatus::Success,
                format!("{:?} backend reachable", self.config.persistence.backend),
            ),
            Err(e) => StartupCheck::new("Persistence", CheckStatus::Failed, e.to_string()),
        });

        let agents = self.coordinator.registered_agents();
        if agents.is_empty() {
            checks.push(StartupCheck::new(
                "Agents",
                CheckStatus::Warning,
                "No agents configured",
            ));
        } else {
            let statuses = self.coordinator.run_health_checks().await;
            let unreachable: Vec<String> = statuses
                .iter()
                .filter(|(_, status)| **status != crate::coordinator::AgentHealthStatus::Healthy)
                .map(|(agent_type, status)| format!("{} ({})", agent_type, status))
                .collect();
            checks.push(if unreachable.is_empty() {
                StartupCheck::new(
                    "Agents",
                    CheckStatus::Success,
                    format!("{} agent(s) healthy", agents.len()),
                )
            } else {
                StartupCheck::new(
                    "Agents",
                    CheckStatus::Warning,
                    format!("Not healthy: {}", unreachable.join(", ")),
                )
            });
        }

        let failures = checks.iter().filter(|c| c.status == CheckStatus::Failed).count();
        let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();
        if failures > 0 {
            error!("Startup checks completed with {} failure(s)", failures);
        } else if warnings > 0 {
            warn!("Startup checks completed with {} warning(s)", warnings);
        } else {
            info!("Startup checks passed");
        }
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definitions::BUSINESS_ANALYSIS;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.persistence.backend = PersistenceBackend::Memory;
        config.coordinator.monitoring_enabled = false;
        config
    }

    #[tokio::test]
    async fn test_build_registers_builtin_workflows() {
        let context = AppContext::build(memory_config()).await.unwrap();
        assert!(context.engine.is_workflow_registered(BUSINESS_ANALYSIS));
        assert!(context.coordinator.registered_agents().is_empty());
    }

    #[tokio::test]
    async fn test_startup_checks_warn_without_agents() {
        let context = AppContext::build(memory_config()).await.unwrap();
        let checks = context.startup_checks().await;
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].status, CheckStatus::Success);
        assert_eq!(checks[1].status, CheckStatus::Success);
        assert_eq!(checks[2].status, CheckStatus::Warning);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut config = memory_config();
        config.coordinator.monitoring_enabled = true;
        let context = AppContext::build(config).await.unwrap();

        let recovered = context.start().await.unwrap();
        assert!(recovered.is_empty());
        assert!(context.coordinator.is_monitoring());

        context.shutdown().await;
        assert!(!context.coordinator.is_monitoring());
    }
}
