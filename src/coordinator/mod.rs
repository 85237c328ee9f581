//! Agent Coordinator
//!
//! Tracks the health of every registered agent and wraps task dispatch:
//! - periodic concurrent health checks with a per-check timeout
//! - rolling metrics and failure patterns per agent type
//! - healthy / degraded / unhealthy / offline classification
//! - degradation strategies for offline agents

pub mod metrics;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError};
use crate::config::CoordinatorConfig;
use crate::error_recovery::{ErrorContext, ErrorRecoveryManager, GracefulDegradation, RecoveredValue};
use crate::types::{AgentResult, AgentTask, AgentType, TaskStatus};

pub use metrics::{AgentHealthStatus, AgentMetrics, FailureKind, FailurePattern, HealthThresholds};

/// Produces a stand-in result for a task whose agent is offline.
pub type DegradationStrategy = Arc<dyn Fn(&AgentTask) -> AgentResult + Send + Sync>;

const DEGRADED_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthSummary {
    pub overall_health: OverallHealth,
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub degraded_agents: usize,
    pub unhealthy_agents: usize,
    pub offline_agents: usize,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub success_rate: f64,
    pub monitoring_active: bool,
    pub agents: HashMap<String, AgentHealthStatus>,
    pub timestamp: DateTime<Utc>,
}

struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AgentCoordinator {
    config: CoordinatorConfig,
    thresholds: HealthThresholds,
    agents: RwLock<HashMap<AgentType, Arc<dyn Agent>>>,
    metrics: RwLock<HashMap<AgentType, AgentMetrics>>,
    failure_patterns: Mutex<HashMap<(AgentType, FailureKind), FailurePattern>>,
    strategies: RwLock<HashMap<AgentType, DegradationStrategy>>,
    error_recovery: Arc<ErrorRecoveryManager>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl AgentCoordinator {
    pub fn new(config: CoordinatorConfig, error_recovery: Arc<ErrorRecoveryManager>) -> Self {
        let thresholds = HealthThresholds {
            healthy_response_time: config.healthy_response_time_secs,
            degraded_response_time: config.degraded_response_time_secs,
            max_consecutive_failures: config.max_consecutive_failures,
        };
        Self {
            config,
            thresholds,
            agents: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            failure_patterns: Mutex::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            error_recovery,
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register an agent under its type. A later registration replaces it.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        let agent_type = agent.agent_type();
        if let Some(previous) = self.agents.write().insert(agent_type.clone(), agent) {
            warn!("Replacing agent '{}' registered for {}", previous.name(), agent_type);
        } else {
            info!("Registered agent for {}", agent_type);
        }
        self.metrics
            .write()
            .entry(agent_type.clone())
            .or_insert_with(|| AgentMetrics::new(agent_type));
    }

    pub fn get_agent(&self, agent_type: &AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(agent_type).cloned()
    }

    pub fn is_registered(&self, agent_type: &AgentType) -> bool {
        self.agents.read().contains_key(agent_type)
    }

    pub fn registered_agents(&self) -> Vec<AgentType> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn register_degradation_strategy(&self, agent_type: AgentType, strategy: DegradationStrategy) {
        if self
            .strategies
            .write()
            .insert(agent_type.clone(), strategy)
            .is_some()
        {
            debug!("Replaced degradation strategy for {}", agent_type);
        }
    }

    /// Register the canned-result strategies for the built-in agent types.
    pub fn register_default_degradation_strategies(&self) {
        for (agent_type, strategy) in default_degradation_strategies() {
            self.register_degradation_strategy(agent_type, strategy);
        }
    }

    pub fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            debug!("Agent monitoring already running");
            return;
        }

        let token = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let loop_token = token.clone();
        let interval = Duration::from_secs(self.config.health_check_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.run_health_checks().await;
                    }
                }
            }
            debug!("Agent monitoring loop stopped");
        });

        info!("Started agent monitoring every {:?}", interval);
        *monitor = Some(MonitorHandle { token, handle });
    }

    pub async fn stop_monitoring(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(MonitorHandle { token, handle }) = monitor {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Monitoring task ended abnormally: {}", e);
            }
            info!("Stopped agent monitoring");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Run one health-check cycle over every registered agent concurrently.
    pub async fn run_health_checks(&self) -> HashMap<AgentType, AgentHealthStatus> {
        let agents: Vec<(AgentType, Arc<dyn Agent>)> = self
            .agents
            .read()
            .iter()
            .map(|(t, a)| (t.clone(), Arc::clone(a)))
            .collect();
        let check_timeout = Duration::from_secs(self.config.health_check_timeout_secs);

        let checks = agents.into_iter().map(|(agent_type, agent)| async move {
            let start = Instant::now();
            let healthy = matches!(
                tokio::time::timeout(check_timeout, agent.health_check()).await,
                Ok(true)
            );
            (agent_type, healthy, start.elapsed().as_secs_f64())
        });

        let mut statuses = HashMap::new();
        for (agent_type, healthy, response_time) in join_all(checks).await {
            let status = self.record_health_check(&agent_type, healthy, response_time);
            statuses.insert(agent_type, status);
        }
        statuses
    }

    pub fn record_health_check(
        &self,
        agent_type: &AgentType,
        success: bool,
        response_time: f64,
    ) -> AgentHealthStatus {
        let mut metrics = self.metrics.write();
        let entry = metrics
            .entry(agent_type.clone())
            .or_insert_with(|| AgentMetrics::new(agent_type.clone()));
        let before = entry.health_status;
        entry.record_health_check(success, response_time, &self.thresholds);
        if entry.health_status != before {
            info!(
                "Agent {} health changed: {} -> {}",
                agent_type, before, entry.health_status
            );
        }
        entry.health_status
    }

    pub fn health_status(&self, agent_type: &AgentType) -> Option<AgentHealthStatus> {
        self.metrics.read().get(agent_type).map(|m| m.health_status)
    }

    pub fn is_offline(&self, agent_type: &AgentType) -> bool {
        self.health_status(agent_type) == Some(AgentHealthStatus::Offline)
    }

    /// One timed attempt against the agent, with metrics recorded.
    pub async fn dispatch(&self, task: &AgentTask) -> Result<AgentResult, AgentError> {
        let agent = self
            .get_agent(&task.agent_type)
            .ok_or_else(|| AgentError::NotRegistered(task.agent_type.to_string()))?;

        let start = Instant::now();
        let outcome = tokio::time::timeout(task.timeout_duration(), agent.execute_task(task)).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(mut result)) => {
                result.processing_time = elapsed;
                if result.is_success() {
                    self.record_task_success(&task.agent_type, elapsed);
                } else {
                    let message = result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("Task finished with status {}", result.status));
                    let kind = if result.status == TaskStatus::Timeout {
                        FailureKind::Timeout
                    } else {
                        FailureKind::from_message(&message)
                    };
                    self.record_task_failure(task, kind, message, elapsed);
                }
                Ok(result)
            }
            Ok(Err(err)) => {
                self.record_task_failure(task, FailureKind::from(&err), err.to_string(), elapsed);
                Err(err)
            }
            Err(_) => {
                let err = AgentError::Timeout(task.timeout_duration().as_secs_f64());
                self.record_task_failure(task, FailureKind::Timeout, err.to_string(), elapsed);
                Err(err)
            }
        }
    }

    /// Execute a task with health routing, policy retries and fallbacks.
    /// Always yields a structured result.
    ///
    /// A failed or timed-out result reported by the agent is classified like
    /// an error, so it is retried and falls back under the same policy. When
    /// the policy gives up, the agent's last reported result is returned.
    pub async fn execute_task_with_coordination(&self, task: &AgentTask) -> AgentResult {
        if !self.is_registered(&task.agent_type) {
            return AgentResult::failed(task, format!("Agent {} not registered", task.agent_type));
        }
        if self.is_offline(&task.agent_type) {
            return self.handle_agent_degradation(task);
        }

        let context = ErrorContext::for_agent(task.agent_type.clone())
            .with_task(task.task_id.clone(), task.input_data.clone());

        let last_reported: Mutex<Option<AgentResult>> = Mutex::new(None);
        let reported = &last_reported;
        let outcome = self
            .error_recovery
            .retry_with_policy(&context, move |_| async move {
                *reported.lock() = None;
                let result = self.dispatch(task).await?;
                if !matches!(result.status, TaskStatus::Failed | TaskStatus::Timeout) {
                    return Ok(result);
                }
                let err = reported_failure(task, &result);
                *reported.lock() = Some(result);
                Err(err)
            })
            .await;

        if let Err(err) = &outcome {
            if let Some(result) = last_reported.lock().take() {
                return result.with_metadata("failure_kind", serde_json::json!(FailureKind::from(err)));
            }
        }

        match outcome {
            Ok(RecoveredValue::Value(result)) => result,
            Ok(RecoveredValue::Fallback(payload)) => {
                AgentResult::completed(task, payload, DEGRADED_CONFIDENCE)
                    .with_metadata("degraded", serde_json::json!(true))
                    .with_metadata("fallback", serde_json::json!(true))
            }
            Err(AgentError::Timeout(_)) => AgentResult::timed_out(task, task.timeout_duration()),
            Err(err) => AgentResult::failed(task, err.to_string()).with_metadata(
                "failure_kind",
                serde_json::json!(FailureKind::from(&err)),
            ),
        }
    }

    /// Route a task for an offline agent through its degradation strategy.
    pub fn handle_agent_degradation(&self, task: &AgentTask) -> AgentResult {
        let strategy = self.strategies.read().get(&task.agent_type).cloned();
        match strategy {
            Some(strategy) => {
                info!(
                    "Agent {} offline; using degradation strategy for task {}",
                    task.agent_type, task.task_id
                );
                strategy(task).with_metadata("degraded", serde_json::json!(true))
            }
            None => {
                warn!(
                    "Agent {} offline and no degradation strategy registered",
                    task.agent_type
                );
                AgentResult::failed(
                    task,
                    format!("Agent {} is offline and no degradation strategy is registered", task.agent_type),
                )
                .with_metadata("degraded", serde_json::json!(true))
            }
        }
    }

    fn record_task_success(&self, agent_type: &AgentType, processing_time: f64) {
        let mut metrics = self.metrics.write();
        metrics
            .entry(agent_type.clone())
            .or_insert_with(|| AgentMetrics::new(agent_type.clone()))
            .record_task_success(processing_time);
    }

    fn record_task_failure(&self, task: &AgentTask, kind: FailureKind, message: String, processing_time: f64) {
        debug!("Task {} on {} failed ({:?}): {}", task.task_id, task.agent_type, kind, message);
        {
            let mut metrics = self.metrics.write();
            let entry = metrics
                .entry(task.agent_type.clone())
                .or_insert_with(|| AgentMetrics::new(task.agent_type.clone()));
            entry.record_task_failure(kind, message, processing_time, &self.thresholds);
            if entry.health_status == AgentHealthStatus::Offline {
                warn!(
                    "Agent {} offline after {} consecutive failures",
                    task.agent_type, entry.consecutive_failures
                );
            }
        }
        self.failure_patterns
            .lock()
            .entry((task.agent_type.clone(), kind))
            .or_insert_with(|| FailurePattern::new(task.agent_type.clone(), kind))
            .record(&task.task_id);
    }

    pub fn get_agent_metrics(&self, agent_type: &AgentType) -> Option<AgentMetrics> {
        self.metrics.read().get(agent_type).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<AgentMetrics> {
        self.metrics.read().values().cloned().collect()
    }

    pub fn get_failure_patterns(&self) -> Vec<FailurePattern> {
        self.failure_patterns.lock().values().cloned().collect()
    }

    pub fn get_system_health_summary(&self) -> SystemHealthSummary {
        let metrics = self.metrics.read();
        let count = |status: AgentHealthStatus| {
            metrics.values().filter(|m| m.health_status == status).count()
        };

        let offline_agents = count(AgentHealthStatus::Offline);
        let degraded_agents = count(AgentHealthStatus::Degraded);
        let overall_health = if offline_agents > 0 {
            OverallHealth::Critical
        } else if degraded_agents > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        let total_tasks: u64 = metrics.values().map(|m| m.total_tasks).sum();
        let successful_tasks: u64 = metrics.values().map(|m| m.successful_tasks).sum();

        SystemHealthSummary {
            overall_health,
            total_agents: metrics.len(),
            healthy_agents: count(AgentHealthStatus::Healthy),
            degraded_agents,
            unhealthy_agents: count(AgentHealthStatus::Unhealthy),
            offline_agents,
            total_tasks,
            successful_tasks,
            success_rate: if total_tasks == 0 {
                1.0
            } else {
                successful_tasks as f64 / total_tasks as f64
            },
            monitoring_active: self.is_monitoring(),
            agents: metrics
                .iter()
                .map(|(t, m)| (t.to_string(), m.health_status))
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Canned-result strategies for the built-in agent types.
pub fn default_degradation_strategies() -> Vec<(AgentType, DegradationStrategy)> {
    AgentType::builtin()
        .into_iter()
        .map(|agent_type| {
            let strategy: DegradationStrategy = Arc::new(|task: &AgentTask| {
                let payload = GracefulDegradation::new().handle_agent_failure(
                    &task.agent_type,
                    &task.input_data,
                    "agent offline",
                );
                AgentResult::completed(task, payload, DEGRADED_CONFIDENCE)
            });
            (agent_type, strategy)
        })
        .collect()
}

/// Error equivalent of a failed result reported by an agent.
fn reported_failure(task: &AgentTask, result: &AgentResult) -> AgentError {
    if result.status == TaskStatus::Timeout {
        return AgentError::Timeout(task.timeout_duration().as_secs_f64());
    }
    AgentError::Other(
        result
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Task finished with status {}", result.status)),
    )
}
