use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::agent::AgentError;
use crate::types::AgentType;

pub const RESPONSE_TIME_WINDOW: usize = 100;
pub const ERROR_LOG_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl fmt::Display for AgentHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentHealthStatus::Healthy => write!(f, "healthy"),
            AgentHealthStatus::Degraded => write!(f, "degraded"),
            AgentHealthStatus::Unhealthy => write!(f, "unhealthy"),
            AgentHealthStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    ValidationError,
    ServiceError,
    Unknown,
}

impl FailureKind {
    /// Keyword match for failures that only come with free text.
    pub fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("timeout") {
            FailureKind::Timeout
        } else if message.contains("connection") || message.contains("network") {
            FailureKind::ConnectionError
        } else if message.contains("validation") || message.contains("invalid") {
            FailureKind::ValidationError
        } else if message.contains("service") || message.contains("server") {
            FailureKind::ServiceError
        } else {
            FailureKind::Unknown
        }
    }
}

impl From<&AgentError> for FailureKind {
    fn from(err: &AgentError) -> Self {
        match err {
            AgentError::Timeout(_) => FailureKind::Timeout,
            AgentError::Connection(_) => FailureKind::ConnectionError,
            AgentError::Validation(_) => FailureKind::ValidationError,
            AgentError::Service { .. }
            | AgentError::Unavailable(_)
            | AgentError::RateLimited(_)
            | AgentError::Authentication(_) => FailureKind::ServiceError,
            AgentError::NotRegistered(_) => FailureKind::Unknown,
            AgentError::Other(message) => FailureKind::from_message(message),
        }
    }
}

/// Health thresholds applied after each check.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Seconds; faster successful checks are healthy
    pub healthy_response_time: f64,
    /// Seconds; faster successful checks are degraded, slower ones unhealthy
    pub degraded_response_time: f64,
    pub max_consecutive_failures: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy_response_time: 2.0,
            degraded_response_time: 5.0,
            max_consecutive_failures: 3,
        }
    }
}

/// Rolling per-agent-type metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_type: AgentType,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub timeout_tasks: u64,
    pub consecutive_failures: u32,
    pub response_times: VecDeque<f64>,
    pub health_status: AgentHealthStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_checks_total: u64,
    pub health_checks_passed: u64,
    /// Share of passing health checks, in percent
    pub uptime_percentage: f64,
    pub error_messages: VecDeque<String>,
}

impl AgentMetrics {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            timeout_tasks: 0,
            consecutive_failures: 0,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
            health_status: AgentHealthStatus::Healthy,
            last_success: None,
            last_failure: None,
            last_health_check: None,
            health_checks_total: 0,
            health_checks_passed: 0,
            uptime_percentage: 100.0,
            error_messages: VecDeque::with_capacity(ERROR_LOG_SIZE),
        }
    }

    pub fn average_response_time(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            None
        } else {
            Some(self.response_times.iter().sum::<f64>() / self.response_times.len() as f64)
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            1.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64
        }
    }

    fn push_response_time(&mut self, seconds: f64) {
        if self.response_times.len() >= RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(seconds);
    }

    fn push_error(&mut self, message: String) {
        if self.error_messages.len() >= ERROR_LOG_SIZE {
            self.error_messages.pop_front();
        }
        self.error_messages.push_back(message);
    }

    fn register_failure(&mut self, thresholds: &HealthThresholds) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Utc::now());
        if self.consecutive_failures >= thresholds.max_consecutive_failures {
            self.health_status = AgentHealthStatus::Offline;
        }
    }

    /// Apply the outcome of one health check.
    pub fn record_health_check(
        &mut self,
        success: bool,
        response_time: f64,
        thresholds: &HealthThresholds,
    ) {
        self.health_checks_total += 1;
        self.last_health_check = Some(Utc::now());

        if success {
            self.health_checks_passed += 1;
            self.consecutive_failures = 0;
            self.health_status = if response_time < thresholds.healthy_response_time {
                AgentHealthStatus::Healthy
            } else if response_time < thresholds.degraded_response_time {
                AgentHealthStatus::Degraded
            } else {
                AgentHealthStatus::Unhealthy
            };
        } else {
            self.health_status = AgentHealthStatus::Unhealthy;
            self.register_failure(thresholds);
        }

        self.uptime_percentage =
            self.health_checks_passed as f64 / self.health_checks_total as f64 * 100.0;
    }

    pub fn record_task_success(&mut self, processing_time: f64) {
        self.total_tasks += 1;
        self.successful_tasks += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.push_response_time(processing_time);
    }

    pub fn record_task_failure(
        &mut self,
        kind: FailureKind,
        message: String,
        processing_time: f64,
        thresholds: &HealthThresholds,
    ) {
        self.total_tasks += 1;
        if kind == FailureKind::Timeout {
            self.timeout_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.push_response_time(processing_time);
        self.push_error(message);
        self.register_failure(thresholds);
    }
}

/// Accumulated failures for one (agent type, failure kind) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub agent_type: AgentType,
    pub failure_kind: FailureKind,
    pub count: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub affected_tasks: Vec<String>,
}

impl FailurePattern {
    pub fn new(agent_type: AgentType, failure_kind: FailureKind) -> Self {
        let now = Utc::now();
        Self {
            agent_type,
            failure_kind,
            count: 0,
            first_occurrence: now,
            last_occurrence: now,
            affected_tasks: Vec::new(),
        }
    }

    pub fn record(&mut self, task_id: &str) {
        self.count += 1;
        self.last_occurrence = Utc::now();
        self.affected_tasks.push(task_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_classification_by_response_time() {
        let thresholds = HealthThresholds::default();
        let mut metrics = AgentMetrics::new(AgentType::Nlp);

        metrics.record_health_check(true, 0.5, &thresholds);
        assert_eq!(metrics.health_status, AgentHealthStatus::Healthy);
        metrics.record_health_check(true, 3.0, &thresholds);
        assert_eq!(metrics.health_status, AgentHealthStatus::Degraded);
        metrics.record_health_check(true, 7.5, &thresholds);
        assert_eq!(metrics.health_status, AgentHealthStatus::Unhealthy);
    }

    #[test]
    fn test_offline_after_consecutive_failures_and_reset() {
        let thresholds = HealthThresholds::default();
        let mut metrics = AgentMetrics::new(AgentType::Asr);

        metrics.record_health_check(false, 0.0, &thresholds);
        metrics.record_health_check(false, 0.0, &thresholds);
        assert_eq!(metrics.health_status, AgentHealthStatus::Unhealthy);
        assert_eq!(metrics.consecutive_failures, 2);

        metrics.record_health_check(false, 0.0, &thresholds);
        assert_eq!(metrics.health_status, AgentHealthStatus::Offline);
        assert_eq!(metrics.consecutive_failures, 3);

        metrics.record_health_check(true, 0.1, &thresholds);
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.health_status, AgentHealthStatus::Healthy);
        assert_eq!(metrics.uptime_percentage, 25.0);
    }

    #[test]
    fn test_windows_are_capped() {
        let thresholds = HealthThresholds {
            max_consecutive_failures: u32::MAX,
            ..Default::default()
        };
        let mut metrics = AgentMetrics::new(AgentType::Document);
        for i in 0..150 {
            metrics.record_task_failure(FailureKind::Unknown, format!("error {}", i), 0.1, &thresholds);
        }
        assert_eq!(metrics.response_times.len(), RESPONSE_TIME_WINDOW);
        assert_eq!(metrics.error_messages.len(), ERROR_LOG_SIZE);
        assert_eq!(metrics.error_messages.back().unwrap(), "error 149");
        assert_eq!(metrics.failed_tasks, 150);
    }

    #[test]
    fn test_failure_kind_from_message() {
        assert_eq!(FailureKind::from_message("Request Timeout"), FailureKind::Timeout);
        assert_eq!(FailureKind::from_message("network unreachable"), FailureKind::ConnectionError);
        assert_eq!(FailureKind::from_message("invalid payload"), FailureKind::ValidationError);
        assert_eq!(FailureKind::from_message("internal server error"), FailureKind::ServiceError);
        assert_eq!(FailureKind::from_message("???"), FailureKind::Unknown);
    }
}
