use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::agent::AgentError;
use crate::error::OrchestratorError;
use crate::types::AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    AiServiceError,
    NetworkError,
    TimeoutError,
    ResourceError,
    WorkflowError,
    AuthenticationError,
    RateLimitError,
    ServiceUnavailable,
    DataCorruption,
    ConfigurationError,
    UnknownError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::ValidationError,
        ErrorKind::AiServiceError,
        ErrorKind::NetworkError,
        ErrorKind::TimeoutError,
        ErrorKind::ResourceError,
        ErrorKind::WorkflowError,
        ErrorKind::AuthenticationError,
        ErrorKind::RateLimitError,
        ErrorKind::ServiceUnavailable,
        ErrorKind::DataCorruption,
        ErrorKind::ConfigurationError,
        ErrorKind::UnknownError,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::AiServiceError => "ai_service_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::ResourceError => "resource_error",
            ErrorKind::WorkflowError => "workflow_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::DataCorruption => "data_corruption",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::UnknownError => "unknown_error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    NoRetry,
    Linear,
    Exponential,
    FixedInterval,
}

/// ErrorClassification is the retry/fallback policy attached to one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub is_retryable: bool,
    pub retry_strategy: RetryStrategy,
    pub max_retries: u32,
    /// Seconds
    pub base_delay: f64,
    /// Seconds
    pub max_delay: f64,
    pub backoff_multiplier: f64,
    pub fallback_available: bool,
}

impl ErrorClassification {
    /// Fixed policy for each error kind.
    pub fn for_kind(kind: ErrorKind) -> Self {
        use RetryStrategy::*;
        use Severity::*;

        let (severity, strategy, max_retries, base, max, fallback) = match kind {
            ErrorKind::ValidationError => (Low, NoRetry, 0, 0.0, 0.0, false),
            ErrorKind::AiServiceError => (High, Exponential, 3, 2.0, 60.0, true),
            ErrorKind::NetworkError => (Medium, Exponential, 3, 1.0, 30.0, true),
            ErrorKind::TimeoutError => (Medium, Linear, 2, 5.0, 15.0, true),
            ErrorKind::ResourceError => (High, FixedInterval, 2, 10.0, 10.0, true),
            ErrorKind::WorkflowError => (High, NoRetry, 0, 0.0, 0.0, false),
            ErrorKind::AuthenticationError => (Critical, NoRetry, 0, 0.0, 0.0, false),
            ErrorKind::RateLimitError => (Medium, Exponential, 5, 5.0, 120.0, true),
            ErrorKind::ServiceUnavailable => (High, Exponential, 3, 5.0, 60.0, true),
            ErrorKind::DataCorruption => (Critical, NoRetry, 0, 0.0, 0.0, false),
            ErrorKind::ConfigurationError => (Critical, NoRetry, 0, 0.0, 0.0, false),
            ErrorKind::UnknownError => (Medium, Exponential, 2, 1.0, 30.0, false),
        };

        Self {
            kind,
            severity,
            is_retryable: strategy != NoRetry,
            retry_strategy: strategy,
            max_retries,
            base_delay: base,
            max_delay: max,
            backoff_multiplier: 2.0,
            fallback_available: fallback,
        }
    }

    /// Delay before retry number `attempt` (0-based), clamped to the policy bounds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let seconds = match self.retry_strategy {
            RetryStrategy::NoRetry => 0.0,
            RetryStrategy::FixedInterval => self.base_delay,
            RetryStrategy::Linear => self.base_delay * (attempt as f64 + 1.0),
            RetryStrategy::Exponential => {
                self.base_delay * self.backoff_multiplier.powi(attempt.min(63) as i32)
            }
        };
        Duration::from_secs_f64(seconds.clamp(self.base_delay, self.max_delay.max(self.base_delay)))
    }

    /// `delay_for_attempt` with ±10% jitter, still inside the bounds.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt).as_secs_f64();
        if base == 0.0 {
            return Duration::ZERO;
        }
        let factor = rand::rng().random_range(0.9..=1.1);
        let upper = self.max_delay.max(self.base_delay);
        Duration::from_secs_f64((base * factor).clamp(self.base_delay, upper))
    }
}

/// Context attached to an error when it is classified and handled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub workflow_id: Option<String>,
    pub task_id: Option<String>,
    pub agent_type: Option<AgentType>,
    pub status_code: Option<u16>,
    pub input_data: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn for_agent(agent_type: AgentType) -> Self {
        Self {
            agent_type: Some(agent_type),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>, input: serde_json::Value) -> Self {
        self.task_id = Some(task_id.into());
        self.input_data = Some(input);
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_error(
        &self,
        error: &(dyn StdError + 'static),
        context: &ErrorContext,
    ) -> ErrorClassification {
        ErrorClassification::for_kind(self.classify_kind(error, context))
    }

    fn classify_kind(&self, error: &(dyn StdError + 'static), context: &ErrorContext) -> ErrorKind {
        if let Some(err) = error.downcast_ref::<AgentError>() {
            return Self::kind_for_agent_error(err);
        }
        if let Some(err) = error.downcast_ref::<OrchestratorError>() {
            if let Some(kind) = Self::kind_for_orchestrator_error(err) {
                return kind;
            }
        }
        if let Some(err) = error.downcast_ref::<reqwest::Error>() {
            if err.is_timeout() {
                return ErrorKind::TimeoutError;
            }
            if err.is_connect() {
                return ErrorKind::NetworkError;
            }
            if let Some(status) = err.status() {
                return Self::kind_for_status(status.as_u16());
            }
        }
        if error.downcast_ref::<serde_json::Error>().is_some() {
            return ErrorKind::DataCorruption;
        }
        if let Some(err) = error.downcast_ref::<std::io::Error>() {
            return match err.kind() {
                std::io::ErrorKind::TimedOut => ErrorKind::TimeoutError,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => ErrorKind::NetworkError,
                std::io::ErrorKind::OutOfMemory => ErrorKind::ResourceError,
                _ => ErrorKind::UnknownError,
            };
        }
        if let Some(status) = context.status_code {
            return Self::kind_for_status(status);
        }
        Self::kind_for_message(&error.to_string())
    }

    fn kind_for_agent_error(err: &AgentError) -> ErrorKind {
        match err {
            AgentError::Timeout(_) => ErrorKind::TimeoutError,
            AgentError::Connection(_) => ErrorKind::NetworkError,
            AgentError::Validation(_) => ErrorKind::ValidationError,
            AgentError::Authentication(_) => ErrorKind::AuthenticationError,
            AgentError::RateLimited(_) => ErrorKind::RateLimitError,
            AgentError::Unavailable(_) | AgentError::NotRegistered(_) => {
                ErrorKind::ServiceUnavailable
            }
            AgentError::Service { .. } => ErrorKind::AiServiceError,
            AgentError::Other(message) => Self::kind_for_message(message),
        }
    }

    fn kind_for_orchestrator_error(err: &OrchestratorError) -> Option<ErrorKind> {
        match err {
            OrchestratorError::Validation(_) => Some(ErrorKind::ValidationError),
            OrchestratorError::WorkflowTypeNotRegistered(_)
            | OrchestratorError::WorkflowNotFound(_)
            | OrchestratorError::Workflow(_)
            | OrchestratorError::DependencyDeadlock { .. }
            | OrchestratorError::Recovery(_)
            | OrchestratorError::UnsupportedRecoveryStrategy(_) => Some(ErrorKind::WorkflowError),
            OrchestratorError::Agent(message) => Some(Self::kind_for_message(message)),
            OrchestratorError::Config(_) | OrchestratorError::Yaml(_) => {
                Some(ErrorKind::ConfigurationError)
            }
            OrchestratorError::Json(_) => Some(ErrorKind::DataCorruption),
            OrchestratorError::Persistence(_) => Some(ErrorKind::ResourceError),
            OrchestratorError::Io(_) | OrchestratorError::System(_) => None,
        }
    }

    pub fn kind_for_status(status: u16) -> ErrorKind {
        match status {
            400 | 422 => ErrorKind::ValidationError,
            401 | 403 => ErrorKind::AuthenticationError,
            408 | 504 => ErrorKind::TimeoutError,
            429 => ErrorKind::RateLimitError,
            503 => ErrorKind::ServiceUnavailable,
            507 => ErrorKind::ResourceError,
            500..=599 => ErrorKind::AiServiceError,
            _ => ErrorKind::UnknownError,
        }
    }

    /// Last-resort classification for untyped error text.
    pub fn kind_for_message(message: &str) -> ErrorKind {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["timeout", "timed out"]) {
            ErrorKind::TimeoutError
        } else if has(&["rate limit", "too many requests", "quota"]) {
            ErrorKind::RateLimitError
        } else if has(&["unauthorized", "forbidden", "api key", "authentication"]) {
            ErrorKind::AuthenticationError
        } else if has(&["connection", "network", "dns", "unreachable"]) {
            ErrorKind::NetworkError
        } else if has(&["unavailable", "maintenance"]) {
            ErrorKind::ServiceUnavailable
        } else if has(&["validation", "invalid", "missing field"]) {
            ErrorKind::ValidationError
        } else if has(&["out of memory", "disk full", "resource"]) {
            ErrorKind::ResourceError
        } else if has(&["corrupt", "malformed", "decode"]) {
            ErrorKind::DataCorruption
        } else if has(&["config"]) {
            ErrorKind::ConfigurationError
        } else if has(&["openai", "anthropic", "model", "completion"]) {
            ErrorKind::AiServiceError
        } else {
            ErrorKind::UnknownError
        }
    }
}
