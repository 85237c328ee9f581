use std::io;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    /// No builder registered under the requested workflow type
    #[error("Workflow type not registered: {0}")]
    WorkflowTypeNotRegistered(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Tasks remain but none can ever become eligible
    #[error("Dependency deadlock in workflow {workflow_id}: {remaining} task(s) can never run")]
    DependencyDeadlock { workflow_id: String, remaining: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Recovery strategy not supported: {0}")]
    UnsupportedRecoveryStrategy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("System error: {0}")]
    System(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn workflow(msg: impl Into<String>) -> Self {
        OrchestratorError::Workflow(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        OrchestratorError::Persistence(msg.into())
    }

    pub fn recovery(msg: impl Into<String>) -> Self {
        OrchestratorError::Recovery(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OrchestratorError::Validation(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        OrchestratorError::System(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::WorkflowNotFound(_))
    }
}

impl From<&str> for OrchestratorError {
    fn from(s: &str) -> Self {
        OrchestratorError::System(s.to_string())
    }
}

impl From<String> for OrchestratorError {
    fn from(s: String) -> Self {
        OrchestratorError::System(s)
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        OrchestratorError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(e: serde_yaml::Error) -> Self {
        OrchestratorError::Yaml(e.to_string())
    }
}

impl From<redis::RedisError> for OrchestratorError {
    fn from(e: redis::RedisError) -> Self {
        OrchestratorError::Persistence(e.to_string())
    }
}
