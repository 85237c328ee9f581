//! Agent Interface
//!
//! Every service adapter (NLP, ASR, Document, Prototype, Summarizer) implements
//! [`Agent`]. Failures come back as a typed [`AgentError`] so the coordinator
//! and the error classifier never have to guess from message text.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AgentResult, AgentTask, AgentType};

pub use http::{HttpAgent, HttpAgentConfig};

#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    fn name(&self) -> &str;

    async fn execute_task(&self, task: &AgentTask) -> Result<AgentResult, AgentError>;

    async fn health_check(&self) -> bool;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent timeout after {0:.1}s")]
    Timeout(f64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Remote service answered with a server-side failure
    #[error(
        "Service error{}: {}",
        .status.map(|s| format!(" ({})", s)).unwrap_or_default(),
        .message
    )]
    Service { status: Option<u16>, message: String },

    #[error("Agent not registered: {0}")]
    NotRegistered(String),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AgentError::Service { status, .. } => *status,
            AgentError::Authentication(_) => Some(401),
            AgentError::RateLimited(_) => Some(429),
            AgentError::Unavailable(_) => Some(503),
            _ => None,
        }
    }

    /// Map an HTTP status onto the matching error variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => AgentError::Authentication(message),
            429 => AgentError::RateLimited(message),
            503 => AgentError::Unavailable(message),
            500..=599 => AgentError::Service {
                status: Some(status),
                message,
            },
            _ => AgentError::Validation(message),
        }
    }
}
