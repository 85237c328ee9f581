pub mod agent;
pub mod analysis;
pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod persistence;
pub mod recovery;
pub mod startup;
pub mod types;
pub mod workflow;

// Re-export common types
pub use agent::{Agent, AgentError, HttpAgent, HttpAgentConfig};
pub use config::AppConfig;
pub use coordinator::AgentCoordinator;
pub use error::{OrchestratorError, Result};
pub use error_recovery::ErrorRecoveryManager;
pub use persistence::{KeyValueStore, WorkflowPersistence};
pub use recovery::WorkflowRecoveryManager;
pub use startup::AppContext;
pub use types::{AgentResult, AgentTask, AgentType, TaskStatus, WorkflowState, WorkflowStatus};
pub use workflow::WorkflowEngine;
