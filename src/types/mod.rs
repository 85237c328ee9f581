pub mod agent;
pub mod workflow;

// Re-export task and result types
pub use agent::*;
// Re-export workflow state types
pub use workflow::*;
