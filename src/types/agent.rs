use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// AgentType names the service an agent adapter talks to. It doubles as the
/// lookup key for agents, metrics and degradation strategies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentType {
    Nlp,
    Asr,
    Document,
    Prototype,
    Summarizer,
    Custom(String),
}

impl AgentType {
    pub fn as_str(&self) -> &str {
        match self {
            AgentType::Nlp => "nlp",
            AgentType::Asr => "asr",
            AgentType::Document => "document",
            AgentType::Prototype => "prototype",
            AgentType::Summarizer => "summarizer",
            AgentType::Custom(name) => name,
        }
    }

    pub fn builtin() -> [AgentType; 5] {
        [
            AgentType::Nlp,
            AgentType::Asr,
            AgentType::Document,
            AgentType::Prototype,
            AgentType::Summarizer,
        ]
    }
}

impl From<String> for AgentType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "nlp" => AgentType::Nlp,
            "asr" => AgentType::Asr,
            "document" => AgentType::Document,
            "prototype" => AgentType::Prototype,
            "summarizer" => AgentType::Summarizer,
            _ => AgentType::Custom(s),
        }
    }
}

impl From<&str> for AgentType {
    fn from(s: &str) -> Self {
        AgentType::from(s.to_string())
    }
}

impl From<AgentType> for String {
    fn from(agent_type: AgentType) -> Self {
        agent_type.as_str().to_string()
    }
}

impl FromStr for AgentType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AgentType::from(s))
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TaskStatus tracks a task through the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for dependencies or a free slot
    Pending,
    /// Currently executing on an agent
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error after all retries
    Failed,
    /// Last attempt exceeded the task timeout
    Timeout,
    /// Stopped by workflow cancellation
    Cancelled,
}

impl TaskStatus {
    /// Whether the task will not run again in this workflow run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// AgentTask is one unit of work routed to a single agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique identifier within the workflow
    pub task_id: String,
    /// Agent type that executes the task
    pub agent_type: AgentType,
    /// Human-readable agent name
    pub agent_name: String,
    /// Opaque payload handed to the agent
    pub input_data: serde_json::Value,
    /// Task priority in 1..=10 (higher number = higher priority)
    pub priority: u8,
    /// Timeout per attempt in seconds
    pub timeout: u64,
    /// Attempts made beyond the first one
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Task ids that must complete before this task becomes eligible
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl AgentTask {
    pub const DEFAULT_PRIORITY: u8 = 5;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(
        task_id: impl Into<String>,
        agent_type: AgentType,
        agent_name: impl Into<String>,
        input_data: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_type,
            agent_name: agent_name.into(),
            input_data,
            priority: Self::DEFAULT_PRIORITY,
            timeout: Self::DEFAULT_TIMEOUT_SECS,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Whether every dependency appears in `completed`
    pub fn dependencies_met(&self, completed: &[String]) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }
}

/// AgentResult is the outcome of one task attempt. The last attempt wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub agent_type: AgentType,
    pub agent_name: String,
    pub status: TaskStatus,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Wall-clock seconds of the attempt
    pub processing_time: f64,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AgentResult {
    pub fn completed(task: &AgentTask, data: serde_json::Value, confidence: f64) -> Self {
        Self::build(task, TaskStatus::Completed, Some(data), None, confidence)
    }

    pub fn failed(task: &AgentTask, error: impl Into<String>) -> Self {
        Self::build(task, TaskStatus::Failed, None, Some(error.into()), 0.0)
    }

    pub fn timed_out(task: &AgentTask, after: Duration) -> Self {
        let message = format!("Task timed out after {:.1}s", after.as_secs_f64());
        Self::build(task, TaskStatus::Timeout, None, Some(message), 0.0)
            .with_processing_time(after.as_secs_f64())
    }

    pub fn cancelled(task: &AgentTask) -> Self {
        Self::build(
            task,
            TaskStatus::Cancelled,
            None,
            Some("Workflow cancelled".to_string()),
            0.0,
        )
    }

    fn build(
        task: &AgentTask,
        status: TaskStatus,
        result_data: Option<serde_json::Value>,
        error_message: Option<String>,
        confidence: f64,
    ) -> Self {
        Self {
            task_id: task.task_id.clone(),
            agent_type: task.agent_type.clone(),
            agent_name: task.agent_name.clone(),
            status,
            result_data,
            error_message,
            processing_time: 0.0,
            confidence_score: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds.max(0.0);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Whether the result came from a degradation path instead of the agent
    pub fn is_degraded(&self) -> bool {
        self.metadata
            .get("degraded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_type_round_trips_as_plain_string() {
        let encoded = serde_json::to_string(&AgentType::Summarizer).unwrap();
        assert_eq!(encoded, "\"summarizer\"");

        let custom: AgentType = serde_json::from_str("\"translator\"").unwrap();
        assert_eq!(custom, AgentType::Custom("translator".to_string()));
        assert_eq!(AgentType::from("NLP"), AgentType::Nlp);
    }

    #[test]
    fn test_task_builder_clamps_priority() {
        let task = AgentTask::new("t1", AgentType::Nlp, "nlp", json!({}))
            .with_priority(42)
            .depends_on("t0");
        assert_eq!(task.priority, 10);
        assert!(task.dependencies.contains("t0"));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_dependencies_met() {
        let task = AgentTask::new("c", AgentType::Nlp, "nlp", json!({}))
            .depends_on("a")
            .depends_on("b");
        let completed = vec!["a".to_string()];
        assert!(!task.dependencies_met(&completed));
        let completed = vec!["a".to_string(), "b".to_string()];
        assert!(task.dependencies_met(&completed));
    }

    #[test]
    fn test_timeout_result_records_duration() {
        let task = AgentTask::new("t", AgentType::Asr, "asr", json!({}));
        let result = AgentResult::timed_out(&task, Duration::from_secs(3));
        assert_eq!(result.status, TaskStatus::Timeout);
        assert_eq!(result.processing_time, 3.0);
        assert!(result.error_message.unwrap().contains("timed out"));
    }
}
