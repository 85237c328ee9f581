use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Agent, AgentError};
use crate::types::{AgentResult, AgentTask, AgentType};

/// Endpoint settings for one HTTP-backed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpAgentConfig {
    pub agent_type: AgentType,
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_execute_path")]
    pub execute_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Transport-level request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_execute_path() -> String {
    "/process".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl HttpAgentConfig {
    pub fn new(agent_type: AgentType, base_url: impl Into<String>) -> Self {
        let execute_path = match agent_type {
            AgentType::Nlp => "/analyze",
            AgentType::Asr => "/transcribe",
            AgentType::Document => "/process",
            AgentType::Prototype => "/generate",
            AgentType::Summarizer => "/summarize",
            AgentType::Custom(_) => "/process",
        };
        Self {
            name: format!("{}-agent", agent_type),
            agent_type,
            base_url: base_url.into(),
            execute_path: execute_path.to_string(),
            health_path: default_health_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Agent adapter that forwards tasks to a sibling HTTP service.
pub struct HttpAgent {
    config: HttpAgentConfig,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(config: HttpAgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AgentError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn nlp(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::new(HttpAgentConfig::new(AgentType::Nlp, base_url))
    }

    pub fn asr(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::new(HttpAgentConfig::new(AgentType::Asr, base_url))
    }

    pub fn document(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::new(HttpAgentConfig::new(AgentType::Document, base_url))
    }

    pub fn prototype(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::new(HttpAgentConfig::new(AgentType::Prototype, base_url))
    }

    pub fn summarizer(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::new(HttpAgentConfig::new(AgentType::Summarizer, base_url))
    }

    pub fn config(&self) -> &HttpAgentConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, err: reqwest::Error) -> AgentError {
        map_transport_error(err, self.config.request_timeout_secs)
    }
}

/// Timeouts report the configured request timeout, in seconds.
fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout(timeout_secs as f64)
    } else if err.is_connect() {
        AgentError::Connection(err.to_string())
    } else if err.is_decode() {
        AgentError::Validation(format!("Invalid response body: {}", err))
    } else if let Some(status) = err.status() {
        AgentError::from_status(status.as_u16(), err.to_string())
    } else {
        AgentError::Connection(err.to_string())
    }
}

#[async_trait]
impl Agent for HttpAgent {
    fn agent_type(&self) -> AgentType {
        self.config.agent_type.clone()
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute_task(&self, task: &AgentTask) -> Result<AgentResult, AgentError> {
        let start = Instant::now();
        let url = self.url(&self.config.execute_path);
        debug!("Dispatching task {} to {}", task.task_id, url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "task_id": task.task_id,
                "input_data": task.input_data,
            }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Agent {} returned {}: {}", self.config.name, status, body);
            return Err(AgentError::from_status(status.as_u16(), body));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| self.transport_error(e))?;
        let confidence = data
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(1.0);

        Ok(AgentResult::completed(task, data, confidence)
            .with_processing_time(start.elapsed().as_secs_f64())
            .with_metadata("endpoint", json!(url)))
    }

    async fn health_check(&self) -> bool {
        let url = self.url(&self.config.health_path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check for {} failed: {}", self.config.name, e);
                false
            }
        }
    }
}
