use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, time::Duration};
use tracing::{debug, info};

use crate::agent::HttpAgentConfig;
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP-backed agents registered at startup
    #[serde(default)]
    pub agents: Vec<HttpAgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used when building result links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Base of the 2^attempt retry backoff, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Optional cap on a single retry delay, in milliseconds
    #[serde(default)]
    pub max_retry_delay_ms: Option<u64>,
    /// Route tasks through the coordinator's policy retries instead of the
    /// engine's own backoff loop
    #[serde(default)]
    pub use_coordination: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_true")]
    pub monitoring_enabled: bool,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_secs: u64,
    #[serde(default = "default_healthy_response_time")]
    pub healthy_response_time_secs: f64,
    #[serde(default = "default_degraded_response_time")]
    pub degraded_response_time_secs: f64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Register the canned-result strategies for built-in agent types
    #[serde(default = "default_true")]
    pub default_degradation_strategies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_backend")]
    pub backend: PersistenceBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_index_key")]
    pub index_key: String,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Recover interrupted workflows when the service starts
    #[serde(default = "default_true")]
    pub auto_recover: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retry_delay_ms: None,
            use_coordination: false,
        }
    }
}

impl EngineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Option<Duration> {
        self.max_retry_delay_ms.map(Duration::from_millis)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            monitoring_enabled: default_true(),
            health_check_interval_secs: default_health_check_interval(),
            health_check_timeout_secs: default_health_check_timeout(),
            healthy_response_time_secs: default_healthy_response_time(),
            degraded_response_time_secs: default_degraded_response_time(),
            max_consecutive_failures: default_max_consecutive_failures(),
            default_degradation_strategies: default_true(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            index_key: default_index_key(),
            ttl_secs: default_ttl(),
            auto_recover: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            file_prefix: default_log_prefix(),
            console: default_true(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_public_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_health_check_timeout() -> u64 {
    10
}

fn default_healthy_response_time() -> f64 {
    2.0
}

fn default_degraded_response_time() -> f64 {
    5.0
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_backend() -> PersistenceBackend {
    PersistenceBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "workflow:".to_string()
}

fn default_index_key() -> String {
    "workflows:index".to_string()
}

fn default_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "orchestrator".to_string()
}

fn default_max_log_files() -> usize {
    7
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// `<config dir>/orchestrator/config.yml`, or `./config.yml` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("orchestrator").join("config.yml"))
            .unwrap_or_else(|| PathBuf::from("config.yml"))
    }

    /// Load from `path`, writing a default file there when none exists.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        if path.exists() {
            return Self::load_from_file(path);
        }

        info!("No config at {}, writing defaults", path.display());
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, OrchestratorError> {
        let content = fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse config file: {}", e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), OrchestratorError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| OrchestratorError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)
            .map_err(|e| OrchestratorError::Config(format!("Failed to write config: {}", e)))?;

        fs::rename(&temp_path, path)
            .map_err(|e| OrchestratorError::Config(format!("Failed to save config: {}", e)))?;

        Ok(())
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.engine.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::Config(
                "engine.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.coordinator.max_consecutive_failures == 0 {
            return Err(OrchestratorError::Config(
                "coordinator.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.coordinator.healthy_response_time_secs > self.coordinator.degraded_response_time_secs {
            return Err(OrchestratorError::Config(
                "coordinator.healthy_response_time_secs must not exceed degraded_response_time_secs"
                    .to_string(),
            ));
        }
        if self.persistence.backend == PersistenceBackend::Redis
            && reqwest::Url::parse(&self.persistence.redis_url).is_err()
        {
            return Err(OrchestratorError::Config(format!(
                "Invalid redis_url: {}",
                self.persistence.redis_url
            )));
        }
        for agent in &self.agents {
            reqwest::Url::parse(&agent.base_url).map_err(|e| {
                OrchestratorError::Config(format!(
                    "Invalid base_url for agent '{}': {}",
                    agent.name, e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentType;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.engine.max_concurrent_tasks, 5);
        assert_eq!(config.engine.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.coordinator.health_check_interval_secs, 30);
        assert_eq!(config.persistence.ttl_secs, 604_800);
        assert_eq!(config.persistence.key_prefix, "workflow:");
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_load_writes_default_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yml");

        let config = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server.port, 8000);

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.server.port, config.server.port);
    }

    #[test]
    fn test_save_round_trip_with_agents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let mut config = AppConfig::default();
        config.persistence.backend = PersistenceBackend::Memory;
        config.agents.push(HttpAgentConfig::new(AgentType::Nlp, "http://localhost:8001"));
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.persistence.backend, PersistenceBackend::Memory);
        assert_eq!(loaded.agents.len(), 1);
        assert_eq!(loaded.agents[0].agent_type, AgentType::Nlp);
        assert_eq!(loaded.agents[0].execute_path, "/analyze");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.engine.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        config.engine.max_concurrent_tasks = 2;
        config.agents.push(HttpAgentConfig::new(AgentType::Asr, "not a url"));
        assert!(matches!(config.validate(), Err(OrchestratorError::Config(_))));
    }
}
