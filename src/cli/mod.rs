//! Command-line interface
//!
//! - `serve` runs the API with background monitoring
//! - `recover` runs interrupted-workflow recovery once
//! - `cleanup` removes stale persisted workflows
//! - `status` prints a persisted workflow
//! - `check-config` validates configuration and probes dependencies

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::Result;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the API server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Recover workflows interrupted by a previous shutdown
    Recover,
    /// Delete persisted workflows older than the given age
    Cleanup {
        #[arg(long, default_value_t = 168)]
        max_age_hours: u64,
    },
    /// Print the persisted state of a workflow
    Status { workflow_id: String },
    /// Validate the configuration and check persistence and agents
    CheckConfig,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppConfig::default_path)
    }

    /// Load the config file and apply command-line overrides.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(&self.config_path())?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Commands::Serve { port: Some(port) } = &self.command {
            config.server.port = *port;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_cleanup_with_globals() {
        let cli = Cli::try_parse_from([
            "orchestrator",
            "cleanup",
            "--max-age-hours",
            "0",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Cleanup { max_age_hours: 0 }));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_status_requires_id() {
        assert!(Cli::try_parse_from(["orchestrator", "status"]).is_err());
        let cli = Cli::try_parse_from(["orchestrator", "status", "wf-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { ref workflow_id } if workflow_id == "wf-1"));
    }

    #[test]
    fn test_overrides_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let cli = Cli::try_parse_from([
            "orchestrator",
            "--config",
            path.to_str().unwrap(),
            "--log-level",
            "warn",
            "serve",
            "--port",
            "9100",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.logging.level, "warn");
        assert!(path.exists());
    }
}
