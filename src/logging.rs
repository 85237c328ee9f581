use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tokio::time;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::OrchestratorError;

static INIT: Once = Once::new();
const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(86400);

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber: console output filtered by `RUST_LOG` or
/// the configured level, and JSON lines into a daily-rotated file.
///
/// Only the first call has any effect.
pub fn init(config: &LoggingConfig) -> Result<(), OrchestratorError> {
    fs::create_dir_all(&config.directory).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to create log directory {}: {}",
            config.directory.display(),
            e
        ))
    })?;

    let mut result = Ok(());
    INIT.call_once(|| {
        result = install(config);
    });
    result
}

fn install(config: &LoggingConfig) -> Result<(), OrchestratorError> {
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .map_err(|e| OrchestratorError::Config(format!("Failed to create file appender: {}", e)))?;

    let console = config.console.then(|| {
        fmt::Layer::new()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(true)
            .with_filter(env_filter(&config.level))
    });

    let subscriber = tracing_subscriber::registry().with(console).with(
        fmt::Layer::new()
            .json()
            .with_writer(file_appender)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_ansi(false)
            .with_filter(env_filter(&config.level)),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| OrchestratorError::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let log_dir = config.directory.clone();
        let max_files = config.max_files;
        handle.spawn(async move {
            let mut interval = time::interval(LOG_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                cleanup_old_logs(&log_dir, max_files);
            }
        });
    }
    Ok(())
}

/// Keep the newest `max_files` `.log` files in `log_dir`; returns how many
/// were removed.
pub fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "log").unwrap_or(false))
        .collect();

    // Newest first
    log_files.sort_by_key(|path| {
        std::cmp::Reverse(
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    log_files
        .iter()
        .skip(max_files)
        .filter(|path| fs::remove_file(path).is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cleanup_keeps_newest_logs() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("orchestrator.{}.log", i)), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 3), 2);
        let remaining = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 4);
    }
}
