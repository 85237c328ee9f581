//! Error Recovery
//!
//! Classifies errors into a fixed taxonomy, keeps an in-memory error history
//! and produces graceful-degradation payloads when an agent cannot deliver.

pub mod classifier;
pub mod degradation;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use tracing::{debug, error, info, warn};

pub use classifier::{
    ErrorClassification, ErrorClassifier, ErrorContext, ErrorKind, RetryStrategy, Severity,
};
pub use degradation::GracefulDegradation;

/// One handled error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub context: ErrorContext,
    pub recovered: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub recovered_errors: usize,
    pub by_kind: HashMap<ErrorKind, usize>,
    pub by_severity: HashMap<Severity, usize>,
}

pub struct ErrorRecoveryManager {
    classifier: ErrorClassifier,
    degradation: GracefulDegradation,
    history: RwLock<Vec<ErrorRecord>>,
}

impl ErrorRecoveryManager {
    pub fn new() -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            degradation: GracefulDegradation::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn classify_error(
        &self,
        error: &(dyn StdError + 'static),
        context: &ErrorContext,
    ) -> ErrorClassification {
        self.classifier.classify_error(error, context)
    }

    /// Record and log `error`, then try a fallback payload.
    ///
    /// A fallback is produced only when the classification allows one and the
    /// context names an agent type. Otherwise the original error is handed back.
    pub fn handle_error<E>(&self, error: E, context: &ErrorContext) -> Result<serde_json::Value, E>
    where
        E: StdError + 'static,
    {
        let classification = self.classify_error(&error, context);
        let message = error.to_string();
        log_by_severity(&classification, &message, context);

        let fallback = match (&context.agent_type, classification.fallback_available) {
            (Some(agent_type), true) => {
                let input = context.input_data.clone().unwrap_or(serde_json::Value::Null);
                Some(self.degradation.handle_agent_failure(agent_type, &input, &message))
            }
            _ => None,
        };

        self.history.write().push(ErrorRecord {
            error_id: uuid::Uuid::new_v4().to_string(),
            kind: classification.kind,
            severity: classification.severity,
            message,
            context: context.clone(),
            recovered: fallback.is_some(),
            timestamp: Utc::now(),
        });

        match fallback {
            Some(payload) => {
                info!(
                    "Using degraded fallback for {:?} after {}",
                    context.agent_type, classification.kind
                );
                Ok(payload)
            }
            None => Err(error),
        }
    }

    /// Run `op`, retrying per the classification of each failure. The last
    /// failure goes through `handle_error`.
    pub async fn retry_with_policy<T, E, F, Fut>(
        &self,
        context: &ErrorContext,
        mut op: F,
    ) -> Result<RecoveredValue<T>, E>
    where
        E: StdError + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(RecoveredValue::Value(value)),
                Err(err) => {
                    let classification = self.classify_error(&err, context);
                    if classification.is_retryable && attempt < classification.max_retries {
                        let delay = classification.jittered_delay(attempt);
                        debug!(
                            "Attempt {} failed with {} ({}); retrying in {:?}",
                            attempt + 1,
                            classification.kind,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return self.handle_error(err, context).map(RecoveredValue::Fallback);
                }
            }
        }
    }

    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.history.read().clone()
    }

    pub fn get_error_statistics(&self) -> ErrorStatistics {
        let history = self.history.read();
        let mut stats = ErrorStatistics {
            total_errors: history.len(),
            ..Default::default()
        };
        for record in history.iter() {
            *stats.by_kind.entry(record.kind).or_insert(0) += 1;
            *stats.by_severity.entry(record.severity).or_insert(0) += 1;
            if record.recovered {
                stats.recovered_errors += 1;
            }
        }
        stats
    }
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`ErrorRecoveryManager::retry_with_policy`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveredValue<T> {
    Value(T),
    Fallback(serde_json::Value),
}

fn log_by_severity(classification: &ErrorClassification, message: &str, context: &ErrorContext) {
    let agent = context
        .agent_type
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "-".to_string());
    let task = context.task_id.as_deref().unwrap_or("-");
    match classification.severity {
        Severity::Low => info!(kind = %classification.kind, agent = %agent, task = %task, "{}", message),
        Severity::Medium => warn!(kind = %classification.kind, agent = %agent, task = %task, "{}", message),
        Severity::High => error!(kind = %classification.kind, agent = %agent, task = %task, "{}", message),
        Severity::Critical => error!(
            kind = %classification.kind,
            agent = %agent,
            task = %task,
            "CRITICAL: {}",
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::error::OrchestratorError;
    use crate::types::AgentType;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fallback_for_agent_failure() {
        let manager = ErrorRecoveryManager::new();
        let ctx = ErrorContext::for_agent(AgentType::Nlp).with_task("t1", json!({"text": "a b c"}));

        let payload = manager
            .handle_error(AgentError::Connection("refused".into()), &ctx)
            .unwrap();
        assert_eq!(payload["word_count"], 3);

        let stats = manager.get_error_statistics();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.recovered_errors, 1);
        assert_eq!(stats.by_kind[&ErrorKind::NetworkError], 1);
    }

    #[test]
    fn test_error_without_agent_is_returned() {
        let manager = ErrorRecoveryManager::new();
        let err = OrchestratorError::WorkflowTypeNotRegistered("nope".into());
        let returned = manager.handle_error(err, &ErrorContext::default()).unwrap_err();
        assert!(matches!(returned, OrchestratorError::WorkflowTypeNotRegistered(_)));
        assert_eq!(manager.error_history().len(), 1);
        assert!(!manager.error_history()[0].recovered);
    }

    #[test]
    fn test_non_fallback_kind_is_returned_even_with_agent() {
        let manager = ErrorRecoveryManager::new();
        let ctx = ErrorContext::for_agent(AgentType::Asr);
        let result = manager.handle_error(AgentError::Validation("bad input".into()), &ctx);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_policy_recovers() {
        let manager = ErrorRecoveryManager::new();
        let calls = AtomicU32::new(0);
        let ctx = ErrorContext::for_agent(AgentType::Nlp);

        let outcome = manager
            .retry_with_policy(&ctx, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AgentError::Connection("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, RecoveredValue::Value(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_policy_falls_back_after_exhaustion() {
        let manager = ErrorRecoveryManager::new();
        let calls = AtomicU32::new(0);
        let ctx = ErrorContext::for_agent(AgentType::Asr);

        let outcome = manager
            .retry_with_policy(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AgentError::Unavailable("down".into())) }
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RecoveredValue::Fallback(_)));
        // ServiceUnavailable allows three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
