use agent_orchestrator::error::OrchestratorError;
use agent_orchestrator::persistence::WorkflowPersistence;
use agent_orchestrator::recovery::{CheckpointType, RecoveryStrategy, WorkflowRecoveryManager};
use agent_orchestrator::types::{AgentResult, AgentTask, AgentType, TaskStatus, WorkflowState, WorkflowStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn setup() -> (Arc<WorkflowPersistence>, WorkflowRecoveryManager) {
    let persistence = Arc::new(WorkflowPersistence::in_memory());
    let manager = WorkflowRecoveryManager::new(Arc::clone(&persistence));
    (persistence, manager)
}

fn tasks() -> (AgentTask, AgentTask, AgentTask) {
    (
        AgentTask::new("a", AgentType::Document, "document-agent", json!({})),
        AgentTask::new("b", AgentType::Nlp, "nlp-agent", json!({})).depends_on("a"),
        AgentTask::new("c", AgentType::Summarizer, "summarizer-agent", json!({})).depends_on("b"),
    )
}

/// a completed, b failed, c still pending
fn failed_state() -> WorkflowState {
    let (a, b, c) = tasks();
    let mut state = WorkflowState::new("sub", "business_analysis", json!({}));
    state.load_tasks(vec![a.clone(), b.clone(), c]);
    state.resolve_task(AgentResult::completed(&a, json!({"ok": true}), 0.9));
    state.mark_running("b");
    state.resolve_task(AgentResult::failed(&b, "boom"));
    state.status = WorkflowStatus::Failed;
    state.end_time = Some(chrono::Utc::now());
    state
}

#[tokio::test]
async fn test_restart_clears_everything() {
    let (persistence, manager) = setup();
    let state = failed_state();
    persistence.save_workflow_state(&state).await.unwrap();

    let recovered = manager
        .recover_workflow(&state.workflow_id, Some(RecoveryStrategy::RestartFromBeginning))
        .await
        .unwrap();

    assert_eq!(recovered.status, WorkflowStatus::Created);
    assert!(recovered.completed_tasks.is_empty());
    assert!(recovered.failed_tasks.is_empty());
    assert!(recovered.running_tasks.is_empty());
    assert!(recovered.pending_tasks.is_empty());
    assert!(recovered.completed_steps.is_empty());
    assert!(recovered.agent_results.is_empty());
    assert_eq!(recovered.progress, 0.0);
    assert!(recovered.end_time.is_none());
    assert!(recovered.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    assert_eq!(recovered.metadata["recovered_with"], json!("restart_from_beginning"));

    let stored = persistence
        .load_workflow_state(&state.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, WorkflowStatus::Created);
}

#[tokio::test]
async fn test_failed_workflow_defaults_to_resume_from_last_success() {
    let (persistence, manager) = setup();
    let mut state = failed_state();
    state.running_tasks.push("c".to_string());
    persistence.save_workflow_state(&state).await.unwrap();

    let recovered = manager.recover_workflow(&state.workflow_id, None).await.unwrap();

    assert_eq!(recovered.status, WorkflowStatus::Running);
    assert!(recovered.running_tasks.is_empty());
    assert_eq!(recovered.completed_tasks, state.completed_tasks);
    assert_eq!(recovered.failed_tasks, vec!["b"]);
    assert_eq!(recovered.agent_results.len(), 2);

    let history = manager.recovery_history(Some(&state.workflow_id));
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].strategy, RecoveryStrategy::ResumeFromLastSuccess);
}

#[tokio::test]
async fn test_resume_from_latest_checkpoint() {
    let (persistence, manager) = setup();
    let (a, b, c) = tasks();

    let mut state = WorkflowState::new("sub", "business_analysis", json!({}));
    state.load_tasks(vec![a.clone(), b.clone(), c]);
    state.status = WorkflowStatus::Running;
    manager.create_checkpoint(&state, CheckpointType::Manual, HashMap::new());

    state.mark_running("a");
    state.resolve_task(AgentResult::completed(&a, json!({}), 0.8));
    let latest = manager.create_checkpoint(&state, CheckpointType::TaskCompleted, HashMap::new());

    // Progress after the checkpoint that recovery should discard
    state.mark_running("b");
    state.resolve_task(AgentResult::failed(&b, "lost"));
    persistence.save_workflow_state(&state).await.unwrap();

    assert_eq!(manager.get_checkpoints(&state.workflow_id).len(), 2);

    let recovered = manager.recover_workflow(&state.workflow_id, None).await.unwrap();
    assert_eq!(recovered.status, WorkflowStatus::Running);
    assert_eq!(recovered.completed_tasks, vec!["a"]);
    assert!(recovered.failed_tasks.is_empty());
    assert_eq!(recovered.pending_tasks, vec!["b", "c"]);
    assert_eq!(recovered.metadata["restored_checkpoint"], json!(latest));
    assert_eq!(recovered.metadata["recovered_with"], json!("resume_from_checkpoint"));
}

#[tokio::test]
async fn test_resume_without_checkpoint_fails_and_is_recorded() {
    let (persistence, manager) = setup();
    let mut state = WorkflowState::new("sub", "business_analysis", json!({}));
    state.status = WorkflowStatus::Paused;
    persistence.save_workflow_state(&state).await.unwrap();

    let err = manager.recover_workflow(&state.workflow_id, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Recovery(_)));

    let history = manager.recovery_history(None);
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].strategy, RecoveryStrategy::ResumeFromCheckpoint);

    let stored = persistence
        .load_workflow_state(&state.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, WorkflowStatus::Paused);
}

#[tokio::test]
async fn test_skip_and_manual_are_unsupported() {
    let (persistence, manager) = setup();
    let state = failed_state();
    persistence.save_workflow_state(&state).await.unwrap();

    for strategy in [RecoveryStrategy::SkipFailedTasks, RecoveryStrategy::ManualIntervention] {
        let err = manager
            .recover_workflow(&state.workflow_id, Some(strategy))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnsupportedRecoveryStrategy(_)));
    }
    assert_eq!(manager.recovery_history(Some(&state.workflow_id)).len(), 2);
}

#[tokio::test]
async fn test_unknown_workflow_is_not_found() {
    let (_, manager) = setup();
    let err = assert_err!(manager.recover_workflow("missing", None).await);
    assert!(matches!(err, OrchestratorError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn test_auto_recover_resumes_interrupted_workflows() {
    let (persistence, manager) = setup();
    let (a, b, c) = tasks();

    let mut state = WorkflowState::new("sub", "business_analysis", json!({}));
    state.load_tasks(vec![a.clone(), b, c]);
    state.status = WorkflowStatus::Running;
    state.mark_running("a");
    persistence.save_workflow_state(&state).await.unwrap();

    let recovered = assert_ok!(manager.auto_recover_interrupted_workflows().await);
    assert_eq!(recovered.len(), 1);
    let recovered = &recovered[0];
    assert_eq!(recovered.status, WorkflowStatus::Running);
    assert!(recovered.running_tasks.is_empty());
    assert_eq!(recovered.failed_tasks, vec!["a"]);
    assert_eq!(recovered.metadata["interrupted_tasks"], json!(["a"]));

    // Nothing is left in the running set for a second pass to pick up as interrupted
    let stored = persistence
        .load_workflow_state(&state.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, WorkflowStatus::Running);
    assert!(stored.running_tasks.is_empty());
}
