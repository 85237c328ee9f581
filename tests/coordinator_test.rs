mod common;

use agent_orchestrator::config::CoordinatorConfig;
use agent_orchestrator::coordinator::{AgentHealthStatus, FailureKind, OverallHealth};
use agent_orchestrator::types::{AgentType, TaskStatus};
use common::{coordinator, coordinator_with, task, Behavior, MockAgent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_three_failed_cycles_take_agent_offline() {
    let coordinator = coordinator_with(CoordinatorConfig {
        health_check_interval_secs: 1,
        ..Default::default()
    });
    let agent = Arc::new(MockAgent::new(AgentType::Asr, Behavior::Succeed));
    agent.set_healthy(false);
    coordinator.register_agent(agent.clone());

    coordinator.start_monitoring();
    // Ticks at 0s, 1s and 2s
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(coordinator.is_offline(&AgentType::Asr));
    let metrics = coordinator.get_agent_metrics(&AgentType::Asr).unwrap();
    assert_eq!(metrics.consecutive_failures, 3);
    assert_eq!(metrics.health_checks_total, 3);
    assert_eq!(metrics.uptime_percentage, 0.0);

    let summary = coordinator.get_system_health_summary();
    assert_eq!(summary.overall_health, OverallHealth::Critical);
    assert_eq!(summary.offline_agents, 1);
    assert!(summary.monitoring_active);

    coordinator.stop_monitoring().await;
    assert!(!coordinator.is_monitoring());
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(AgentType::Nlp, Behavior::Succeed));
    agent.set_healthy(false);
    coordinator.register_agent(agent.clone());

    coordinator.run_health_checks().await;
    coordinator.run_health_checks().await;
    assert_eq!(
        coordinator.health_status(&AgentType::Nlp),
        Some(AgentHealthStatus::Unhealthy)
    );

    agent.set_healthy(true);
    let statuses = coordinator.run_health_checks().await;
    assert_eq!(statuses[&AgentType::Nlp], AgentHealthStatus::Healthy);
    assert_eq!(
        coordinator
            .get_agent_metrics(&AgentType::Nlp)
            .unwrap()
            .consecutive_failures,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_health_check_is_degraded() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(AgentType::Document, Behavior::Succeed));
    agent.set_health_delay(Some(Duration::from_secs(3)));
    coordinator.register_agent(agent.clone());

    coordinator.run_health_checks().await;
    assert_eq!(
        coordinator.health_status(&AgentType::Document),
        Some(AgentHealthStatus::Degraded)
    );
    assert_eq!(
        coordinator.get_system_health_summary().overall_health,
        OverallHealth::Degraded
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_check_timeout_counts_as_failure() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(AgentType::Prototype, Behavior::Succeed));
    agent.set_health_delay(Some(Duration::from_secs(60)));
    coordinator.register_agent(agent.clone());

    coordinator.run_health_checks().await;
    let metrics = coordinator.get_agent_metrics(&AgentType::Prototype).unwrap();
    assert_eq!(metrics.health_status, AgentHealthStatus::Unhealthy);
    assert_eq!(metrics.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_coordinated_execution_falls_back_after_policy_retries() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(AgentType::Nlp, Behavior::Fail));
    coordinator.register_agent(agent.clone());

    let task = task("analysis", AgentType::Nlp);
    let result = coordinator.execute_task_with_coordination(&task).await;

    // Network errors allow three retries before the fallback
    assert_eq!(agent.calls(), 4);
    assert_eq!(result.status, TaskStatus::Completed);
    assert!(result.is_degraded());
    assert_eq!(result.result_data.unwrap()["analysis_type"], "basic_fallback");

    let patterns = coordinator.get_failure_patterns();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].failure_kind, FailureKind::ConnectionError);
    assert_eq!(patterns[0].count, 4);
    assert_eq!(patterns[0].affected_tasks.len(), 4);

    let metrics = coordinator.get_agent_metrics(&AgentType::Nlp).unwrap();
    assert_eq!(metrics.failed_tasks, 4);
    assert_eq!(metrics.error_messages.len(), 4);
    assert_eq!(metrics.health_status, AgentHealthStatus::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout_is_recorded() {
    let coordinator = coordinator();
    coordinator.register_agent(Arc::new(MockAgent::new(AgentType::Asr, Behavior::Hang)));

    let task = task("listen", AgentType::Asr).with_timeout(2);
    let err = coordinator.dispatch(&task).await.unwrap_err();
    assert!(matches!(err, agent_orchestrator::AgentError::Timeout(_)));

    let metrics = coordinator.get_agent_metrics(&AgentType::Asr).unwrap();
    assert_eq!(metrics.timeout_tasks, 1);
    assert_eq!(metrics.failed_tasks, 0);
    assert_eq!(metrics.total_tasks, 1);
}

#[tokio::test]
async fn test_reported_failure_is_classified_from_message() {
    let coordinator = coordinator();
    coordinator.register_agent(Arc::new(MockAgent::new(
        AgentType::Summarizer,
        Behavior::ReportFailure("upstream server overloaded".to_string()),
    )));

    let result = coordinator
        .dispatch(&task("sum", AgentType::Summarizer))
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::Failed);

    let patterns = coordinator.get_failure_patterns();
    assert_eq!(patterns[0].failure_kind, FailureKind::ServiceError);
}

#[tokio::test(start_paused = true)]
async fn test_reported_failure_is_retried_and_falls_back() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(
        AgentType::Nlp,
        Behavior::ReportFailure("upstream connection dropped".to_string()),
    ));
    coordinator.register_agent(agent.clone());

    let result = coordinator
        .execute_task_with_coordination(&task("analysis", AgentType::Nlp))
        .await;

    // Classified as a network error: three retries, then the fallback
    assert_eq!(agent.calls(), 4);
    assert_eq!(result.status, TaskStatus::Completed);
    assert!(result.is_degraded());
    assert_eq!(result.result_data.unwrap()["analysis_type"], "basic_fallback");
    assert_eq!(
        coordinator.get_agent_metrics(&AgentType::Nlp).unwrap().failed_tasks,
        4
    );
}

#[tokio::test(start_paused = true)]
async fn test_reported_failure_without_fallback_keeps_agent_result() {
    let coordinator = coordinator();
    let agent = Arc::new(MockAgent::new(
        AgentType::Summarizer,
        Behavior::ReportFailure("summary came back empty".to_string()),
    ));
    coordinator.register_agent(agent.clone());

    let result = coordinator
        .execute_task_with_coordination(&task("sum", AgentType::Summarizer))
        .await;

    // Unclassified failures get two retries and no fallback
    assert_eq!(agent.calls(), 3);
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(!result.is_degraded());
    assert_eq!(result.error_message.as_deref(), Some("summary came back empty"));
    assert_eq!(result.metadata["failure_kind"], "unknown");
}

#[tokio::test]
async fn test_summary_aggregates_task_counts() {
    let coordinator = coordinator();
    coordinator.register_agent(Arc::new(MockAgent::new(AgentType::Nlp, Behavior::Succeed)));
    coordinator.register_agent(Arc::new(MockAgent::new(AgentType::Asr, Behavior::Succeed)));

    coordinator.dispatch(&task("a", AgentType::Nlp)).await.unwrap();
    coordinator.dispatch(&task("b", AgentType::Asr)).await.unwrap();
    coordinator.dispatch(&task("c", AgentType::Asr)).await.unwrap();

    let summary = coordinator.get_system_health_summary();
    assert_eq!(summary.overall_health, OverallHealth::Healthy);
    assert_eq!(summary.total_agents, 2);
    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.successful_tasks, 3);
    assert_eq!(summary.success_rate, 1.0);
    assert!(!summary.monitoring_active);
}
