//! HTTP API
//!
//! JSON over axum. Every reply is wrapped in [`ApiResponse`].

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use crate::analysis::{BusinessAnalysis, OfferSummary, ResultUrls};
use crate::error::OrchestratorError;
use crate::recovery::RecoveryStrategy;
use crate::startup::AppContext;
use crate::types::AgentType;
use crate::workflow::definitions::BUSINESS_ANALYSIS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::WorkflowNotFound(_) => ApiError::NotFound(err.to_string()),
            OrchestratorError::WorkflowTypeNotRegistered(_)
            | OrchestratorError::Validation(_)
            | OrchestratorError::UnsupportedRecoveryStrategy(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => {
                error!("Internal API error: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(ApiResponse::err(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    #[serde(default)]
    pub submission_id: Option<String>,
    #[serde(default = "default_workflow_type")]
    pub workflow_type: String,
    #[serde(default)]
    pub input_data: Value,
}

fn default_workflow_type() -> String {
    BUSINESS_ANALYSIS.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoverRequest {
    #[serde(default)]
    pub strategy: Option<RecoveryStrategy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
}

fn default_max_age_hours() -> u64 {
    24 * 7
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/cancel", post(cancel_workflow))
        .route("/workflows/{id}/analysis", get(get_analysis))
        .route("/workflows/{id}/offer", get(get_offer))
        .route("/agents/health", get(agents_health))
        .route("/agents/{agent_type}/metrics", get(agent_metrics))
        .route("/recovery/{id}", get(recovery_info).post(recover_workflow))
        .route("/maintenance/cleanup", post(cleanup))
        .route("/errors/statistics", get(error_statistics))
        .with_state(ctx)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(ctx: Arc<AppContext>, shutdown: F) -> Result<(), OrchestratorError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .map_err(|e| OrchestratorError::Config(format!("Invalid server address: {}", e)))?;

    let app = router(ctx)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .max_age(Duration::from_secs(3600)),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    let listener = TcpListener::bind(addr).await?;
    info!("API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("API server stopped");
    Ok(())
}

async fn health() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    })))
}

async fn create_workflow(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), ApiError> {
    if !ctx.engine.is_workflow_registered(&request.workflow_type) {
        return Err(OrchestratorError::WorkflowTypeNotRegistered(request.workflow_type).into());
    }

    let submission_id = request
        .submission_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let state = ctx
        .engine
        .create_workflow(submission_id, request.workflow_type, request.input_data);
    let urls = ResultUrls::for_workflow(&ctx.config.server.public_url, &state);

    let engine = Arc::clone(&ctx.engine);
    let workflow_id = state.workflow_id.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.execute_workflow(&workflow_id).await {
            error!("Background workflow {} failed: {}", workflow_id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(json!({
            "workflow_id": state.workflow_id,
            "submission_id": state.submission_id,
            "status": state.status,
            "urls": urls,
        }))),
    ))
}

async fn list_workflows(State(ctx): State<Arc<AppContext>>) -> ApiResult<Value> {
    let workflows: Vec<Value> = ctx
        .engine
        .list_workflows()
        .into_iter()
        .map(|w| {
            json!({
                "workflow_id": w.workflow_id,
                "submission_id": w.submission_id,
                "workflow_type": w.workflow_type,
                "status": w.status,
                "progress": w.progress,
                "start_time": w.start_time,
                "end_time": w.end_time,
            })
        })
        .collect();
    Ok(Json(ApiResponse::ok(json!(workflows))))
}

async fn get_workflow(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult<Value> {
    let state = ctx.engine.get_workflow_status(&id).await?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(state).map_err(OrchestratorError::from)?)))
}

async fn cancel_workflow(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult<Value> {
    let cancelled = ctx.engine.cancel_workflow(&id).await?;
    Ok(Json(ApiResponse::ok(json!({
        "workflow_id": id,
        "cancelled": cancelled,
    }))))
}

async fn get_analysis(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult<Value> {
    let state = ctx.engine.get_workflow_status(&id).await?;
    let analysis = BusinessAnalysis::from_workflow(&state);
    let offer = OfferSummary::from_analysis(&analysis);
    let urls = ResultUrls::for_workflow(&ctx.config.server.public_url, &state);
    Ok(Json(ApiResponse::ok(json!({
        "analysis": analysis,
        "offer": offer,
        "urls": urls,
    }))))
}

async fn get_offer(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult<OfferSummary> {
    let state = ctx.engine.get_workflow_status(&id).await?;
    let offer = OfferSummary::from_analysis(&BusinessAnalysis::from_workflow(&state));
    Ok(Json(ApiResponse::ok(offer)))
}

async fn agents_health(State(ctx): State<Arc<AppContext>>) -> ApiResult<Value> {
    let summary = ctx.coordinator.get_system_health_summary();
    let patterns = ctx.coordinator.get_failure_patterns();
    Ok(Json(ApiResponse::ok(json!({
        "summary": summary,
        "failure_patterns": patterns,
    }))))
}

async fn agent_metrics(
    State(ctx): State<Arc<AppContext>>,
    Path(agent_type): Path<String>,
) -> ApiResult<Value> {
    let agent_type = AgentType::from(agent_type);
    let metrics = ctx
        .coordinator
        .get_agent_metrics(&agent_type)
        .ok_or_else(|| ApiError::NotFound(format!("No metrics for agent {}", agent_type)))?;
    Ok(Json(ApiResponse::ok(json!({
        "metrics": metrics,
        "average_response_time": metrics.average_response_time(),
        "success_rate": metrics.success_rate(),
    }))))
}

async fn recovery_info(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult<Value> {
    let checkpoints: Vec<Value> = ctx
        .recovery
        .get_checkpoints(&id)
        .into_iter()
        .map(|cp| {
            json!({
                "checkpoint_id": cp.checkpoint_id,
                "checkpoint_type": cp.checkpoint_type,
                "created_at": cp.created_at,
                "progress": cp.state.progress,
                "metadata": cp.metadata,
            })
        })
        .collect();
    Ok(Json(ApiResponse::ok(json!({
        "workflow_id": id,
        "checkpoints": checkpoints,
        "history": ctx.recovery.recovery_history(Some(&id)),
    }))))
}

async fn recover_workflow(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let request: RecoverRequest = if body.is_empty() {
        RecoverRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid recovery request: {}", e)))?
    };

    let state = ctx.recover_workflow(&id, request.strategy).await?;
    Ok(Json(ApiResponse::ok(json!({
        "workflow_id": state.workflow_id,
        "status": state.status,
        "progress": state.progress,
        "recovered_with": state.metadata.get("recovered_with"),
    }))))
}

async fn cleanup(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<Value> {
    let removed = ctx.cleanup_stale_workflows(request.max_age_hours).await?;
    Ok(Json(ApiResponse::ok(json!({
        "removed": removed,
        "max_age_hours": request.max_age_hours,
    }))))
}

async fn error_statistics(State(ctx): State<Arc<AppContext>>) -> ApiResult<Value> {
    let stats = ctx.error_recovery.get_error_statistics();
    Ok(Json(ApiResponse::ok(
        serde_json::to_value(stats).map_err(OrchestratorError::from)?,
    )))
}
