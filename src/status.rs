//! Read-only HTTP status surface. Every handler is a thin call into a hub
//! accessor; this is the external-consumer side of the change-notification
//! contract, kept deliberately free of business logic.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::StatusConfig;
use crate::hub::DataHub;
use crate::model::{TaskFilter, TaskStatus};

#[derive(Clone)]
pub struct StatusState {
    pub hub: Arc<DataHub>,
    pub started_at: Instant,
}

pub fn build_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(api_status))
        .route("/api/projects", get(api_projects))
        .route("/api/tasks", get(api_tasks))
        .route("/api/memories", get(api_memories))
        .route("/api/memories/:id", get(api_memory_detail))
        .route("/api/prompts", get(api_prompts))
        .route("/api/prompts/:id/versions", get(api_prompt_versions))
        .route("/api/workflows", get(api_workflows))
        .route("/api/agents", get(api_agents))
        .with_state(state)
}

pub async fn serve(cfg: &StatusConfig, hub: Arc<DataHub>) -> anyhow::Result<()> {
    let state = StatusState {
        hub,
        started_at: Instant::now(),
    };
    let app = build_router(state);
    let addr = format!("{}:{}", cfg.bind, cfg.port);
    info!("Status server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn api_status(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let info = state.hub.get_status_info();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "connection_state": info.connection_state.as_str(),
        "active_task_count": info.active_task_count,
        "last_sync": info.last_sync,
        "genos_root": state.hub.root().map(|p| p.display().to_string()),
    }))
}

async fn api_projects(State(state): State<StatusState>) -> Json<serde_json::Value> {
    Json(json!(state.hub.get_projects()))
}

#[derive(Deserialize)]
struct TasksQuery {
    status: Option<String>,
    project: Option<String>,
}

async fn api_tasks(
    State(state): State<StatusState>,
    Query(q): Query<TasksQuery>,
) -> Json<serde_json::Value> {
    let filter = TaskFilter {
        status: q.status.as_deref().map(TaskStatus::parse),
        project_id: q.project,
    };
    Json(json!(state.hub.get_tasks(&filter)))
}

#[derive(Deserialize)]
struct MemoriesQuery {
    q: Option<String>,
    /// When set, search live against the store (full-content scan) instead
    /// of the cached previews.
    #[serde(default)]
    live: bool,
}

async fn api_memories(
    State(state): State<StatusState>,
    Query(q): Query<MemoriesQuery>,
) -> Json<serde_json::Value> {
    let memories = match (&q.q, q.live) {
        (Some(term), true) => state.hub.search_memories_remote(term).await,
        _ => state.hub.get_memories(q.q.as_deref()),
    };
    Json(json!(memories))
}

async fn api_memory_detail(
    State(state): State<StatusState>,
    Path(id): Path<i64>,
) -> Json<serde_json::Value> {
    Json(json!(state.hub.get_memory_by_id(id).await))
}

async fn api_prompts(State(state): State<StatusState>) -> Json<serde_json::Value> {
    Json(json!(state.hub.get_prompts()))
}

async fn api_prompt_versions(
    State(state): State<StatusState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(json!(state.hub.get_prompt_versions(&id).await))
}

async fn api_workflows(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let hub = &state.hub;
    Json(json!({
        "workflows": hub.get_workflows(),
        "local": hub.get_local_workflows(),
    }))
}

async fn api_agents(State(state): State<StatusState>) -> Json<serde_json::Value> {
    Json(json!(state.hub.get_agents()))
}
