//! harvest-api: REST surface for the schedule admin UI.
//!
//! Routes:
//! - schedule CRUD: POST/GET /schedules, GET/PATCH/DELETE /schedules/{id}
//! - lifecycle: POST /schedules/{id}/pause, /resume, /result
//! - operations: POST /resync, GET /queue, GET /statuses, GET /stats
//! - registry notifications: POST /targets/{id}/changed, DELETE /targets/{id}
//!
//! Validation and recurrence errors come back as rejected requests;
//! executor unreachability comes back as a warning inside a successful
//! response body, never as a failure of the local mutation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use harvest_sched::{CreateSchedule, QueueStateAggregator, SchedError, ScheduleManager, UpdateSchedule};
use harvest_store::ScheduleStore;
use harvest_types::ExecutionOutcome;

/// Shared API state, constructed once at startup.
pub struct ApiState {
    pub manager: Arc<ScheduleManager>,
    pub aggregator: Arc<QueueStateAggregator>,
    pub store: Arc<ScheduleStore>,
}

/// Build the admin API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/schedules", post(create_schedule).get(list_schedules))
        .route(
            "/schedules/{id}",
            get(get_schedule)
                .patch(update_schedule)
                .delete(delete_schedule),
        )
        .route("/schedules/{id}/pause", post(pause_schedule))
        .route("/schedules/{id}/resume", post(resume_schedule))
        .route("/schedules/{id}/result", post(report_result))
        .route("/resync", post(resync))
        .route("/queue", get(queue_state))
        .route("/statuses", get(statuses))
        .route("/stats", get(stats))
        .route("/targets/{id}/changed", post(target_changed))
        .route("/targets/{id}", delete(target_removed))
        .with_state(state)
}

/// Bind and serve the admin API.
pub async fn serve(state: Arc<ApiState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Admin API listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(err: SchedError) -> Response {
    let status = match &err {
        SchedError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedError::Unschedulable | SchedError::Recurrence(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedError::NotFound(_) | SchedError::TargetNotFound(_) => StatusCode::NOT_FOUND,
        SchedError::Registry(_) | SchedError::Executor(_) => StatusCode::BAD_GATEWAY,
        SchedError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn health() -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn create_schedule(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateSchedule>,
) -> Response {
    match state.manager.create(req).await {
        Ok(mutation) => (StatusCode::CREATED, Json(mutation)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_schedules(State(state): State<Arc<ApiState>>) -> Response {
    match state.manager.list().await {
        Ok(records) => Json(json!({ "schedules": records })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_schedule(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.manager.get(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateSchedule>,
) -> Response {
    match state.manager.update(&id, patch).await {
        Ok(mutation) => Json(mutation).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_schedule(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.manager.delete(&id).await {
        Ok(warning) => Json(json!({ "deleted": true, "executor_warning": warning })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn pause_schedule(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.manager.pause(&id).await {
        Ok(mutation) => Json(mutation).into_response(),
        Err(e) => error_response(e),
    }
}

async fn resume_schedule(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.manager.resume(&id).await {
        Ok(mutation) => Json(mutation).into_response(),
        Err(e) => error_response(e),
    }
}

/// Execution outcomes arrive asynchronously from the executor; a failure
/// report is a successful request here, it only mutates health state.
async fn report_result(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(outcome): Json<ExecutionOutcome>,
) -> Response {
    match state.manager.report_execution_result(&id, outcome).await {
        Ok(mutation) => Json(mutation).into_response(),
        Err(e) => error_response(e),
    }
}

async fn resync(State(state): State<Arc<ApiState>>) -> Response {
    match state.manager.resync().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn queue_state(State(state): State<Arc<ApiState>>) -> Response {
    match state.aggregator.get_queue_state().await {
        Ok(queue) => Json(queue).into_response(),
        Err(e) => error_response(e),
    }
}

async fn statuses(State(state): State<Arc<ApiState>>) -> Response {
    match state.aggregator.list_statuses().await {
        Ok(rows) => Json(json!({ "statuses": rows })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Read contract for the stats/reporting view.
async fn stats(State(state): State<Arc<ApiState>>) -> Response {
    match state.store.most_recent_success().await {
        Ok(latest) => Json(json!({
            "most_recent_success": latest.map(|(id, at)| json!({ "id": id, "at": at })),
        }))
        .into_response(),
        Err(e) => error_response(SchedError::Store(e)),
    }
}

#[derive(Debug, Deserialize)]
struct TargetChanged {
    enabled: bool,
}

async fn target_changed(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<TargetChanged>,
) -> Response {
    match state.manager.on_target_changed(&id, body.enabled).await {
        Ok(affected) => Json(json!({ "affected": affected })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn target_removed(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.manager.on_target_removed(&id).await {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(e) => error_response(e),
    }
}
