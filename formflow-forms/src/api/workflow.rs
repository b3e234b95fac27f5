//! Background workflow endpoints
//!
//! Runs are accepted immediately and executed on the task runner. Progress
//! and results are only observable through `/events`.

use crate::models::FieldMap;
use crate::services::TaskInfo;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub form_code: String,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub flatten: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub form_codes: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, FieldMap>,
    #[serde(default)]
    pub flatten: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub form_code: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: Uuid,
    pub label: String,
}

/// POST /api/workflow
pub async fn start_workflow(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    // Unknown codes are rejected here instead of inside the task
    let entry = state.catalog.require(&request.form_code)?.clone();

    let label = format!("workflow {}", entry.form_code);
    let task_state = state.clone();
    let handle = state.tasks.spawn(label.clone(), async move {
        let result = task_state
            .orchestrator
            .run_workflow(
                &task_state.catalog,
                &entry.form_code,
                &request.fields,
                &task_state.config.output_dir,
                request.flatten,
            )
            .await;
        if let Err(e) = result {
            warn!("Background workflow failed: {}", e);
        }
    });

    info!(task_id = %handle.id(), "Workflow accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: handle.id(),
            label,
        }),
    ))
}

/// POST /api/bulk
pub async fn start_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    if request.form_codes.is_empty() {
        return Err(ApiError::BadRequest("form_codes is empty".to_string()));
    }

    let label = format!("bulk {} forms", request.form_codes.len());
    let task_state = state.clone();
    let handle = state.tasks.spawn(label.clone(), async move {
        task_state
            .orchestrator
            .run_bulk_workflow(
                &task_state.catalog,
                &request.form_codes,
                &request.fields,
                &task_state.config.output_dir,
                request.flatten,
            )
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: handle.id(),
            label,
        }),
    ))
}

/// POST /api/update
pub async fn start_update(
    State(state): State<AppState>,
    Json(request): Json<UpdateRequest>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let entry = state.catalog.require(&request.form_code)?.clone();

    let label = format!("update {}", entry.form_code);
    let task_state = state.clone();
    let handle = state.tasks.spawn(label.clone(), async move {
        let result = task_state
            .orchestrator
            .run_update_workflow(
                &task_state.catalog,
                &entry.form_code,
                &task_state.config.downloads_dir,
                request.force,
            )
            .await;
        if let Err(e) = result {
            warn!("Background update failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAccepted {
            task_id: handle.id(),
            label,
        }),
    ))
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskInfo>> {
    Json(state.tasks.active())
}

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflow", post(start_workflow))
        .route("/api/bulk", post(start_bulk))
        .route("/api/update", post(start_update))
        .route("/api/tasks", get(list_tasks))
}
