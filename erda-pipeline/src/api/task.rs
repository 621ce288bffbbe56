//! Task API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use erda_core::dto::Envelope;
use erda_core::dto::pipeline::{TaskCallbackRequest, TaskDetail};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ok;
use crate::state::AppState;

/// GET /api/pipelines/{id}/tasks/{task_id}
pub async fn task_detail(
    State(state): State<AppState>,
    Path((pipeline_id, task_id)): Path<(i64, i64)>,
) -> ApiResult<Json<Envelope<TaskDetail>>> {
    tracing::debug!("Getting task {} of pipeline {}", task_id, pipeline_id);

    let detail = state
        .pipelines
        .task_detail(pipeline_id, task_id)
        .await
        .map_err(ApiError::op("ErrGetTaskDetail"))?;
    Ok(ok(detail))
}

/// POST /api/pipelines/actions/callback
pub async fn task_callback(
    State(state): State<AppState>,
    Json(req): Json<TaskCallbackRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    tracing::debug!("Callback for task {}", req.task_id);

    state
        .pipelines
        .task_callback(req)
        .await
        .map_err(ApiError::op("ErrPipelineCallback"))?;
    Ok(ok(()))
}
