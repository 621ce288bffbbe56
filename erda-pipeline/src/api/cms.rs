//! Config management API Handlers
//!
//! Namespaced key/value configs. Encrypted values only leave the service in
//! plain text when `decrypt=true` is asked for.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use erda_core::dto::Envelope;
use erda_core::dto::cms::{
    ConfigsResponse, DeleteConfigsRequest, GetConfigsRequest, UpdateConfigsRequest,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ok;
use crate::state::AppState;

/// POST /api/pipelines/cms/ns/{ns}/configs
pub async fn update_configs(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(req): Json<UpdateConfigsRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    tracing::info!("Updating {} config(s) of namespace {}", req.configs.len(), ns);

    state
        .cms
        .update_configs(&ns, req)
        .await
        .map_err(ApiError::op("ErrUpdatePipelineCmsConfigs"))?;
    Ok(ok(()))
}

/// GET /api/pipelines/cms/ns/{ns}/configs?keys=a,b&decrypt=true
pub async fn get_configs(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Query(req): Query<GetConfigsRequest>,
) -> ApiResult<Json<Envelope<ConfigsResponse>>> {
    let configs = state
        .cms
        .get_configs(&ns, &req.key_list(), req.decrypt)
        .await
        .map_err(ApiError::op("ErrGetPipelineCmsConfigs"))?;
    Ok(ok(configs))
}

/// DELETE /api/pipelines/cms/ns/{ns}/configs?keys=a,b
pub async fn delete_configs(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Query(req): Query<DeleteConfigsRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    tracing::info!("Deleting configs of namespace {}: {:?}", ns, req.keys);

    state
        .cms
        .delete_configs(&ns, &req.key_list())
        .await
        .map_err(ApiError::op("ErrDeletePipelineCmsConfigs"))?;
    Ok(ok(()))
}
