//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management. Identity missing from the body is
//! taken from the `User-ID` and `Internal-Client` headers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use erda_core::dto::Envelope;
use erda_core::dto::pipeline::{
    BatchCreateRequest, CancelPipelineRequest, CreatePipelineRequest, CreatePipelineRequestV2,
    OperatePipelineRequest, PagingRequest, PagingResponse, PipelineDetail, PipelineSummary,
    QuerySnippetRequest, QuerySnippetResponse, RerunPipelineRequest, RunPipelineRequest,
    StatisticRequest, StatisticResponse,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::{identity_from_headers, ok};
use crate::state::AppState;

/// POST /api/v2/pipelines
pub async fn create_pipeline_v2(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<CreatePipelineRequestV2>,
) -> ApiResult<Json<Envelope<PipelineSummary>>> {
    req.identity = req.identity.or(identity_from_headers(&headers));
    tracing::info!(
        "Creating pipeline: {} (source {})",
        req.pipeline_yml_name,
        req.pipeline_source
    );

    let summary = state
        .pipelines
        .create_v2(req)
        .await
        .map_err(ApiError::op("ErrCreatePipeline"))?;
    Ok(ok(summary))
}

/// POST /api/pipelines
/// Legacy create, upgraded to the v2 request
pub async fn create_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePipelineRequest>,
) -> ApiResult<Json<Envelope<PipelineSummary>>> {
    let mut req = CreatePipelineRequestV2::from(req);
    req.identity = req.identity.or(identity_from_headers(&headers));

    let summary = state
        .pipelines
        .create_v2(req)
        .await
        .map_err(ApiError::op("ErrCreatePipeline"))?;
    Ok(ok(summary))
}

/// POST /api/pipelines/batch
pub async fn batch_create_pipelines(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<BatchCreateRequest>,
) -> ApiResult<Json<Envelope<Vec<PipelineSummary>>>> {
    let identity = identity_from_headers(&headers);
    for create in &mut req.requests {
        create.identity = std::mem::take(&mut create.identity).or(identity.clone());
    }
    tracing::info!("Batch creating {} pipeline(s)", req.requests.len());

    let summaries = state
        .pipelines
        .batch_create(req)
        .await
        .map_err(ApiError::op("ErrBatchCreatePipeline"))?;
    Ok(ok(summaries))
}

/// GET /api/pipelines
pub async fn paging_pipelines(
    State(state): State<AppState>,
    Query(req): Query<PagingRequest>,
) -> ApiResult<Json<Envelope<PagingResponse>>> {
    tracing::debug!("Paging pipelines: {:?}", req);

    let page = state
        .pipelines
        .paging(req)
        .await
        .map_err(ApiError::op("ErrPagingPipeline"))?;
    Ok(ok(page))
}

/// GET /api/pipelines/statistics
pub async fn pipeline_statistic(
    State(state): State<AppState>,
    Query(req): Query<StatisticRequest>,
) -> ApiResult<Json<Envelope<StatisticResponse>>> {
    let stat = state
        .pipelines
        .statistic(req)
        .await
        .map_err(ApiError::op("ErrStatisticPipeline"))?;
    Ok(ok(stat))
}

/// GET /api/pipelines/{id}
pub async fn pipeline_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<PipelineDetail>>> {
    tracing::debug!("Getting pipeline detail: {}", id);

    let detail = state
        .pipelines
        .detail(id)
        .await
        .map_err(ApiError::op("ErrGetPipelineDetail"))?;
    Ok(ok(detail))
}

/// DELETE /api/pipelines/{id}
pub async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Envelope<()>>> {
    tracing::info!("Deleting pipeline: {}", id);

    state
        .pipelines
        .delete(id)
        .await
        .map_err(ApiError::op("ErrDeletePipeline"))?;
    Ok(ok(()))
}

/// POST /api/pipelines/{id}/actions/run
pub async fn run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(mut req): Json<RunPipelineRequest>,
) -> ApiResult<Json<Envelope<PipelineSummary>>> {
    req.identity = req.identity.or(identity_from_headers(&headers));
    tracing::info!("Running pipeline: {}", id);

    let p = state
        .pipelines
        .run(id, req)
        .await
        .map_err(ApiError::op("ErrRunPipeline"))?;
    Ok(ok(PipelineSummary::from(&p)))
}

/// POST /api/pipelines/{id}/actions/cancel
pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(mut req): Json<CancelPipelineRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    req.identity = req.identity.or(identity_from_headers(&headers));
    tracing::info!("Cancelling pipeline: {}", id);

    state
        .pipelines
        .cancel(id, req)
        .await
        .map_err(ApiError::op("ErrCancelPipeline"))?;
    Ok(ok(()))
}

/// POST /api/pipelines/{id}/actions/rerun
pub async fn rerun_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(mut req): Json<RerunPipelineRequest>,
) -> ApiResult<Json<Envelope<PipelineSummary>>> {
    req.identity = req.identity.or(identity_from_headers(&headers));
    tracing::info!("Rerunning pipeline: {}", id);

    let summary = state
        .pipelines
        .rerun(id, req)
        .await
        .map_err(ApiError::op("ErrRerunPipeline"))?;
    Ok(ok(summary))
}

/// POST /api/pipelines/{id}/actions/rerun-failed
pub async fn rerun_failed_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(mut req): Json<RerunPipelineRequest>,
) -> ApiResult<Json<Envelope<PipelineSummary>>> {
    req.identity = req.identity.or(identity_from_headers(&headers));
    tracing::info!("Rerunning failed tasks of pipeline: {}", id);

    let summary = state
        .pipelines
        .rerun_failed(id, req)
        .await
        .map_err(ApiError::op("ErrRerunFailedPipeline"))?;
    Ok(ok(summary))
}

/// PUT /api/pipelines/{id}/actions/operate
pub async fn operate_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<OperatePipelineRequest>,
) -> ApiResult<Json<Envelope<()>>> {
    tracing::info!(
        "Operating pipeline {}: {} task operation(s)",
        id,
        req.task_operates.len()
    );

    state
        .pipelines
        .operate(id, req)
        .await
        .map_err(ApiError::op("ErrOperatePipeline"))?;
    Ok(ok(()))
}

/// POST /api/pipelines/snippets/actions/query-snippet-yml
pub async fn query_snippet_yml(
    State(state): State<AppState>,
    Json(req): Json<QuerySnippetRequest>,
) -> ApiResult<Json<Envelope<QuerySnippetResponse>>> {
    let resp = state
        .pipelines
        .query_snippet_yml(&req)
        .map_err(ApiError::op("ErrQuerySnippetYml"))?;
    Ok(ok(resp))
}
