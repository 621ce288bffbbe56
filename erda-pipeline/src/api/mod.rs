//! API Module
//!
//! HTTP API layer of the pipeline service.
//! Each submodule handles endpoints for a specific domain.

pub mod cms;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod task;

use axum::{
    Json, Router,
    http::HeaderMap,
    routing::{get, post, put},
};
use erda_core::dto::{Envelope, Identity};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub const HEADER_USER_ID: &str = "User-ID";
pub const HEADER_INTERNAL_CLIENT: &str = "Internal-Client";

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/v2/pipelines", post(pipeline::create_pipeline_v2))
        .route(
            "/api/pipelines",
            post(pipeline::create_pipeline).get(pipeline::paging_pipelines),
        )
        .route("/api/pipelines/batch", post(pipeline::batch_create_pipelines))
        .route("/api/pipelines/statistics", get(pipeline::pipeline_statistic))
        .route(
            "/api/pipelines/{id}",
            get(pipeline::pipeline_detail).delete(pipeline::delete_pipeline),
        )
        .route("/api/pipelines/{id}/actions/run", post(pipeline::run_pipeline))
        .route(
            "/api/pipelines/{id}/actions/cancel",
            post(pipeline::cancel_pipeline),
        )
        .route(
            "/api/pipelines/{id}/actions/rerun",
            post(pipeline::rerun_pipeline),
        )
        .route(
            "/api/pipelines/{id}/actions/rerun-failed",
            post(pipeline::rerun_failed_pipeline),
        )
        .route(
            "/api/pipelines/{id}/actions/operate",
            put(pipeline::operate_pipeline),
        )
        .route(
            "/api/pipelines/snippets/actions/query-snippet-yml",
            post(pipeline::query_snippet_yml),
        )
        // Task endpoints
        .route("/api/pipelines/{id}/tasks/{task_id}", get(task::task_detail))
        .route("/api/pipelines/actions/callback", post(task::task_callback))
        // Config management endpoints
        .route(
            "/api/pipelines/cms/ns/{ns}/configs",
            post(cms::update_configs)
                .get(cms::get_configs)
                .delete(cms::delete_configs),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Caller identity carried by request headers
pub fn identity_from_headers(headers: &HeaderMap) -> Identity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    Identity {
        user_id: header(HEADER_USER_ID),
        internal_client: header(HEADER_INTERNAL_CLIENT),
    }
}

/// Wrap a payload into the success envelope
pub fn ok<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope::ok(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, HeaderValue::from_static("1001"));
        headers.insert(HEADER_INTERNAL_CLIENT, HeaderValue::from_static("  "));

        let identity = identity_from_headers(&headers);
        assert_eq!(identity.user_id.as_deref(), Some("1001"));
        assert_eq!(identity.internal_client, None);
        assert!(identity_from_headers(&HeaderMap::new()).is_empty());
    }
}
