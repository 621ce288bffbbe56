//! Health Check API Handler
//!
//! Liveness plus a database round trip.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::state::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1")
        .execute(state.pipelines.pool())
        .await
    {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
