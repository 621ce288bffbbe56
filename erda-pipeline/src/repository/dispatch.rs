//! Dispatch Repository
//!
//! Outbox of pipeline commands for the reconciler.

use chrono::Utc;
use sqlx::PgExecutor;

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    pipeline_id: i64,
    action: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_dispatches (pipeline_id, action, created_at)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(pipeline_id)
    .bind(action)
    .bind(Utc::now())
    .fetch_one(db)
    .await
}
