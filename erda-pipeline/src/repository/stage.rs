//! Stage Repository

use chrono::{DateTime, Utc};
use erda_core::domain::stage::PipelineStage;
use erda_core::domain::status::PipelineStatus;
use sqlx::PgExecutor;

/// Insert a stage, assigning the new ID to `stage`
pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    stage: &mut PipelineStage,
) -> Result<(), sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_stages (pipeline_id, name, status, stage_order, cost_time_sec,
                                     time_begin, time_end, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(stage.pipeline_id)
    .bind(&stage.name)
    .bind(stage.status.as_str())
    .bind(stage.stage_order)
    .bind(stage.cost_time_sec)
    .bind(stage.time_begin)
    .bind(stage.time_end)
    .bind(stage.created_at)
    .bind(stage.updated_at)
    .fetch_one(db)
    .await?;

    stage.id = id;
    Ok(())
}

/// Stages of a pipeline in yml order
pub async fn find_by_pipeline<'e, E: PgExecutor<'e>>(
    db: E,
    pipeline_id: i64,
) -> Result<Vec<PipelineStage>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StageRow>(
        r#"
        SELECT id, pipeline_id, name, status, stage_order, cost_time_sec,
               time_begin, time_end, created_at, updated_at
        FROM pipeline_stages
        WHERE pipeline_id = $1
        ORDER BY stage_order ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StageRow {
    id: i64,
    pipeline_id: i64,
    name: String,
    status: String,
    stage_order: i32,
    cost_time_sec: Option<i64>,
    time_begin: Option<DateTime<Utc>>,
    time_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StageRow> for PipelineStage {
    fn from(row: StageRow) -> Self {
        PipelineStage {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            status: PipelineStatus::parse(&row.status),
            stage_order: row.stage_order,
            cost_time_sec: row.cost_time_sec,
            time_begin: row.time_begin,
            time_end: row.time_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
