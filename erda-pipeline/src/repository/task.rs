//! Task Repository

use chrono::{DateTime, Utc};
use erda_core::domain::status::PipelineStatus;
use erda_core::domain::task::{ExecutorKind, PipelineTask, TaskResult};
use sqlx::PgExecutor;
use sqlx::types::Json;

use super::decode_json;

/// Insert a task, assigning its ID
///
/// Inserting a task whose identity already exists returns the existing row's
/// ID and leaves the row untouched.
pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    task: &mut PipelineTask,
) -> Result<(), sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_tasks (pipeline_id, stage_id, name, task_type, executor_kind, status,
                                    is_snippet, snippet_pipeline_id, extra, result, inspect,
                                    cost_time_sec, time_begin, time_end, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (pipeline_id, stage_id, task_type, name)
        DO UPDATE SET updated_at = pipeline_tasks.updated_at
        RETURNING id
        "#,
    )
    .bind(task.pipeline_id)
    .bind(task.stage_id)
    .bind(&task.name)
    .bind(&task.task_type)
    .bind(task.executor_kind.as_str())
    .bind(task.status.as_str())
    .bind(task.is_snippet)
    .bind(task.snippet_pipeline_id)
    .bind(Json(&task.extra))
    .bind(task.result.as_ref().map(Json))
    .bind(Json(&task.inspect))
    .bind(task.cost_time_sec)
    .bind(task.time_begin)
    .bind(task.time_end)
    .bind(task.created_at)
    .bind(task.updated_at)
    .fetch_one(db)
    .await?;

    task.id = id;
    Ok(())
}

pub async fn find_by_id<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
) -> Result<Option<PipelineTask>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, pipeline_id, stage_id, name, task_type, executor_kind, status, is_snippet,
               snippet_pipeline_id, extra, result, inspect, cost_time_sec, time_begin,
               time_end, created_at, updated_at
        FROM pipeline_tasks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    row.map(PipelineTask::try_from).transpose()
}

/// Tasks of a pipeline in creation order
pub async fn find_by_pipeline<'e, E: PgExecutor<'e>>(
    db: E,
    pipeline_id: i64,
) -> Result<Vec<PipelineTask>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, pipeline_id, stage_id, name, task_type, executor_kind, status, is_snippet,
               snippet_pipeline_id, extra, result, inspect, cost_time_sec, time_begin,
               time_end, created_at, updated_at
        FROM pipeline_tasks
        WHERE pipeline_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(PipelineTask::try_from).collect()
}

pub async fn update_status<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    status: PipelineStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pipeline_tasks SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn update_result<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    result: &TaskResult,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pipeline_tasks SET result = $1, updated_at = $2 WHERE id = $3")
        .bind(Json(result))
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    pipeline_id: i64,
    stage_id: i64,
    name: String,
    task_type: String,
    executor_kind: String,
    status: String,
    is_snippet: bool,
    snippet_pipeline_id: Option<i64>,
    extra: serde_json::Value,
    result: Option<serde_json::Value>,
    inspect: serde_json::Value,
    cost_time_sec: Option<i64>,
    time_begin: Option<DateTime<Utc>>,
    time_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for PipelineTask {
    type Error = sqlx::Error;

    fn try_from(row: TaskRow) -> Result<Self, sqlx::Error> {
        Ok(PipelineTask {
            id: row.id,
            pipeline_id: row.pipeline_id,
            stage_id: row.stage_id,
            name: row.name,
            task_type: row.task_type,
            executor_kind: ExecutorKind::parse(&row.executor_kind),
            status: PipelineStatus::parse(&row.status),
            is_snippet: row.is_snippet,
            snippet_pipeline_id: row.snippet_pipeline_id,
            extra: decode_json("extra", row.extra)?,
            result: row.result.map(|v| decode_json("result", v)).transpose()?,
            inspect: decode_json("inspect", row.inspect)?,
            cost_time_sec: row.cost_time_sec,
            time_begin: row.time_begin,
            time_end: row.time_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
