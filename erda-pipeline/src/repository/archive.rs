//! Archive Repository
//!
//! Snapshot of a pipeline with its stages and tasks, written before the
//! database GC deletes it.

use chrono::Utc;
use erda_core::domain::pipeline::Pipeline;
use erda_core::domain::stage::PipelineStage;
use erda_core::domain::task::PipelineTask;
use serde::Serialize;
use sqlx::PgExecutor;
use sqlx::types::Json;

#[derive(Serialize)]
struct ArchiveContent<'a> {
    pipeline: &'a Pipeline,
    stages: &'a [PipelineStage],
    tasks: &'a [PipelineTask],
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    db: E,
    pipeline: &Pipeline,
    stages: &[PipelineStage],
    tasks: &[PipelineTask],
) -> Result<i64, sqlx::Error> {
    let content = ArchiveContent {
        pipeline,
        stages,
        tasks,
    };

    sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_archives (pipeline_id, source, yml_name, status, content, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(pipeline.id())
    .bind(&pipeline.base.source)
    .bind(&pipeline.base.yml_name)
    .bind(pipeline.status().as_str())
    .bind(Json(&content))
    .bind(Utc::now())
    .fetch_one(db)
    .await
}
