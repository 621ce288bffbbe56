//! Pipeline Repository
//!
//! A pipeline is stored as a `pipeline_bases` row (indexed columns) plus a
//! `pipeline_extras` row holding the JSON extra.

use chrono::{DateTime, Utc};
use erda_core::domain::pipeline::{Pipeline, PipelineBase, PipelineExtra, PipelineType, TriggerMode};
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::pipeline::PagingRequest;
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};

use super::decode_json;

const SELECT_PIPELINE: &str = r#"
    SELECT b.id, b.source, b.yml_name, b.cluster_name, b.status, b.pipeline_type,
           b.trigger_mode, b.cron_id, b.is_snippet, b.parent_pipeline_id,
           b.parent_task_id, b.is_edge, b.cost_time_sec, b.progress,
           b.time_begin, b.time_end, b.created_at, b.updated_at, e.extra
    FROM pipeline_bases b
    LEFT JOIN pipeline_extras e ON e.pipeline_id = b.id
"#;

/// Insert base and extra, assigning the new ID to `p`
pub async fn insert(conn: &mut PgConnection, p: &mut Pipeline) -> Result<(), sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_bases (source, yml_name, cluster_name, status, pipeline_type,
                                    trigger_mode, cron_id, is_snippet, parent_pipeline_id,
                                    parent_task_id, is_edge, cost_time_sec, progress,
                                    time_begin, time_end, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING id
        "#,
    )
    .bind(&p.base.source)
    .bind(&p.base.yml_name)
    .bind(&p.base.cluster_name)
    .bind(p.base.status.as_str())
    .bind(p.base.pipeline_type.as_str())
    .bind(p.base.trigger_mode.as_str())
    .bind(p.base.cron_id)
    .bind(p.base.is_snippet)
    .bind(p.base.parent_pipeline_id)
    .bind(p.base.parent_task_id)
    .bind(p.base.is_edge)
    .bind(p.base.cost_time_sec)
    .bind(p.base.progress.map(i16::from))
    .bind(p.base.time_begin)
    .bind(p.base.time_end)
    .bind(p.base.created_at)
    .bind(p.base.updated_at)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO pipeline_extras (pipeline_id, extra) VALUES ($1, $2)")
        .bind(id)
        .bind(sqlx::types::Json(&p.extra))
        .execute(&mut *conn)
        .await?;

    p.base.id = id;
    Ok(())
}

/// Find a pipeline by ID
pub async fn find_by_id<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(&format!("{SELECT_PIPELINE} WHERE b.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?;

    row.map(Pipeline::try_from).transpose()
}

pub async fn find_by_ids<'e, E: PgExecutor<'e>>(
    db: E,
    ids: &[i64],
) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows =
        sqlx::query_as::<_, PipelineRow>(&format!("{SELECT_PIPELINE} WHERE b.id = ANY($1)"))
            .bind(ids)
            .fetch_all(db)
            .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

/// Pipelines of the same source and yml name the reconciler is still working on
pub async fn find_running_by_source_and_yml<'e, E: PgExecutor<'e>>(
    db: E,
    source: &str,
    yml_name: &str,
) -> Result<Vec<Pipeline>, sqlx::Error> {
    let statuses: Vec<&str> = [
        PipelineStatus::Born,
        PipelineStatus::Mark,
        PipelineStatus::Created,
        PipelineStatus::Queue,
        PipelineStatus::Running,
    ]
    .iter()
    .map(PipelineStatus::as_str)
    .collect();

    let rows = sqlx::query_as::<_, PipelineRow>(&format!(
        "{SELECT_PIPELINE} WHERE b.source = $1 AND b.yml_name = $2 AND b.status = ANY($3) ORDER BY b.id"
    ))
    .bind(source)
    .bind(yml_name)
    .bind(statuses)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

/// One page of pipelines, newest first, with the total count of matches
pub async fn paging(
    conn: &mut PgConnection,
    req: &PagingRequest,
) -> Result<(Vec<Pipeline>, i64), sqlx::Error> {
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM pipeline_bases b");
    push_paging_filters(&mut count, req);
    let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut query = QueryBuilder::<Postgres>::new(SELECT_PIPELINE);
    push_paging_filters(&mut query, req);
    query
        .push(" ORDER BY b.id DESC LIMIT ")
        .push_bind(req.page_size())
        .push(" OFFSET ")
        .push_bind((req.page_no() - 1) * req.page_size());

    let rows = query
        .build_query_as::<PipelineRow>()
        .fetch_all(&mut *conn)
        .await?;

    let pipelines = rows
        .into_iter()
        .map(Pipeline::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((pipelines, total))
}

fn push_paging_filters(query: &mut QueryBuilder<'_, Postgres>, req: &PagingRequest) {
    query.push(" WHERE TRUE");
    if let Some(source) = req.source.as_ref().filter(|s| !s.is_empty()) {
        query.push(" AND b.source = ").push_bind(source.clone());
    }
    if let Some(yml_name) = req.yml_name.as_ref().filter(|s| !s.is_empty()) {
        query.push(" AND b.yml_name = ").push_bind(yml_name.clone());
    }
    if let Some(cluster) = req.cluster_name.as_ref().filter(|s| !s.is_empty()) {
        query.push(" AND b.cluster_name = ").push_bind(cluster.clone());
    }
    let statuses: Vec<String> = req
        .status_list()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    if !statuses.is_empty() {
        query.push(" AND b.status = ANY(").push_bind(statuses).push(")");
    }
}

/// Pipeline count per status
pub async fn count_by_status<'e, E: PgExecutor<'e>>(
    db: E,
    source: Option<&str>,
    cluster_name: Option<&str>,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT status, COUNT(*)
        FROM pipeline_bases
        WHERE ($1::VARCHAR IS NULL OR source = $1)
          AND ($2::VARCHAR IS NULL OR cluster_name = $2)
        GROUP BY status
        "#,
    )
    .bind(source)
    .bind(cluster_name)
    .fetch_all(db)
    .await
}

pub async fn update_status<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    status: PipelineStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pipeline_bases SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

/// Move a pipeline to `to` only while it is still in `from`
///
/// Returns whether the row changed. Concurrent callers racing on the same
/// transition see exactly one `true`.
pub async fn transition_status<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    from: PipelineStatus,
    to: PipelineStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE pipeline_bases SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id)
    .bind(from.as_str())
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_extra<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    extra: &PipelineExtra,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pipeline_extras SET extra = $1 WHERE pipeline_id = $2")
        .bind(sqlx::types::Json(extra))
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn mark_complete_reconciler_gc<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pipeline_extras
        SET extra = jsonb_set(extra, '{complete_reconciler_gc}', 'true'::jsonb)
        WHERE pipeline_id = $1
        "#,
    )
    .bind(id)
    .execute(db)
    .await?;

    Ok(())
}

/// Delete a pipeline; stages, tasks and extra cascade
pub async fn delete<'e, E: PgExecutor<'e>>(db: E, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipeline_bases WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// GC Queries
// =============================================================================

/// Pipelines in `statuses` idle for longer than their database GC TTL
///
/// `gc_item` is the key under `extra.gc.database` (`analyzed` or `finished`)
/// holding the pipeline's own TTL; `default_ttl` applies when it is unset.
pub async fn find_database_gc_candidates<'e, E: PgExecutor<'e>>(
    db: E,
    statuses: &[PipelineStatus],
    gc_item: &str,
    default_ttl: u64,
    limit: i64,
) -> Result<Vec<Pipeline>, sqlx::Error> {
    let statuses: Vec<&str> = statuses.iter().map(PipelineStatus::as_str).collect();

    let rows = sqlx::query_as::<_, PipelineRow>(&format!(
        r#"{SELECT_PIPELINE}
        WHERE b.status = ANY($1)
          AND COALESCE(b.time_end, b.updated_at)
              + make_interval(secs => COALESCE((e.extra->'gc'->'database'->$2->>'ttl_second')::BIGINT, $3))
              < NOW()
        ORDER BY b.id
        LIMIT $4
        "#
    ))
    .bind(statuses)
    .bind(gc_item)
    .bind(ttl_i64(default_ttl))
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

/// Finished pipelines whose resource TTL elapsed but are not marked GC'd yet
pub async fn find_resource_gc_candidates<'e, E: PgExecutor<'e>>(
    db: E,
    default_success_ttl: u64,
    default_failed_ttl: u64,
    limit: i64,
) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(&format!(
        r#"{SELECT_PIPELINE}
        WHERE b.time_end IS NOT NULL
          AND COALESCE((e.extra->>'complete_reconciler_gc')::BOOLEAN, FALSE) = FALSE
          AND b.time_end + make_interval(secs => CASE
                WHEN b.status = $1
                THEN COALESCE((e.extra->'gc'->'resource'->>'success_ttl_second')::BIGINT, $2)
                ELSE COALESCE((e.extra->'gc'->'resource'->>'failed_ttl_second')::BIGINT, $3)
              END) < NOW()
        ORDER BY b.id
        LIMIT $4
        "#
    ))
    .bind(PipelineStatus::Success.as_str())
    .bind(ttl_i64(default_success_ttl))
    .bind(ttl_i64(default_failed_ttl))
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(Pipeline::try_from).collect()
}

fn ttl_i64(ttl: u64) -> i64 {
    i64::try_from(ttl).unwrap_or(i64::MAX)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    source: String,
    yml_name: String,
    cluster_name: String,
    status: String,
    pipeline_type: String,
    trigger_mode: String,
    cron_id: Option<i64>,
    is_snippet: bool,
    parent_pipeline_id: Option<i64>,
    parent_task_id: Option<i64>,
    is_edge: bool,
    cost_time_sec: Option<i64>,
    progress: Option<i16>,
    time_begin: Option<DateTime<Utc>>,
    time_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    extra: Option<serde_json::Value>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = sqlx::Error;

    fn try_from(row: PipelineRow) -> Result<Self, sqlx::Error> {
        // a base without its extra row decodes to an empty extra
        let extra = match row.extra {
            Some(v) => decode_json("extra", v)?,
            None => PipelineExtra::default(),
        };

        Ok(Pipeline {
            base: PipelineBase {
                id: row.id,
                source: row.source,
                yml_name: row.yml_name,
                cluster_name: row.cluster_name,
                status: PipelineStatus::parse(&row.status),
                pipeline_type: PipelineType::parse(&row.pipeline_type).unwrap_or_default(),
                trigger_mode: TriggerMode::parse(&row.trigger_mode).unwrap_or_default(),
                cron_id: row.cron_id,
                is_snippet: row.is_snippet,
                parent_pipeline_id: row.parent_pipeline_id,
                parent_task_id: row.parent_task_id,
                is_edge: row.is_edge,
                cost_time_sec: row.cost_time_sec,
                progress: row.progress.and_then(|p| u8::try_from(p).ok()),
                time_begin: row.time_begin,
                time_end: row.time_end,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            extra,
        })
    }
}
