//! Cron Repository

use chrono::{DateTime, Utc};
use erda_core::domain::cron::PipelineCron;
use sqlx::PgExecutor;

pub async fn find_by_id<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
) -> Result<Option<PipelineCron>, sqlx::Error> {
    let row = sqlx::query_as::<_, CronRow>(
        r#"
        SELECT id, source, yml_name, cluster_name, cron_expr, enable, created_at, updated_at
        FROM pipeline_crons
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_source_and_yml<'e, E: PgExecutor<'e>>(
    db: E,
    source: &str,
    yml_name: &str,
) -> Result<Option<PipelineCron>, sqlx::Error> {
    let row = sqlx::query_as::<_, CronRow>(
        r#"
        SELECT id, source, yml_name, cluster_name, cron_expr, enable, created_at, updated_at
        FROM pipeline_crons
        WHERE source = $1 AND yml_name = $2
        "#,
    )
    .bind(source)
    .bind(yml_name)
    .fetch_optional(db)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Create or refresh the cron of `(source, yml_name)`. The enable flag of an
/// existing cron is kept.
pub async fn upsert<'e, E: PgExecutor<'e>>(
    db: E,
    source: &str,
    yml_name: &str,
    cluster_name: &str,
    cron_expr: &str,
) -> Result<PipelineCron, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, CronRow>(
        r#"
        INSERT INTO pipeline_crons (source, yml_name, cluster_name, cron_expr, enable,
                                    created_at, updated_at)
        VALUES ($1, $2, $3, $4, FALSE, $5, $5)
        ON CONFLICT (source, yml_name)
        DO UPDATE SET cluster_name = EXCLUDED.cluster_name,
                      cron_expr = EXCLUDED.cron_expr,
                      updated_at = EXCLUDED.updated_at
        RETURNING id, source, yml_name, cluster_name, cron_expr, enable, created_at, updated_at
        "#,
    )
    .bind(source)
    .bind(yml_name)
    .bind(cluster_name)
    .bind(cron_expr)
    .bind(now)
    .fetch_one(db)
    .await?;

    Ok(row.into())
}

pub async fn update_enable<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    enable: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE pipeline_crons SET enable = $1, updated_at = $2 WHERE id = $3")
        .bind(enable)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct CronRow {
    id: i64,
    source: String,
    yml_name: String,
    cluster_name: String,
    cron_expr: String,
    enable: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CronRow> for PipelineCron {
    fn from(row: CronRow) -> Self {
        PipelineCron {
            id: row.id,
            source: row.source,
            yml_name: row.yml_name,
            cluster_name: row.cluster_name,
            cron_expr: row.cron_expr,
            enable: row.enable,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
