//! Config Management Repository
//!
//! Namespaces and their key/value configs. Encrypted values are stored as
//! produced by the cipher; this layer never decrypts.

use chrono::{DateTime, Utc};
use erda_core::domain::cms::{CmsConfig, ConfigType};
use sqlx::PgExecutor;

/// Find a namespace ID by name
pub async fn find_ns_id<'e, E: PgExecutor<'e>>(db: E, ns: &str) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM pipeline_cms_namespaces WHERE ns = $1")
        .bind(ns)
        .fetch_optional(db)
        .await
}

/// Get or create a namespace, returning its ID
pub async fn ensure_ns<'e, E: PgExecutor<'e>>(
    db: E,
    pipeline_source: &str,
    ns: &str,
) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_cms_namespaces (pipeline_source, ns, created_at, updated_at)
        VALUES ($1, $2, $3, $3)
        ON CONFLICT (ns) DO UPDATE SET updated_at = EXCLUDED.updated_at
        RETURNING id
        "#,
    )
    .bind(pipeline_source)
    .bind(ns)
    .bind(now)
    .fetch_one(db)
    .await
}

pub async fn upsert_config<'e, E: PgExecutor<'e>>(
    db: E,
    ns_id: i64,
    config: &CmsConfig,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_cms_configs (ns_id, key, value, encrypt, config_type, comment,
                                          created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (ns_id, key)
        DO UPDATE SET value = EXCLUDED.value,
                      encrypt = EXCLUDED.encrypt,
                      config_type = EXCLUDED.config_type,
                      comment = EXCLUDED.comment,
                      updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(ns_id)
    .bind(&config.key)
    .bind(&config.value)
    .bind(config.encrypt)
    .bind(config.config_type.as_str())
    .bind(&config.comment)
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Configs of a namespace, all of them when `keys` is empty
pub async fn find_configs<'e, E: PgExecutor<'e>>(
    db: E,
    ns_id: i64,
    keys: &[String],
) -> Result<Vec<CmsConfig>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ConfigRow>(
        r#"
        SELECT key, value, encrypt, config_type, comment, created_at, updated_at
        FROM pipeline_cms_configs
        WHERE ns_id = $1 AND (cardinality($2::VARCHAR[]) = 0 OR key = ANY($2))
        ORDER BY key
        "#,
    )
    .bind(ns_id)
    .bind(keys)
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn delete_configs<'e, E: PgExecutor<'e>>(
    db: E,
    ns_id: i64,
    keys: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipeline_cms_configs WHERE ns_id = $1 AND key = ANY($2)")
        .bind(ns_id)
        .bind(keys)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ConfigRow {
    key: String,
    value: String,
    encrypt: bool,
    config_type: String,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for CmsConfig {
    fn from(row: ConfigRow) -> Self {
        CmsConfig {
            key: row.key,
            value: row.value,
            encrypt: row.encrypt,
            config_type: ConfigType::parse(&row.config_type),
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
