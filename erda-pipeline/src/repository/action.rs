//! Action Repository

use erda_core::domain::action::ActionDefinition;
use sqlx::PgExecutor;

/// Find an action definition. Without a version the default one is returned.
pub async fn find<'e, E: PgExecutor<'e>>(
    db: E,
    action_type: &str,
    version: Option<&str>,
) -> Result<Option<ActionDefinition>, sqlx::Error> {
    let row = sqlx::query_as::<_, ActionRow>(
        r#"
        SELECT action_type, version, job, spec
        FROM pipeline_actions
        WHERE action_type = $1
          AND (($2::VARCHAR IS NULL AND is_default) OR version = $2)
        LIMIT 1
        "#,
    )
    .bind(action_type)
    .bind(version)
    .fetch_optional(db)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn upsert<'e, E: PgExecutor<'e>>(
    db: E,
    def: &ActionDefinition,
    is_default: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_actions (action_type, version, is_default, job, spec)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (action_type, version)
        DO UPDATE SET is_default = EXCLUDED.is_default, job = EXCLUDED.job, spec = EXCLUDED.spec
        "#,
    )
    .bind(&def.action_type)
    .bind(&def.version)
    .bind(is_default)
    .bind(sqlx::types::Json(&def.job))
    .bind(sqlx::types::Json(&def.spec))
    .execute(db)
    .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ActionRow {
    action_type: String,
    version: String,
    job: serde_json::Value,
    spec: serde_json::Value,
}

impl From<ActionRow> for ActionDefinition {
    fn from(row: ActionRow) -> Self {
        ActionDefinition {
            action_type: row.action_type,
            version: row.version,
            job: serde_json::from_value(row.job).unwrap_or_default(),
            spec: serde_json::from_value(row.spec).unwrap_or_default(),
        }
    }
}
