use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Pipeline identity and status columns
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_bases (
            id BIGSERIAL PRIMARY KEY,
            source VARCHAR(191) NOT NULL,
            yml_name VARCHAR(191) NOT NULL,
            cluster_name VARCHAR(191) NOT NULL,
            status VARCHAR(32) NOT NULL,
            pipeline_type VARCHAR(32) NOT NULL,
            trigger_mode VARCHAR(32) NOT NULL,
            cron_id BIGINT,
            is_snippet BOOLEAN NOT NULL DEFAULT FALSE,
            parent_pipeline_id BIGINT,
            parent_task_id BIGINT,
            is_edge BOOLEAN NOT NULL DEFAULT FALSE,
            cost_time_sec BIGINT,
            progress SMALLINT,
            time_begin TIMESTAMPTZ,
            time_end TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Everything else about a pipeline
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_extras (
            pipeline_id BIGINT PRIMARY KEY REFERENCES pipeline_bases(id) ON DELETE CASCADE,
            extra JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_stages (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipeline_bases(id) ON DELETE CASCADE,
            name VARCHAR(191) NOT NULL DEFAULT '',
            status VARCHAR(32) NOT NULL,
            stage_order INTEGER NOT NULL,
            cost_time_sec BIGINT,
            time_begin TIMESTAMPTZ,
            time_end TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_tasks (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL REFERENCES pipeline_bases(id) ON DELETE CASCADE,
            stage_id BIGINT NOT NULL REFERENCES pipeline_stages(id) ON DELETE CASCADE,
            name VARCHAR(191) NOT NULL,
            task_type VARCHAR(191) NOT NULL,
            executor_kind VARCHAR(32) NOT NULL,
            status VARCHAR(32) NOT NULL,
            is_snippet BOOLEAN NOT NULL DEFAULT FALSE,
            snippet_pipeline_id BIGINT,
            extra JSONB NOT NULL DEFAULT '{}',
            result JSONB,
            inspect JSONB NOT NULL DEFAULT '{}',
            cost_time_sec BIGINT,
            time_begin TIMESTAMPTZ,
            time_end TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (pipeline_id, stage_id, task_type, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_archives (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL,
            source VARCHAR(191) NOT NULL,
            yml_name VARCHAR(191) NOT NULL,
            status VARCHAR(32) NOT NULL,
            content JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_crons (
            id BIGSERIAL PRIMARY KEY,
            source VARCHAR(191) NOT NULL,
            yml_name VARCHAR(191) NOT NULL,
            cluster_name VARCHAR(191) NOT NULL,
            cron_expr VARCHAR(191) NOT NULL,
            enable BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (source, yml_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Action registry: job definitions and specs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_actions (
            action_type VARCHAR(191) NOT NULL,
            version VARCHAR(64) NOT NULL,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            job JSONB NOT NULL DEFAULT '{}',
            spec JSONB NOT NULL DEFAULT '{}',
            PRIMARY KEY (action_type, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_cms_namespaces (
            id BIGSERIAL PRIMARY KEY,
            pipeline_source VARCHAR(191) NOT NULL,
            ns VARCHAR(191) NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_cms_configs (
            id BIGSERIAL PRIMARY KEY,
            ns_id BIGINT NOT NULL REFERENCES pipeline_cms_namespaces(id) ON DELETE CASCADE,
            key VARCHAR(191) NOT NULL,
            value TEXT NOT NULL,
            encrypt BOOLEAN NOT NULL DEFAULT FALSE,
            config_type VARCHAR(32) NOT NULL DEFAULT 'kv',
            comment TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (ns_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Outbox consumed by the reconciler
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_dispatches (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT NOT NULL,
            action VARCHAR(32) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            consumed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the running-sibling check, paging and GC
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_bases_source_yml ON pipeline_bases(source, yml_name, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_bases_status_updated ON pipeline_bases(status, updated_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_stages_pipeline ON pipeline_stages(pipeline_id, stage_order)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_tasks_pipeline ON pipeline_tasks(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_dispatches_pending ON pipeline_dispatches(consumed_at, id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
