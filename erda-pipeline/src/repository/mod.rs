//! Repository Module
//!
//! Data access layer for the pipeline service.
//! Each repository handles database operations for a specific domain entity.
//! Functions accept any Postgres executor so they run on the pool or inside a
//! transaction alike.

pub mod action;
pub mod archive;
pub mod cms;
pub mod cron;
pub mod dispatch;
pub mod pipeline;
pub mod stage;
pub mod task;

// Re-export for convenience
pub use action as action_repository;
pub use archive as archive_repository;
pub use cms as cms_repository;
pub use cron as cron_repository;
pub use dispatch as dispatch_repository;
pub use pipeline as pipeline_repository;
pub use stage as stage_repository;
pub use task as task_repository;

/// Decode a JSON column, failing the query instead of defaulting so a
/// later write cannot overwrite stored data with empty values
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: serde_json::Value,
) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
