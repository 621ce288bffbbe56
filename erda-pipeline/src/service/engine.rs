//! Reconciler engine seam
//!
//! The reconciler that actually executes pipelines lives outside this
//! service. Run and cancel hand pipelines over through [`Engine`].

use async_trait::async_trait;
use sqlx::PgPool;

use crate::repository::dispatch_repository;

#[async_trait]
pub trait Engine: Send + Sync {
    /// Hand a `Born` pipeline over for execution
    async fn distribute(&self, pipeline_id: i64) -> anyhow::Result<()>;

    /// Ask the reconciler to stop a pipeline
    async fn stop(&self, pipeline_id: i64) -> anyhow::Result<()>;
}

/// Writes commands to the `pipeline_dispatches` outbox polled by the reconciler
pub struct OutboxEngine {
    pool: PgPool,
}

impl OutboxEngine {
    pub const ACTION_DISTRIBUTE: &'static str = "distribute";
    pub const ACTION_STOP: &'static str = "stop";

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Engine for OutboxEngine {
    async fn distribute(&self, pipeline_id: i64) -> anyhow::Result<()> {
        let id = dispatch_repository::insert(&self.pool, pipeline_id, Self::ACTION_DISTRIBUTE).await?;
        tracing::debug!("queued distribute of pipeline {} (dispatch {})", pipeline_id, id);
        Ok(())
    }

    async fn stop(&self, pipeline_id: i64) -> anyhow::Result<()> {
        let id = dispatch_repository::insert(&self.pool, pipeline_id, Self::ACTION_STOP).await?;
        tracing::debug!("queued stop of pipeline {} (dispatch {})", pipeline_id, id);
        Ok(())
    }
}
