//! Pipeline Graph Builder
//!
//! Persists a pipeline, the cron its yml declares and one stage per yml
//! stage in a single transaction.
//! Tasks are not created here; they are materialized when the pipeline runs.

use erda_core::domain::action::PassedDataWhenCreate;
use erda_core::domain::pipeline::{Pipeline, TriggerMode};
use erda_core::domain::stage::PipelineStage;
use erda_core::merge::stage_task_resources;
use erda_core::resource::pipeline_resources;
use erda_core::yml::PipelineYml;
use sqlx::PgConnection;

use crate::repository::{cron_repository, pipeline_repository, stage_repository};
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

impl PipelineService {
    /// Create the pipeline, its yml cron and its stages, returning the stages
    /// in yml order. Nothing is persisted when any step fails.
    pub async fn create_pipeline_graph(
        &self,
        p: &mut Pipeline,
        yml: &PipelineYml,
        passed: &PassedDataWhenCreate,
    ) -> Result<Vec<PipelineStage>> {
        p.ensure_gc(&self.gc_defaults);
        let cron_id = p.base.cron_id;

        let mut tx = self.pool.begin().await?;
        let stages = match self.write_graph(&mut *tx, p, yml, passed).await {
            Ok(stages) => stages,
            Err(e) => {
                tx.rollback().await?;
                p.base.id = 0;
                p.base.cron_id = cron_id;
                return Err(graph_error(&p.base.source, e));
            }
        };
        tx.commit()
            .await
            .map_err(|e| graph_error(&p.base.source, e.into()))?;

        tracing::debug!(
            "created graph of pipeline {} with {} stage(s)",
            p.id(),
            stages.len()
        );
        Ok(stages)
    }

    async fn write_graph(
        &self,
        conn: &mut PgConnection,
        p: &mut Pipeline,
        yml: &PipelineYml,
        passed: &PassedDataWhenCreate,
    ) -> Result<Vec<PipelineStage>> {
        ensure_ancestors_not_ended(conn, p).await?;

        // a manual pipeline declaring a cron registers it
        if p.base.cron_id.is_none()
            && p.base.trigger_mode == TriggerMode::Manual
            && let Some(expr) = yml.cron.as_deref().filter(|e| !e.trim().is_empty())
        {
            let cron = cron_repository::upsert(
                &mut *conn,
                &p.base.source,
                &p.base.yml_name,
                &p.base.cluster_name,
                expr,
            )
            .await?;
            p.base.cron_id = Some(cron.id);
        }

        pipeline_repository::insert(&mut *conn, p).await?;

        let mut stages = Vec::with_capacity(yml.stages.len());
        for order in 0..yml.stages.len() {
            let mut stage = PipelineStage::analyzed(p.id(), order as i32);
            stage_repository::insert(&mut *conn, &mut stage).await?;
            stages.push(stage);
        }

        let grouped = stage_task_resources(yml, Some(passed), &self.calculator);
        p.extra.snapshot.applied_resources = Some(pipeline_resources(&grouped));
        pipeline_repository::update_extra(&mut *conn, p.id(), &p.extra).await?;

        Ok(stages)
    }
}

/// Database failures surface as a generic graph error; the detail is logged
fn graph_error(source: &str, err: ServiceError) -> ServiceError {
    match err {
        ServiceError::Database(e) => {
            tracing::error!("failed to persist pipeline graph of {}: {:?}", source, e);
            ServiceError::CreatePipelineGraph("failed to persist pipeline graph".to_string())
        }
        other => other,
    }
}

/// A snippet pipeline cannot be created under an ancestor that already ended
async fn ensure_ancestors_not_ended(conn: &mut PgConnection, p: &Pipeline) -> Result<()> {
    if p.extra.snippet_chain.is_empty() {
        return Ok(());
    }
    let ancestors = pipeline_repository::find_by_ids(&mut *conn, &p.extra.snippet_chain).await?;
    if let Some(ended) = ancestors.iter().find(|a| a.status().is_end()) {
        return Err(ServiceError::InvalidState(format!(
            "parent pipeline {} was end status",
            ended.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_are_not_exposed() {
        let err = graph_error(
            "dice",
            ServiceError::Database(sqlx::Error::Protocol(
                "relation \"pipeline_stages\" does not exist".into(),
            )),
        );
        match err {
            ServiceError::CreatePipelineGraph(msg) => assert!(!msg.contains("pipeline_stages")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validation_errors_keep_their_kind() {
        let err = graph_error(
            "dice",
            ServiceError::InvalidState("parent pipeline 3 was end status".into()),
        );
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}
