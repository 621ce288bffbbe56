//! Cancel a running pipeline

use erda_core::domain::pipeline::{Pipeline, UserIdentity};
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::Identity;
use erda_core::dto::pipeline::CancelPipelineRequest;
use tracing::{error, info};

use crate::repository::pipeline_repository;
use crate::service::error::{Result, ServiceError};
use crate::service::events::PipelineEvent;
use crate::service::pipeline::PipelineService;

impl PipelineService {
    pub async fn cancel(&self, pipeline_id: i64, req: CancelPipelineRequest) -> Result<()> {
        if req.identity.is_empty() {
            return Err(ServiceError::MissingParameter("identity".to_string()));
        }
        let mut p = self.get_pipeline(pipeline_id).await?;

        if let Some(edge_id) = self.edge.edge_id_of(&p)? {
            self.edge
                .cancel(&p.base.cluster_name, edge_id, &req)
                .await?;
            return self
                .set_mirror_status(&mut p, PipelineStatus::StopByUser)
                .await;
        }

        ensure_cancelable(&p)?;
        self.cancel_local(p, &req.identity).await
    }

    /// Mark a pipeline stopped by the user and ask the engine to stop it
    pub(crate) async fn cancel_local(&self, mut p: Pipeline, identity: &Identity) -> Result<()> {
        p.base.status = PipelineStatus::StopByUser;
        p.extra.cancel_user = identity
            .user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(UserIdentity::new);

        let mut tx = self.pool.begin().await?;
        pipeline_repository::update_status(&mut *tx, p.id(), p.base.status).await?;
        pipeline_repository::update_extra(&mut *tx, p.id(), &p.extra).await?;
        tx.commit().await?;

        info!(
            "Pipeline {} canceled by {}",
            p.id(),
            identity
                .user_id
                .as_deref()
                .or(identity.internal_client.as_deref())
                .unwrap_or("unknown")
        );
        self.cache.clear(p.id());
        self.emit(PipelineEvent::status_changed(p.id(), p.base.status));

        if let Err(e) = self.engine.stop(p.id()).await {
            error!("[alert] failed to stop pipeline {}: {:#}", p.id(), e);
        }
        Ok(())
    }
}

fn ensure_cancelable(p: &Pipeline) -> Result<()> {
    if !p.status().can_cancel() {
        return Err(ServiceError::InvalidState(format!(
            "pipeline {} cannot be canceled in status {}",
            p.id(),
            p.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(status: PipelineStatus) -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = 5;
        p.base.status = status;
        p
    }

    #[test]
    fn test_ended_pipelines_cannot_be_canceled() {
        for status in PipelineStatus::end_statuses() {
            assert!(
                matches!(
                    ensure_cancelable(&pipeline(status)),
                    Err(ServiceError::InvalidState(_))
                ),
                "{status} should not be cancelable"
            );
        }
    }

    #[test]
    fn test_running_pipeline_can_be_canceled() {
        assert!(ensure_cancelable(&pipeline(PipelineStatus::Running)).is_ok());
    }
}
