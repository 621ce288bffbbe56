//! Rerun and rerun-failed
//!
//! Both create a new pipeline from the yml and labels of an ended one. A
//! rerun-failed pipeline additionally inherits the tasks that succeeded in
//! its origin.

use erda_core::domain::pipeline::{Pipeline, PipelineType, RerunFailedDetail, TriggerMode};
use erda_core::dto::Identity;
use erda_core::dto::pipeline::{CreatePipelineRequestV2, PipelineSummary, RerunPipelineRequest};
use erda_core::labels::{
    LABEL_PIPELINE_CRON_ID, LABEL_PIPELINE_CRON_TRIGGER_TIME, LABEL_PIPELINE_TRIGGER_MODE,
    LABEL_PIPELINE_TYPE,
};
use erda_core::view::can_rerun_failed;
use std::collections::BTreeMap;

use crate::repository::task_repository;
use crate::service::create::validate_create_request;
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

impl PipelineService {
    pub async fn rerun(&self, pipeline_id: i64, req: RerunPipelineRequest) -> Result<PipelineSummary> {
        let origin = self.get_pipeline(pipeline_id).await?;
        if let Some(edge_id) = self.edge.edge_id_of(&origin)? {
            let edge = self
                .edge
                .rerun(&origin.base.cluster_name, edge_id, &req)
                .await?;
            let create = rerun_request(&origin, PipelineType::Rerun, req);
            return self.record_edge_pipeline(&create, edge).await;
        }

        if !origin.status().is_end() {
            return Err(ServiceError::InvalidState(format!(
                "pipeline {} cannot be rerun in status {}",
                pipeline_id,
                origin.status()
            )));
        }

        let mut create = rerun_request(&origin, PipelineType::Rerun, req);
        validate_create_request(&mut create)?;
        let p = self.create_local(create, None).await?;

        tracing::info!("Pipeline {} rerun as {}", pipeline_id, p.id());
        Ok(PipelineSummary::from(&p))
    }

    pub async fn rerun_failed(
        &self,
        pipeline_id: i64,
        req: RerunPipelineRequest,
    ) -> Result<PipelineSummary> {
        let origin = self.get_pipeline(pipeline_id).await?;
        if let Some(edge_id) = self.edge.edge_id_of(&origin)? {
            let edge = self
                .edge
                .rerun_failed(&origin.base.cluster_name, edge_id, &req)
                .await?;
            let create = rerun_request(&origin, PipelineType::RerunFailed, req);
            return self.record_edge_pipeline(&create, edge).await;
        }

        if !can_rerun_failed(&origin) {
            return Err(ServiceError::InvalidState(format!(
                "pipeline {} cannot be rerun from its failed tasks (status {}, gc'd {})",
                pipeline_id,
                origin.status(),
                origin.extra.complete_reconciler_gc
            )));
        }

        let success_tasks: BTreeMap<String, i64> =
            task_repository::find_by_pipeline(&self.pool, pipeline_id)
                .await?
                .into_iter()
                .filter(|t| t.status.is_success())
                .map(|t| (t.name, t.id))
                .collect();
        let detail = RerunFailedDetail {
            origin_pipeline_id: pipeline_id,
            success_tasks,
        };

        let mut create = rerun_request(&origin, PipelineType::RerunFailed, req);
        validate_create_request(&mut create)?;
        let p = self.create_local(create, Some(detail)).await?;

        tracing::info!(
            "Pipeline {} rerun from its failed tasks as {}",
            pipeline_id,
            p.id()
        );
        Ok(PipelineSummary::from(&p))
    }
}

/// Create request reproducing `origin` as a manual pipeline of `pipeline_type`
fn rerun_request(
    origin: &Pipeline,
    pipeline_type: PipelineType,
    req: RerunPipelineRequest,
) -> CreatePipelineRequestV2 {
    let mut labels = origin.extra.labels.clone();
    let mut normal_labels = origin.extra.normal_labels.clone();
    for key in [LABEL_PIPELINE_CRON_ID, LABEL_PIPELINE_CRON_TRIGGER_TIME] {
        labels.remove(key);
        normal_labels.remove(key);
    }
    normal_labels.remove(LABEL_PIPELINE_TYPE);
    normal_labels.remove(LABEL_PIPELINE_TRIGGER_MODE);
    labels.insert(LABEL_PIPELINE_TYPE.to_string(), pipeline_type.as_str().to_string());
    labels.insert(
        LABEL_PIPELINE_TRIGGER_MODE.to_string(),
        TriggerMode::Manual.as_str().to_string(),
    );

    let identity = req.identity.or(Identity {
        user_id: origin.extra.submit_user.as_ref().map(|u| u.id.clone()),
        internal_client: origin.extra.internal_client.clone(),
    });

    CreatePipelineRequestV2 {
        pipeline_yml: origin.extra.pipeline_yml.clone(),
        pipeline_yml_name: origin.base.yml_name.clone(),
        pipeline_source: origin.base.source.clone(),
        cluster_name: origin.base.cluster_name.clone(),
        namespace: Some(origin.extra.namespace.clone()).filter(|ns| !ns.is_empty()),
        labels,
        normal_labels,
        envs: origin.extra.snapshot.envs.clone(),
        run_params: origin.extra.snapshot.run_params.clone(),
        auto_run_at_once: req.auto_run_at_once,
        config_manage_namespaces: origin.extra.config_manage_namespaces.clone(),
        secrets: origin.extra.incoming_secrets.clone(),
        gc: Some(origin.extra.gc.clone()),
        identity,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erda_core::domain::pipeline::UserIdentity;
    use erda_core::domain::status::PipelineStatus;

    fn origin() -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = 9;
        p.base.source = "dice".into();
        p.base.yml_name = "ci.yml".into();
        p.base.cluster_name = "terminus-dev".into();
        p.base.status = PipelineStatus::Failed;
        p.base.trigger_mode = TriggerMode::Cron;
        p.extra.pipeline_yml = "version: \"1.1\"\nstages: []\n".into();
        p.extra.labels.insert("branch".into(), "master".into());
        p.extra.labels.insert(LABEL_PIPELINE_CRON_ID.into(), "3".into());
        p.extra
            .labels
            .insert(LABEL_PIPELINE_TRIGGER_MODE.into(), "cron".into());
        p.extra.submit_user = Some(UserIdentity::new("1"));
        p
    }

    #[test]
    fn test_rerun_request_is_manual_and_typed() {
        let req = rerun_request(
            &origin(),
            PipelineType::RerunFailed,
            RerunPipelineRequest {
                auto_run_at_once: true,
                identity: Identity::default(),
            },
        );

        assert_eq!(req.pipeline_yml_name, "ci.yml");
        assert_eq!(req.labels["branch"], "master");
        assert_eq!(req.labels[LABEL_PIPELINE_TYPE], "rerun-failed");
        assert_eq!(req.labels[LABEL_PIPELINE_TRIGGER_MODE], "manual");
        assert!(!req.labels.contains_key(LABEL_PIPELINE_CRON_ID));
        assert!(req.auto_run_at_once);
        assert_eq!(req.namespace, None);
    }

    #[test]
    fn test_rerun_request_identity_falls_back_to_submitter() {
        let req = rerun_request(&origin(), PipelineType::Rerun, RerunPipelineRequest::default());
        assert_eq!(req.identity.user_id.as_deref(), Some("1"));

        let caller = RerunPipelineRequest {
            auto_run_at_once: false,
            identity: Identity {
                user_id: Some("2".into()),
                internal_client: None,
            },
        };
        let req = rerun_request(&origin(), PipelineType::Rerun, caller);
        assert_eq!(req.identity.user_id.as_deref(), Some("2"));
    }
}
