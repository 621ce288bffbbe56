//! Run a pipeline
//!
//! Starting a pipeline snapshots its secrets, params and run user, moves it
//! to `Born`, materializes its tasks and hands it to the engine.

use erda_core::domain::pipeline::{Pipeline, PipelineType, RunParam, UserIdentity};
use erda_core::domain::status::PipelineStatus;
use erda_core::domain::task::PipelineTask;
use erda_core::dto::pipeline::RunPipelineRequest;
use erda_core::merge::{inherit_success_task, merge_pipeline_yml_tasks};
use erda_core::view::can_manual_run;
use erda_core::yml::PipelineParam;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::repository::{pipeline_repository, task_repository};
use crate::service::cache::CacheScope;
use crate::service::error::{Result, ServiceError};
use crate::service::events::PipelineEvent;
use crate::service::pipeline::PipelineService;
use crate::service::secret::{merge_run_secrets, platform_secrets};

impl PipelineService {
    /// Run a persisted pipeline, on its edge cluster when it lives on one
    pub async fn run(&self, pipeline_id: i64, req: RunPipelineRequest) -> Result<Pipeline> {
        if req.identity.is_empty() {
            return Err(ServiceError::MissingParameter("identity".to_string()));
        }
        let mut p = self.get_pipeline(pipeline_id).await?;

        if let Some(edge_id) = self.edge.edge_id_of(&p)? {
            self.edge.run(&p.base.cluster_name, edge_id, &req).await?;
            self.set_mirror_status(&mut p, PipelineStatus::Born).await?;
            return Ok(p);
        }

        let scope = self.cache.scope(pipeline_id);
        self.run_one_pipeline(&scope, &mut p, req).await?;
        Ok(p)
    }

    pub(crate) async fn run_one_pipeline(
        &self,
        scope: &CacheScope,
        p: &mut Pipeline,
        req: RunPipelineRequest,
    ) -> Result<()> {
        let origin = self.rerun_failed_origin(p).await?;
        can_manual_run(p, origin.as_ref()).map_err(ServiceError::InvalidState)?;

        let yml = scope.get_or_set_pipeline_yml(p)?;
        let run_params = if req.run_params.is_empty() {
            p.extra.snapshot.run_params.clone()
        } else {
            req.run_params.clone()
        };
        check_run_params(&yml.params, &run_params)?;

        self.check_running_siblings(p, &req).await?;

        // secrets
        let mut namespaces = p.extra.config_manage_namespaces.clone();
        for ns in &req.config_manage_namespaces {
            if !namespaces.contains(ns) {
                namespaces.push(ns.clone());
            }
        }
        let namespace_secrets = self.cms.fetch_secrets(&namespaces).await?;
        let mut incoming = p.extra.incoming_secrets.clone();
        incoming.extend(req.secrets.clone());
        let run_user_id = req.identity.user_id.as_deref().filter(|u| !u.is_empty());
        let secrets = merge_run_secrets(
            namespace_secrets,
            &incoming,
            platform_secrets(p, run_user_id),
        );

        // snapshot
        p.extra.snapshot.secrets = secrets.secrets;
        p.extra.snapshot.platform_secrets = secrets.platform_secrets;
        p.extra.snapshot.run_params = run_params;
        p.extra.config_manage_namespaces = namespaces;
        p.extra.run_user = run_user_id.map(UserIdentity::new);
        if let Some(client) = req.identity.internal_client.clone() {
            p.extra.internal_client = Some(client);
        }
        let observed = p.base.status;
        p.base.status = PipelineStatus::Born;

        let tasks = self.materialize_tasks(scope, p).await?;

        let mut tx = self.pool.begin().await?;
        if !pipeline_repository::transition_status(&mut *tx, p.id(), observed, p.base.status).await?
        {
            tx.rollback().await?;
            p.base.status = observed;
            return Err(ServiceError::InvalidState(format!(
                "pipeline {} is no longer {}, it was started concurrently",
                p.id(),
                observed
            )));
        }
        pipeline_repository::update_extra(&mut *tx, p.id(), &p.extra).await?;
        let mut created = 0;
        for mut task in tasks {
            if task.id > 0 {
                continue;
            }
            task_repository::insert(&mut *tx, &mut task).await?;
            created += 1;
        }
        tx.commit().await?;

        info!(
            "Pipeline {} started by {}, {} task(s) created",
            p.id(),
            run_user_id
                .or(req.identity.internal_client.as_deref())
                .unwrap_or("unknown"),
            created
        );
        self.emit(PipelineEvent::status_changed(p.id(), p.base.status));

        if let Err(e) = self.engine.distribute(p.id()).await {
            error!("[alert] failed to distribute pipeline {}: {:#}", p.id(), e);
        }
        Ok(())
    }

    /// Merge yml and persisted tasks, inheriting the successes of the origin
    /// of a rerun-failed pipeline
    async fn materialize_tasks(
        &self,
        scope: &CacheScope,
        p: &Pipeline,
    ) -> Result<Vec<PipelineTask>> {
        let yml = scope.get_or_set_pipeline_yml(p)?;
        let stages = scope.get_or_set_stages(&self.pool, p.id()).await?;
        let passed = match scope.get_passed_data(p.id()) {
            Some(passed) => passed,
            None => {
                let passed = self.registry.search_actions(&yml.action_keys()).await?;
                scope.set_passed_data(p.id(), passed.clone());
                Arc::new(passed)
            }
        };

        let db_tasks = task_repository::find_by_pipeline(&self.pool, p.id()).await?;
        let tasks = merge_pipeline_yml_tasks(
            &yml,
            &db_tasks,
            p,
            &stages,
            Some(passed.as_ref()),
            &self.calculator,
        )?;

        let success = scope.get_or_set_rerun_success_tasks(&self.pool, p).await?;
        let tasks = tasks
            .into_iter()
            .map(|task| {
                if task.id > 0 {
                    return task;
                }
                let mut task = inherit_success_task(&task, &success).unwrap_or(task);
                if task.extra.uuid.is_empty() {
                    task.extra.uuid = Uuid::new_v4().to_string();
                }
                task
            })
            .collect::<Vec<_>>();

        debug!(
            "materialized {} task(s) of pipeline {}",
            tasks.len(),
            p.id()
        );
        Ok(tasks)
    }

    /// Enforce one running pipeline per `(source, yml_name)`
    async fn check_running_siblings(&self, p: &Pipeline, req: &RunPipelineRequest) -> Result<()> {
        if p.extra
            .queue
            .as_ref()
            .is_some_and(|q| q.skips_running_limit())
        {
            return Ok(());
        }

        let running: Vec<Pipeline> = pipeline_repository::find_running_by_source_and_yml(
            &self.pool,
            &p.base.source,
            &p.base.yml_name,
        )
        .await?
        .into_iter()
        .filter(|other| other.id() != p.id())
        .collect();
        if running.is_empty() {
            return Ok(());
        }

        if !req.force_run {
            let ids: Vec<String> = running.iter().map(|r| r.id().to_string()).collect();
            return Err(ServiceError::InvalidState(format!(
                "already running pipeline(s) of {}/{}: {}",
                p.base.source,
                p.base.yml_name,
                ids.join(",")
            )));
        }

        for sibling in running {
            info!(
                "Force run of pipeline {} stops running pipeline {}",
                p.id(),
                sibling.id()
            );
            self.cancel_local(sibling, &req.identity).await?;
        }
        Ok(())
    }

    pub(crate) async fn rerun_failed_origin(&self, p: &Pipeline) -> Result<Option<Pipeline>> {
        if p.base.pipeline_type != PipelineType::RerunFailed {
            return Ok(None);
        }
        let Some(detail) = p.extra.rerun_failed_detail.as_ref() else {
            return Ok(None);
        };
        Ok(pipeline_repository::find_by_id(&self.pool, detail.origin_pipeline_id).await?)
    }
}

/// Every required param without a default needs a value
fn check_run_params(params: &[PipelineParam], run_params: &[RunParam]) -> Result<()> {
    for param in params.iter().filter(|p| p.required && p.default.is_none()) {
        let given = run_params
            .iter()
            .find(|r| r.name == param.name)
            .is_some_and(|r| !r.value.is_null());
        if !given {
            return Err(ServiceError::InvalidParameter(format!(
                "run param {} is required",
                param.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(name: &str, required: bool, default: Option<serde_json::Value>) -> PipelineParam {
        PipelineParam {
            name: name.into(),
            required,
            default,
            desc: None,
            param_type: None,
        }
    }

    #[test]
    fn test_required_param_missing() {
        let params = [param("version", true, None)];
        assert!(matches!(
            check_run_params(&params, &[]),
            Err(ServiceError::InvalidParameter(_))
        ));

        let null = [RunParam {
            name: "version".into(),
            value: serde_json::Value::Null,
        }];
        assert!(check_run_params(&params, &null).is_err());
    }

    #[test]
    fn test_required_param_given_or_defaulted() {
        let params = [
            param("version", true, None),
            param("env", true, Some(json!("dev"))),
            param("debug", false, None),
        ];
        let run = [RunParam {
            name: "version".into(),
            value: json!("1.0"),
        }];
        assert!(check_run_params(&params, &run).is_ok());
    }
}

#[cfg(all(test, feature = "db-tests"))]
mod db_tests {
    use super::*;
    use sqlx::PgPool;

    use crate::service::edge::EdgeProxy;
    use crate::service::testing::{EMPTY_YML, create_request, identity, service};

    fn run_request() -> RunPipelineRequest {
        RunPipelineRequest {
            identity: identity(),
            ..Default::default()
        }
    }

    #[sqlx::test(migrations = false)]
    async fn test_concurrent_runs_start_the_pipeline_once(pool: PgPool) {
        let (svc, engine) = service(pool, EdgeProxy::disabled()).await;
        let created = svc
            .create_v2(create_request("dice", "terminus-dev", EMPTY_YML))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            svc.run(created.id, run_request()),
            svc.run(created.id, run_request())
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(ServiceError::InvalidState(_))))
        );
        assert_eq!(engine.distributed(), 1);
        assert_eq!(
            svc.get_pipeline(created.id).await.unwrap().status(),
            PipelineStatus::Born
        );
    }

    #[sqlx::test(migrations = false)]
    async fn test_started_pipeline_cannot_run_again(pool: PgPool) {
        let (svc, engine) = service(pool, EdgeProxy::disabled()).await;
        let created = svc
            .create_v2(create_request("dice", "terminus-dev", EMPTY_YML))
            .await
            .unwrap();

        let p = svc.run(created.id, run_request()).await.unwrap();
        assert_eq!(p.status(), PipelineStatus::Born);
        assert_eq!(p.extra.run_user.as_ref().map(|u| u.id.as_str()), Some("1"));

        assert!(matches!(
            svc.run(created.id, run_request()).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert_eq!(engine.distributed(), 1);
    }
}
