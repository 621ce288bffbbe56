//! Listing, statistics, deletion and operator requests

use erda_core::domain::pipeline::TaskOperate;
use erda_core::domain::status::PipelineStatus;
use erda_core::domain::task::PipelineTask;
use erda_core::dto::pipeline::{
    OperatePipelineRequest, PagingRequest, PagingResponse, PipelineSummary, QuerySnippetRequest,
    QuerySnippetResponse, StatisticRequest, StatisticResponse,
};
use erda_core::merge::merge_pipeline_yml_tasks;
use erda_core::yml::PipelineYml;
use tracing::{debug, info};

use crate::repository::{pipeline_repository, task_repository};
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

impl PipelineService {
    pub async fn paging(&self, req: PagingRequest) -> Result<PagingResponse> {
        let mut conn = self.pool.acquire().await?;
        let (pipelines, total) = pipeline_repository::paging(&mut conn, &req).await?;

        debug!("Paged {} of {} pipeline(s)", pipelines.len(), total);
        Ok(PagingResponse {
            total,
            page_no: req.page_no(),
            page_size: req.page_size(),
            pipelines: pipelines.iter().map(PipelineSummary::from).collect(),
        })
    }

    pub async fn statistic(&self, req: StatisticRequest) -> Result<StatisticResponse> {
        let counts = pipeline_repository::count_by_status(
            &self.pool,
            req.source.as_deref(),
            req.cluster_name.as_deref(),
        )
        .await?;
        Ok(statistic_from_counts(&counts))
    }

    /// Delete a pipeline that is not running and whose resources are gone
    pub async fn delete(&self, pipeline_id: i64) -> Result<()> {
        let p = self.get_pipeline(pipeline_id).await?;
        p.can_delete().map_err(|reason| {
            ServiceError::InvalidState(format!("pipeline {pipeline_id} cannot be deleted: {reason}"))
        })?;

        if !pipeline_repository::delete(&self.pool, pipeline_id).await? {
            return Err(ServiceError::not_found(format!("pipeline {pipeline_id}")));
        }
        self.cache.clear(pipeline_id);

        info!("Pipeline deleted: {}", pipeline_id);
        Ok(())
    }

    /// Queue disable/pause requests against tasks that have not been created
    pub async fn operate(&self, pipeline_id: i64, req: OperatePipelineRequest) -> Result<()> {
        if req.task_operates.is_empty() {
            return Err(ServiceError::MissingParameter("taskOperates".to_string()));
        }
        let mut p = self.get_pipeline(pipeline_id).await?;
        let scope = self.cache.scope(pipeline_id);
        let yml = scope.get_or_set_pipeline_yml(&p)?;
        let db_tasks = task_repository::find_by_pipeline(&self.pool, pipeline_id).await?;
        check_task_operates(pipeline_id, &yml, &db_tasks, &req.task_operates)?;

        p.extra.task_operates.extend(req.task_operates);

        // apply once to reject operations the tasks cannot take
        let stages = scope.get_or_set_stages(&self.pool, pipeline_id).await?;
        merge_pipeline_yml_tasks(&yml, &[], &p, &stages, None, &self.calculator)?;

        pipeline_repository::update_extra(&self.pool, pipeline_id, &p.extra).await?;
        info!(
            "Pipeline {} now has {} task operation(s)",
            pipeline_id,
            p.extra.task_operates.len()
        );
        Ok(())
    }

    /// Params and outputs a yml declares, used to embed it as a snippet
    pub fn query_snippet_yml(&self, req: &QuerySnippetRequest) -> Result<QuerySnippetResponse> {
        if req.pipeline_yml.trim().is_empty() {
            return Err(ServiceError::MissingParameter("pipelineYml".to_string()));
        }
        let yml = PipelineYml::parse(&req.pipeline_yml)?;
        Ok(QuerySnippetResponse {
            params: yml.params,
            outputs: yml.outputs,
        })
    }
}

/// Every operation must name a yml action whose task is not created yet;
/// created tasks belong to the reconciler and would ignore the operation
fn check_task_operates(
    pipeline_id: i64,
    yml: &PipelineYml,
    db_tasks: &[PipelineTask],
    ops: &[TaskOperate],
) -> Result<()> {
    for op in ops {
        if !yml.actions().any(|(_, a)| a.alias == op.task_alias) {
            return Err(ServiceError::InvalidParameter(format!(
                "task {} not found in pipeline {}",
                op.task_alias, pipeline_id
            )));
        }
        if let Some(task) = db_tasks.iter().find(|t| t.name == op.task_alias) {
            return Err(ServiceError::InvalidState(format!(
                "task {} of pipeline {} is already created (status {})",
                op.task_alias, pipeline_id, task.status
            )));
        }
    }
    Ok(())
}

/// Fold per-status counts into the four buckets
fn statistic_from_counts(counts: &[(String, i64)]) -> StatisticResponse {
    let mut stat = StatisticResponse::default();
    for (status, count) in counts {
        let status = PipelineStatus::parse(status);
        if status.is_success() {
            stat.success += count;
        }
        if status.is_reconciler_running() {
            stat.processing += count;
        }
        if status.is_failed() {
            stat.failed += count;
        }
        if status.is_end() {
            stat.completed += count;
        }
    }
    stat
}
