//! Pipeline and task views

use erda_core::domain::cron::PipelineCron;
use erda_core::domain::pipeline::Pipeline;
use erda_core::domain::stage::PipelineStage;
use erda_core::domain::task::PipelineTask;
use erda_core::dto::pipeline::{PipelineDetail, PipelineSummary, StageDetail, TaskDetail};
use erda_core::merge::merge_pipeline_yml_tasks;
use erda_core::view::{
    buttons, can_manual_run, display_task_status, find_running_stage_id, params_with_value,
    polish_task,
};
use tracing::{debug, error};

use crate::repository::{cron_repository, task_repository};
use crate::service::error::{Result, ServiceError};
use crate::service::pipeline::PipelineService;

const MANUAL_REVIEW_ACTION: &str = "manual-review";

impl PipelineService {
    /// Full view of a pipeline: stages with merged tasks, buttons, cron and
    /// run params. Secrets are never part of the view.
    pub async fn detail(&self, pipeline_id: i64) -> Result<PipelineDetail> {
        let p = self.get_pipeline(pipeline_id).await?;
        let scope = self.cache.scope(pipeline_id);

        let yml = scope.get_or_set_pipeline_yml(&p)?;
        let stages = scope.get_or_set_stages(&self.pool, pipeline_id).await?;
        let db_tasks = task_repository::find_by_pipeline(&self.pool, pipeline_id).await?;
        let mut tasks =
            merge_pipeline_yml_tasks(&yml, &db_tasks, &p, &stages, None, &self.calculator)?;

        let running_stage_id = find_running_stage_id(&p, &tasks);
        for task in &mut tasks {
            if polish_task(&p, task, running_stage_id) && task.id > 0 {
                if let Err(e) =
                    task_repository::update_status(&self.pool, task.id, task.status).await
                {
                    error!(
                        "[alert] failed to polish status of task {} (pipeline {}): {}",
                        task.id, pipeline_id, e
                    );
                }
            }
            task.status = display_task_status(&p, task);
        }

        let cron = self.find_cron(&p).await?;
        let origin = self.rerun_failed_origin(&p).await?;
        let manual_run = can_manual_run(&p, origin.as_ref()).is_ok();

        debug!(
            "Detail of pipeline {}: {} stage(s), {} task(s)",
            pipeline_id,
            stages.len(),
            tasks.len()
        );

        Ok(PipelineDetail {
            summary: PipelineSummary::from(&p),
            namespace: p.extra.namespace.clone(),
            yml_content: p.extra.pipeline_yml.clone(),
            stages: group_by_stage(&stages, tasks),
            buttons: buttons(&p, cron.as_ref(), manual_run),
            cron,
            run_params: params_with_value(&yml.params, &p.extra.snapshot.run_params),
            defined_outputs: p.extra.snapshot.defined_outputs.clone(),
            applied_resources: p.extra.snapshot.applied_resources,
            need_approval: yml
                .actions()
                .any(|(_, a)| a.action_type == MANUAL_REVIEW_ACTION),
            show_message: p.extra.show_message.as_ref().map(|m| m.msg.clone()),
        })
    }

    pub async fn task_detail(&self, pipeline_id: i64, task_id: i64) -> Result<TaskDetail> {
        let p = self.get_pipeline(pipeline_id).await?;
        let mut task = task_repository::find_by_id(&self.pool, task_id)
            .await?
            .filter(|t| t.pipeline_id == pipeline_id)
            .ok_or_else(|| {
                ServiceError::not_found(format!("task {task_id} of pipeline {pipeline_id}"))
            })?;

        task.status = display_task_status(&p, &task);
        Ok(TaskDetail::from(task))
    }

    async fn find_cron(&self, p: &Pipeline) -> Result<Option<PipelineCron>> {
        let cron = match p.base.cron_id {
            Some(cron_id) => cron_repository::find_by_id(&self.pool, cron_id).await?,
            None => {
                cron_repository::find_by_source_and_yml(
                    &self.pool,
                    &p.base.source,
                    &p.base.yml_name,
                )
                .await?
            }
        };
        Ok(cron)
    }
}

/// Attach every task to its stage, keeping stage order
fn group_by_stage(stages: &[PipelineStage], tasks: Vec<PipelineTask>) -> Vec<StageDetail> {
    let mut details: Vec<StageDetail> = stages
        .iter()
        .map(|stage| StageDetail {
            stage: stage.clone(),
            tasks: Vec::new(),
        })
        .collect();

    for task in tasks {
        if let Some(detail) = details.iter_mut().find(|d| d.stage.id == task.stage_id) {
            detail.tasks.push(TaskDetail::from(task));
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use erda_core::domain::status::PipelineStatus;
    use erda_core::domain::task::{ExecutorKind, TaskExtra, TaskInspect};

    fn stage(id: i64, order: i32) -> PipelineStage {
        let mut s = PipelineStage::analyzed(1, order);
        s.id = id;
        s
    }

    fn task(name: &str, stage_id: i64) -> PipelineTask {
        let now = Utc::now();
        PipelineTask {
            id: 0,
            pipeline_id: 1,
            stage_id,
            name: name.into(),
            task_type: "custom-script".into(),
            executor_kind: ExecutorKind::Scheduler,
            status: PipelineStatus::Analyzed,
            is_snippet: false,
            snippet_pipeline_id: None,
            extra: TaskExtra::default(),
            result: None,
            inspect: TaskInspect::default(),
            cost_time_sec: None,
            time_begin: None,
            time_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_group_by_stage_keeps_order() {
        let stages = [stage(10, 0), stage(11, 1)];
        let tasks = vec![task("a", 10), task("b", 11), task("c", 10), task("orphan", 99)];

        let grouped = group_by_stage(&stages, tasks);
        assert_eq!(grouped.len(), 2);
        let names: Vec<&str> = grouped[0]
            .tasks
            .iter()
            .map(|t| t.task.name.as_str())
            .collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(grouped[1].tasks[0].task.name, "b");
    }
}
