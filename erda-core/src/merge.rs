//! Task Merge Engine
//!
//! Reconciles the tasks declared in a pipeline yml with the tasks already
//! persisted for that pipeline:
//!
//! 1. every yml action becomes a task tagged with its stage's database ID
//! 2. pending operator requests (disable/pause) are applied to those tasks
//! 3. tasks already in the database replace their yml counterpart
//!
//! A persisted task matches a yml task when `(pipeline_id, stage_id,
//! task_type, name)` are equal. The first persisted match wins.

use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::action::{JobDefResources, PassedDataWhenCreate};
use crate::domain::pipeline::Pipeline;
use crate::domain::stage::PipelineStage;
use crate::domain::status::PipelineStatus;
use crate::domain::task::{
    EXECUTOR_SNIPPET, ExecutorKind, PipelineTask, TaskExtra, TaskInspect, executor_name_for,
};
use crate::resource::{AppliedResources, ResourceCalculator};
use crate::yml::{Action, PipelineYml};

#[derive(Debug, Error, PartialEq)]
pub enum OperateError {
    #[error("task {task} cannot be disabled in status {status}")]
    CannotDisable {
        task: String,
        status: PipelineStatus,
    },

    #[error("task {task} cannot be paused in status {status}")]
    CannotPause {
        task: String,
        status: PipelineStatus,
    },

    #[error("task {task} cannot be unpaused in status {status}")]
    CannotUnpause {
        task: String,
        status: PipelineStatus,
    },

    #[error("stage {stage_id} of task {task} not found")]
    StageNotFound { task: String, stage_id: i64 },
}

/// Synthesize one task per yml action, in declaration order
///
/// Returns nothing until the pipeline's stages have been persisted, since
/// every task must carry its stage ID.
pub fn get_yml_action_tasks(
    yml: &PipelineYml,
    p: &Pipeline,
    db_stages: &[PipelineStage],
    passed: Option<&PassedDataWhenCreate>,
    calculator: &ResourceCalculator,
) -> Vec<PipelineTask> {
    if db_stages.is_empty() {
        return Vec::new();
    }

    let mut tasks = Vec::new();
    for (si, stage) in yml.stages.iter().enumerate() {
        let Some(db_stage) = db_stages.get(si) else {
            break;
        };
        for action in &stage.actions {
            let task = if action.is_snippet() {
                make_snippet_task(p, db_stage, action)
            } else {
                make_normal_task(yml, p, db_stage, action, passed, calculator)
            };
            tasks.push(task);
        }
    }
    tasks
}

fn base_task(p: &Pipeline, stage: &PipelineStage, action: &Action) -> PipelineTask {
    let now = Utc::now();
    PipelineTask {
        id: 0,
        pipeline_id: p.id(),
        stage_id: stage.id,
        name: action.alias.clone(),
        task_type: action.action_type.clone(),
        executor_kind: ExecutorKind::Scheduler,
        status: if action.disable {
            PipelineStatus::Disabled
        } else {
            PipelineStatus::Analyzed
        },
        is_snippet: false,
        snippet_pipeline_id: None,
        extra: TaskExtra {
            namespace: p.extra.namespace.clone(),
            cluster_name: p.base.cluster_name.clone(),
            action_version: action.version.clone(),
            action_params: action.params.clone(),
            stage_order: stage.stage_order,
            timeout_sec: action.timeout,
            ..Default::default()
        },
        result: None,
        inspect: TaskInspect::default(),
        cost_time_sec: None,
        time_begin: None,
        time_end: None,
        created_at: now,
        updated_at: now,
    }
}

fn make_snippet_task(p: &Pipeline, stage: &PipelineStage, action: &Action) -> PipelineTask {
    let mut task = base_task(p, stage, action);
    task.is_snippet = true;
    task.executor_kind = ExecutorKind::Ap;
    task.extra.executor_name = EXECUTOR_SNIPPET.to_string();
    task
}

fn make_normal_task(
    yml: &PipelineYml,
    p: &Pipeline,
    stage: &PipelineStage,
    action: &Action,
    passed: Option<&PassedDataWhenCreate>,
    calculator: &ResourceCalculator,
) -> PipelineTask {
    let mut task = base_task(p, stage, action);
    let def = passed.and_then(|d| d.get(&action.type_version()));
    let job_resources = def.map(|d| d.job.resources).unwrap_or_default();

    task.extra.executor_name = executor_name_for(&action.params).to_string();
    task.extra.image = def.map(|d| d.job.image.clone()).unwrap_or_default();
    task.extra.cmd = def.and_then(|d| d.job.cmd.clone());
    task.extra.applied_resources = calculator.task_resources(&action.resources, &job_resources);
    task.extra.caches = action.caches.iter().map(|c| c.path.clone()).collect();

    let mut envs: BTreeMap<String, String> = yml.envs.clone();
    envs.extend(p.extra.snapshot.envs.clone());
    task.extra.public_envs = envs;
    task
}

/// Resources of every non-snippet action, grouped by stage index
pub fn stage_task_resources(
    yml: &PipelineYml,
    passed: Option<&PassedDataWhenCreate>,
    calculator: &ResourceCalculator,
) -> Vec<Vec<AppliedResources>> {
    yml.stages
        .iter()
        .map(|stage| {
            stage
                .actions
                .iter()
                .filter(|a| !a.is_snippet())
                .map(|a| {
                    let def = passed
                        .and_then(|d| d.get(&a.type_version()))
                        .map(|d| d.job.resources)
                        .unwrap_or_else(JobDefResources::default);
                    calculator.task_resources(&a.resources, &def)
                })
                .collect()
        })
        .collect()
}

/// Apply the pipeline's pending operator requests to one task
pub fn operate_task(
    p: &Pipeline,
    task: &mut PipelineTask,
    db_stages: &[PipelineStage],
) -> Result<(), OperateError> {
    for op in &p.extra.task_operates {
        if op.task_alias != task.name {
            continue;
        }
        // persisted tasks are owned by the reconciler
        if task.id > 0 {
            continue;
        }

        if let Some(disable) = op.disable {
            if disable {
                if !matches!(
                    task.status,
                    PipelineStatus::Analyzed | PipelineStatus::Paused
                ) {
                    return Err(OperateError::CannotDisable {
                        task: task.name.clone(),
                        status: task.status,
                    });
                }
                task.status = PipelineStatus::Disabled;
            } else {
                task.status = PipelineStatus::Analyzed;
            }
        }

        if let Some(pause) = op.pause {
            if pause {
                if !task.status.can_pause() {
                    return Err(OperateError::CannotPause {
                        task: task.name.clone(),
                        status: task.status,
                    });
                }
                task.status = PipelineStatus::Paused;
            } else {
                if !task.status.can_unpause() {
                    return Err(OperateError::CannotUnpause {
                        task: task.name.clone(),
                        status: task.status,
                    });
                }
                let stage = db_stages
                    .iter()
                    .find(|s| s.id == task.stage_id)
                    .ok_or_else(|| OperateError::StageNotFound {
                        task: task.name.clone(),
                        stage_id: task.stage_id,
                    })?;
                task.status = if stage.status == PipelineStatus::Born {
                    PipelineStatus::Born
                } else {
                    PipelineStatus::Mark
                };
            }
            task.extra.pause = pause;
        }
    }
    Ok(())
}

/// Replace yml tasks by their persisted counterpart
pub fn yml_tasks_merge_db_tasks(
    yml_tasks: Vec<PipelineTask>,
    db_tasks: &[PipelineTask],
) -> Vec<PipelineTask> {
    yml_tasks
        .into_iter()
        .map(|yml_task| {
            db_tasks
                .iter()
                .find(|db_task| db_task.same_identity(&yml_task))
                .cloned()
                .unwrap_or(yml_task)
        })
        .collect()
}

pub fn merge_pipeline_yml_tasks(
    yml: &PipelineYml,
    db_tasks: &[PipelineTask],
    p: &Pipeline,
    db_stages: &[PipelineStage],
    passed: Option<&PassedDataWhenCreate>,
    calculator: &ResourceCalculator,
) -> Result<Vec<PipelineTask>, OperateError> {
    let mut tasks = get_yml_action_tasks(yml, p, db_stages, passed, calculator);
    for task in &mut tasks {
        operate_task(p, task, db_stages)?;
    }
    Ok(yml_tasks_merge_db_tasks(tasks, db_tasks))
}

/// Copy a task that already succeeded in the origin of a rerun-failed
/// pipeline, so it is not executed again
pub fn inherit_success_task(
    task: &PipelineTask,
    success_tasks: &BTreeMap<String, PipelineTask>,
) -> Option<PipelineTask> {
    let origin = success_tasks.get(&task.name)?;
    if origin.task_type != task.task_type || !origin.status.is_success() {
        return None;
    }
    let mut inherited = origin.clone();
    inherited.id = 0;
    inherited.pipeline_id = task.pipeline_id;
    inherited.stage_id = task.stage_id;
    inherited.extra.stage_order = task.extra.stage_order;
    Some(inherited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::TaskOperate;
    use crate::domain::task::tests::task;
    use crate::resource::Resource;
    use crate::yml::tests::FIVE_STAGE_YML;
    use proptest::prelude::*;

    fn calculator() -> ResourceCalculator {
        ResourceCalculator::new(Resource::new(0.5, 2048.0), 1.0, 4.0)
    }

    fn stages(n: usize) -> Vec<PipelineStage> {
        (0..n)
            .map(|i| {
                let mut s = PipelineStage::analyzed(1, i as i32);
                s.id = i as i64 + 1;
                s
            })
            .collect()
    }

    fn pipeline_with(op: TaskOperate) -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = 1;
        p.extra.task_operates.push(op);
        p
    }

    fn op(disable: Option<bool>, pause: Option<bool>) -> TaskOperate {
        TaskOperate {
            task_alias: "t".into(),
            disable,
            pause,
        }
    }

    #[test]
    fn test_five_stage_yml_tasks() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        let mut p = Pipeline::default();
        p.base.id = 1;

        let tasks = get_yml_action_tasks(&yml, &p, &stages(5), None, &calculator());
        assert_eq!(tasks.len(), 5);
        for (i, t) in tasks.iter().enumerate() {
            assert_eq!(t.stage_id, i as i64 + 1);
            assert_eq!(t.status, PipelineStatus::Analyzed);
            assert_eq!(t.is_snippet, t.name == "snippet");
        }
        assert_eq!(tasks[4].executor_kind, ExecutorKind::Ap);
        assert_eq!(tasks[1].extra.caches, ["/root/.m2/repository"]);
    }

    #[test]
    fn test_no_tasks_without_stages() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        let tasks = get_yml_action_tasks(&yml, &Pipeline::default(), &[], None, &calculator());
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_normal_task_uses_job_definition() {
        use crate::domain::action::{ActionDefinition, JobDefinition};

        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        let mut passed = PassedDataWhenCreate::new();
        passed.put(
            "java",
            ActionDefinition {
                action_type: "java".into(),
                job: JobDefinition {
                    image: "registry/java:1".into(),
                    cmd: None,
                    resources: JobDefResources {
                        cpu: 1.0,
                        max_cpu: 2.0,
                        mem: 1024.0,
                        max_mem: 0.0,
                    },
                },
                ..Default::default()
            },
        );
        let tasks =
            get_yml_action_tasks(&yml, &Pipeline::default(), &stages(5), Some(&passed), &calculator());
        let java = &tasks[1];
        assert_eq!(java.extra.image, "registry/java:1");
        assert_eq!(java.extra.applied_resources.limits, Resource::new(2.0, 1024.0));
        assert_eq!(java.extra.applied_resources.requests, Resource::new(1.0, 1024.0));
    }

    #[test]
    fn test_stage_task_resources_skip_snippets() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        let grouped = stage_task_resources(&yml, None, &calculator());
        assert_eq!(grouped.len(), 5);
        assert_eq!(grouped[0].len(), 1);
        assert!(grouped[4].is_empty());
    }

    #[test]
    fn test_disable_and_pause_on_paused_task_fails() {
        let p = pipeline_with(op(Some(true), Some(true)));
        let mut t = task("t");
        t.status = PipelineStatus::Paused;
        let err = operate_task(&p, &mut t, &stages(1)).unwrap_err();
        assert!(matches!(err, OperateError::CannotPause { .. }));
    }

    #[test]
    fn test_pause_running_task_fails() {
        let p = pipeline_with(op(None, Some(true)));
        let mut t = task("t");
        t.status = PipelineStatus::Running;
        assert!(operate_task(&p, &mut t, &stages(1)).is_err());
    }

    #[test]
    fn test_disable_running_task_fails() {
        let p = pipeline_with(op(Some(true), None));
        let mut t = task("t");
        t.status = PipelineStatus::Running;
        assert!(matches!(
            operate_task(&p, &mut t, &stages(1)),
            Err(OperateError::CannotDisable { .. })
        ));
    }

    #[test]
    fn test_unpause_analyzed_task_fails() {
        let p = pipeline_with(op(None, Some(false)));
        let mut t = task("t");
        assert!(matches!(
            operate_task(&p, &mut t, &stages(1)),
            Err(OperateError::CannotUnpause { .. })
        ));
    }

    #[test]
    fn test_disable_analyzed_task() {
        let p = pipeline_with(op(Some(true), None));
        let mut t = task("t");
        operate_task(&p, &mut t, &stages(1)).unwrap();
        assert_eq!(t.status, PipelineStatus::Disabled);
    }

    #[test]
    fn test_enable_sets_analyzed() {
        let p = pipeline_with(op(Some(false), None));
        let mut t = task("t");
        t.status = PipelineStatus::Disabled;
        operate_task(&p, &mut t, &stages(1)).unwrap();
        assert_eq!(t.status, PipelineStatus::Analyzed);
    }

    #[test]
    fn test_pause_analyzed_task() {
        let p = pipeline_with(op(None, Some(true)));
        let mut t = task("t");
        operate_task(&p, &mut t, &stages(1)).unwrap();
        assert_eq!(t.status, PipelineStatus::Paused);
        assert!(t.extra.pause);
    }

    #[test]
    fn test_unpause_follows_stage_status() {
        let p = pipeline_with(op(None, Some(false)));
        let mut db_stages = stages(1);

        let mut t = task("t");
        t.status = PipelineStatus::Paused;
        operate_task(&p, &mut t, &db_stages).unwrap();
        assert_eq!(t.status, PipelineStatus::Mark);
        assert!(!t.extra.pause);

        db_stages[0].status = PipelineStatus::Born;
        let mut t = task("t");
        t.status = PipelineStatus::Paused;
        operate_task(&p, &mut t, &db_stages).unwrap();
        assert_eq!(t.status, PipelineStatus::Born);
    }

    #[test]
    fn test_unpause_without_stage_fails() {
        let p = pipeline_with(op(None, Some(false)));
        let mut t = task("t");
        t.status = PipelineStatus::Paused;
        assert!(matches!(
            operate_task(&p, &mut t, &[]),
            Err(OperateError::StageNotFound { .. })
        ));
    }

    #[test]
    fn test_operate_skips_persisted_and_other_tasks() {
        let p = pipeline_with(op(Some(true), None));
        let mut persisted = task("t");
        persisted.id = 7;
        persisted.status = PipelineStatus::Running;
        operate_task(&p, &mut persisted, &stages(1)).unwrap();
        assert_eq!(persisted.status, PipelineStatus::Running);

        let mut other = task("other");
        operate_task(&p, &mut other, &stages(1)).unwrap();
        assert_eq!(other.status, PipelineStatus::Analyzed);
    }

    #[test]
    fn test_merge_first_match_wins() {
        let yml_tasks = vec![task("a")];
        let mut first = task("a");
        first.id = 10;
        let mut second = task("a");
        second.id = 11;

        let merged = yml_tasks_merge_db_tasks(yml_tasks, &[first, second]);
        assert_eq!(merged[0].id, 10);
    }

    #[test]
    fn test_merge_pipeline_yml_tasks_end_to_end() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        let mut p = Pipeline::default();
        p.base.id = 1;
        p.extra.task_operates.push(TaskOperate {
            task_alias: "dice".into(),
            disable: Some(true),
            pause: None,
        });
        let db_stages = stages(5);

        let mut persisted = task("git-checkout");
        persisted.id = 100;
        persisted.task_type = "git-checkout".into();
        persisted.status = PipelineStatus::Success;

        let merged =
            merge_pipeline_yml_tasks(&yml, &[persisted], &p, &db_stages, None, &calculator())
                .unwrap();
        assert_eq!(merged[0].id, 100);
        assert_eq!(merged[0].status, PipelineStatus::Success);
        assert_eq!(merged[3].status, PipelineStatus::Disabled);
        assert!(merged[1..].iter().all(|t| t.id == 0));
    }

    #[test]
    fn test_inherit_success_task() {
        let mut origin = task("build");
        origin.id = 5;
        origin.pipeline_id = 1;
        origin.status = PipelineStatus::Success;
        let success: BTreeMap<_, _> = [("build".to_string(), origin)].into();

        let mut fresh = task("build");
        fresh.pipeline_id = 2;
        fresh.stage_id = 9;
        let inherited = inherit_success_task(&fresh, &success).unwrap();
        assert_eq!(inherited.id, 0);
        assert_eq!(inherited.pipeline_id, 2);
        assert_eq!(inherited.stage_id, 9);
        assert_eq!(inherited.status, PipelineStatus::Success);

        assert!(inherit_success_task(&task("deploy"), &success).is_none());
    }

    proptest! {
        #[test]
        fn prop_merge_replaces_only_identity_matches(
            names in prop::collection::btree_set("[a-e]", 1..5),
            persisted_mask in prop::collection::vec(any::<bool>(), 5),
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let yml_tasks: Vec<PipelineTask> = names.iter().map(|n| task(n)).collect();
            let db_tasks: Vec<PipelineTask> = names
                .iter()
                .enumerate()
                .filter(|(i, _)| persisted_mask[*i])
                .map(|(i, n)| {
                    let mut t = task(n);
                    t.id = i as i64 + 1;
                    t
                })
                .collect();

            let merged = yml_tasks_merge_db_tasks(yml_tasks, &db_tasks);
            prop_assert_eq!(merged.len(), names.len());
            for (i, t) in merged.iter().enumerate() {
                if persisted_mask[i] {
                    prop_assert_eq!(t.id, i as i64 + 1);
                } else {
                    prop_assert_eq!(t.id, 0);
                }
            }
        }
    }
}
