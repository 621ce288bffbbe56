//! Pipeline view rules
//!
//! Which operator buttons are enabled, whether a pipeline may be run by
//! hand, and how stale task statuses are displayed.

use std::collections::HashMap;

use crate::domain::cron::PipelineCron;
use crate::domain::pipeline::{Pipeline, PipelineType, RunParam};
use crate::domain::status::PipelineStatus;
use crate::domain::task::PipelineTask;
use crate::dto::pipeline::{ParamWithValue, PipelineButtons};
use crate::yml::PipelineParam;

/// Check whether a pipeline can be started by hand
///
/// `rerun_failed_origin` is the origin pipeline of a rerun-failed pipeline,
/// `None` when it no longer exists.
pub fn can_manual_run(p: &Pipeline, rerun_failed_origin: Option<&Pipeline>) -> Result<(), String> {
    if p.status() != PipelineStatus::Analyzed {
        return Err(format!("invalid status: {}", p.status()));
    }
    if let Some(msg) = p.extra.show_message.as_ref().filter(|m| m.abort_run) {
        return Err(format!("abort run: {}", msg.msg));
    }
    if p.base.pipeline_type == PipelineType::RerunFailed {
        let origin_id = p
            .extra
            .rerun_failed_detail
            .as_ref()
            .map(|d| d.origin_pipeline_id)
            .unwrap_or_default();
        match rerun_failed_origin {
            None => {
                return Err(format!(
                    "origin pipeline {origin_id} of rerun-failed pipeline no longer exists"
                ));
            }
            Some(origin) if origin.extra.complete_reconciler_gc => {
                return Err(format!(
                    "origin pipeline {origin_id} of rerun-failed pipeline is already gc'd"
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn can_rerun_failed(p: &Pipeline) -> bool {
    p.status().is_failed() && !p.extra.complete_reconciler_gc
}

pub fn buttons(p: &Pipeline, cron: Option<&PipelineCron>, manual_run: bool) -> PipelineButtons {
    let status = p.status();
    PipelineButtons {
        can_manual_run: manual_run,
        can_cancel: status.can_cancel(),
        can_force_cancel: false,
        can_rerun: status.is_end(),
        can_rerun_failed: can_rerun_failed(p),
        can_start_cron: cron.is_some_and(|c| !c.enable),
        can_stop_cron: cron.is_some_and(|c| c.enable),
        // pausing a whole pipeline needs every node state, not supported
        can_pause: false,
        can_unpause: status.can_unpause(),
        can_delete: p.can_delete().is_ok(),
    }
}

/// Stage the pipeline is currently executing, `None` once it has finished
///
/// ```text
/// 1 R       1 R
/// 2 S => 3  2 A => 1
/// 3 S       3 A
/// ```
pub fn find_running_stage_id(p: &Pipeline, tasks: &[PipelineTask]) -> Option<i64> {
    if p.status().is_end() {
        return None;
    }
    let mut running: i64 = 0;
    for task in tasks {
        if !task.status.is_end() {
            if running == 0 || task.stage_id < running {
                running = task.stage_id;
            }
        } else if task.stage_id > running {
            running = task.stage_id;
        }
    }
    (running > 0).then_some(running)
}

/// Settle the status of a task the reconciler left behind
///
/// Applies to every task of a finished pipeline, and to tasks of stages
/// before the running one. Returns whether the status changed.
pub fn polish_task(p: &Pipeline, task: &mut PipelineTask, running_stage_id: Option<i64>) -> bool {
    let behind = running_stage_id.is_some_and(|id| task.stage_id < id);
    if !(p.status().is_end() || behind) {
        return false;
    }
    if task.status != PipelineStatus::Analyzed && !task.status.is_reconciler_running() {
        return false;
    }
    task.status = if p.status().is_success() || task.inspect.errors.is_empty() {
        PipelineStatus::Success
    } else {
        PipelineStatus::Failed
    };
    true
}

/// Analyzed tasks of a pipeline stopped by the user will never run
pub fn display_task_status(p: &Pipeline, task: &PipelineTask) -> PipelineStatus {
    if p.status().is_stop_by_user() && task.status == PipelineStatus::Analyzed {
        PipelineStatus::NoNeedBySystem
    } else {
        task.status
    }
}

/// Declared params with the values the pipeline was run with
pub fn params_with_value(params: &[PipelineParam], run_params: &[RunParam]) -> Vec<ParamWithValue> {
    let values: HashMap<&str, &serde_json::Value> = run_params
        .iter()
        .map(|p| (p.name.as_str(), &p.value))
        .collect();

    params
        .iter()
        .map(|param| ParamWithValue {
            name: param.name.clone(),
            desc: param.desc.clone(),
            default: param.default.clone(),
            required: param.required,
            param_type: param.param_type.clone(),
            value: values.get(param.name.as_str()).map(|v| (*v).clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{RerunFailedDetail, ShowMessage};
    use crate::domain::task::{ErrorItem, tests::task};
    use chrono::Utc;

    fn pipeline(status: PipelineStatus) -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = 1;
        p.base.status = status;
        p
    }

    fn staged(name: &str, stage_id: i64, status: PipelineStatus) -> PipelineTask {
        let mut t = task(name);
        t.stage_id = stage_id;
        t.status = status;
        t
    }

    #[test]
    fn test_manual_run_requires_analyzed() {
        for status in [
            PipelineStatus::Born,
            PipelineStatus::Running,
            PipelineStatus::Success,
            PipelineStatus::Failed,
            PipelineStatus::Paused,
        ] {
            assert!(can_manual_run(&pipeline(status), None).is_err());
        }
        assert!(can_manual_run(&pipeline(PipelineStatus::Analyzed), None).is_ok());
    }

    #[test]
    fn test_manual_run_abort_flag() {
        let mut p = pipeline(PipelineStatus::Analyzed);
        p.extra.show_message = Some(ShowMessage {
            msg: "missing secret".into(),
            stacks: vec![],
            abort_run: true,
        });
        assert!(can_manual_run(&p, None).is_err());
    }

    #[test]
    fn test_manual_run_rerun_failed_origin_gc() {
        let mut p = pipeline(PipelineStatus::Analyzed);
        p.base.pipeline_type = PipelineType::RerunFailed;
        p.extra.rerun_failed_detail = Some(RerunFailedDetail {
            origin_pipeline_id: 9,
            ..Default::default()
        });

        assert!(can_manual_run(&p, None).is_err());

        let mut origin = pipeline(PipelineStatus::Failed);
        assert!(can_manual_run(&p, Some(&origin)).is_ok());

        origin.extra.complete_reconciler_gc = true;
        assert!(can_manual_run(&p, Some(&origin)).is_err());
    }

    #[test]
    fn test_buttons() {
        let b = buttons(&pipeline(PipelineStatus::Running), None, false);
        assert!(b.can_cancel);
        assert!(!b.can_rerun);
        assert!(!b.can_delete);

        let b = buttons(&pipeline(PipelineStatus::Failed), None, false);
        assert!(b.can_rerun);
        assert!(b.can_rerun_failed);
        assert!(!b.can_delete);

        let now = Utc::now();
        let cron = PipelineCron {
            id: 1,
            source: "dice".into(),
            yml_name: "pipeline.yml".into(),
            cluster_name: "local".into(),
            cron_expr: "* * * * *".into(),
            enable: false,
            created_at: now,
            updated_at: now,
        };
        let b = buttons(&pipeline(PipelineStatus::Analyzed), Some(&cron), true);
        assert!(b.can_manual_run);
        assert!(b.can_start_cron);
        assert!(!b.can_stop_cron);
        assert!(b.can_delete);
    }

    #[test]
    fn test_find_running_stage_id() {
        let p = pipeline(PipelineStatus::Running);
        let tasks = vec![
            staged("a", 1, PipelineStatus::Running),
            staged("b", 2, PipelineStatus::Success),
            staged("c", 3, PipelineStatus::Success),
        ];
        assert_eq!(find_running_stage_id(&p, &tasks), Some(3));

        let tasks = vec![
            staged("a", 1, PipelineStatus::Running),
            staged("b", 2, PipelineStatus::Analyzed),
            staged("c", 3, PipelineStatus::Analyzed),
        ];
        assert_eq!(find_running_stage_id(&p, &tasks), Some(1));

        assert_eq!(find_running_stage_id(&pipeline(PipelineStatus::Success), &tasks), None);
    }

    #[test]
    fn test_polish_task() {
        let p = pipeline(PipelineStatus::Success);
        let mut t = staged("a", 1, PipelineStatus::Running);
        assert!(polish_task(&p, &mut t, None));
        assert_eq!(t.status, PipelineStatus::Success);

        let p = pipeline(PipelineStatus::Failed);
        let mut t = staged("a", 1, PipelineStatus::Analyzed);
        t.inspect.errors.push(ErrorItem {
            msg: "oom".into(),
            code: None,
        });
        assert!(polish_task(&p, &mut t, None));
        assert_eq!(t.status, PipelineStatus::Failed);

        let p = pipeline(PipelineStatus::Running);
        let mut t = staged("a", 3, PipelineStatus::Running);
        assert!(!polish_task(&p, &mut t, Some(3)));
        assert_eq!(t.status, PipelineStatus::Running);
    }

    #[test]
    fn test_display_task_status_stop_by_user() {
        let p = pipeline(PipelineStatus::StopByUser);
        let t = staged("a", 1, PipelineStatus::Analyzed);
        assert_eq!(display_task_status(&p, &t), PipelineStatus::NoNeedBySystem);
    }

    #[test]
    fn test_params_with_value() {
        let params = vec![PipelineParam {
            name: "branch".into(),
            required: true,
            default: Some(serde_json::json!("master")),
            desc: None,
            param_type: Some("string".into()),
        }];
        let run = vec![RunParam {
            name: "branch".into(),
            value: serde_json::json!("develop"),
        }];
        let out = params_with_value(&params, &run);
        assert_eq!(out[0].value, Some(serde_json::json!("develop")));
        assert_eq!(out[0].default, Some(serde_json::json!("master")));
    }
}
