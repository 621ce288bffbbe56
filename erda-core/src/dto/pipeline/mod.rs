//! Pipeline DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::cron::PipelineCron;
use crate::domain::pipeline::{
    GcOption, Pipeline, PipelineType, RunParam, TaskOperate, TriggerMode,
};
use crate::domain::stage::PipelineStage;
use crate::domain::status::PipelineStatus;
use crate::domain::task::{ErrorItem, MetadataField, PipelineTask, TaskContainer, TaskResult};
use crate::dto::Identity;
use crate::resource::AppliedResources;
use crate::yml::{PipelineOutput, PipelineParam};

// =============================================================================
// Requests
// =============================================================================

/// Request to create a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatePipelineRequestV2 {
    pub pipeline_yml: String,
    pub pipeline_yml_name: String,
    pub pipeline_source: String,
    pub cluster_name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub normal_labels: BTreeMap<String, String>,
    pub envs: BTreeMap<String, String>,
    pub run_params: Vec<RunParam>,
    pub auto_run_at_once: bool,
    pub auto_start_cron: bool,
    pub force_run: bool,
    pub config_manage_namespaces: Vec<String>,
    pub secrets: BTreeMap<String, String>,
    pub gc: Option<GcOption>,
    pub task_operates: Vec<TaskOperate>,
    pub parent_pipeline_id: Option<i64>,
    pub parent_task_id: Option<i64>,
    pub is_snippet: bool,
    pub snippet_chain: Vec<i64>,
    #[serde(flatten)]
    pub identity: Identity,
}

/// Legacy create request, without labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatePipelineRequest {
    pub pipeline_yml: String,
    pub pipeline_yml_name: String,
    pub pipeline_source: String,
    pub cluster_name: String,
    pub auto_run: bool,
    #[serde(flatten)]
    pub identity: Identity,
}

impl From<CreatePipelineRequest> for CreatePipelineRequestV2 {
    fn from(req: CreatePipelineRequest) -> Self {
        Self {
            pipeline_yml: req.pipeline_yml,
            pipeline_yml_name: req.pipeline_yml_name,
            pipeline_source: req.pipeline_source,
            cluster_name: req.cluster_name,
            auto_run_at_once: req.auto_run,
            identity: req.identity,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCreateRequest {
    pub requests: Vec<CreatePipelineRequestV2>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPipelineRequest {
    pub force_run: bool,
    pub run_params: Vec<RunParam>,
    pub secrets: BTreeMap<String, String>,
    pub config_manage_namespaces: Vec<String>,
    #[serde(flatten)]
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelPipelineRequest {
    #[serde(flatten)]
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RerunPipelineRequest {
    pub auto_run_at_once: bool,
    #[serde(flatten)]
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatePipelineRequest {
    pub task_operates: Vec<TaskOperate>,
}

/// Query parameters of the paging endpoint. `statuses` is comma separated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingRequest {
    pub source: Option<String>,
    pub yml_name: Option<String>,
    pub cluster_name: Option<String>,
    pub statuses: Option<String>,
    pub page_no: Option<i64>,
    pub page_size: Option<i64>,
}

impl PagingRequest {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 1000;

    pub fn page_no(&self) -> i64 {
        self.page_no.filter(|n| *n > 0).unwrap_or(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
            .filter(|n| *n > 0)
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .min(Self::MAX_PAGE_SIZE)
    }

    pub fn status_list(&self) -> Vec<PipelineStatus> {
        self.statuses
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PipelineStatus::parse)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticRequest {
    pub source: Option<String>,
    pub cluster_name: Option<String>,
}

/// External task result report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCallbackRequest {
    pub pipeline_id: i64,
    pub task_id: i64,
    pub metadata: Vec<MetadataField>,
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySnippetRequest {
    pub pipeline_yml: String,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: i64,
    pub source: String,
    pub yml_name: String,
    pub cluster_name: String,
    pub status: PipelineStatus,
    pub pipeline_type: PipelineType,
    pub trigger_mode: TriggerMode,
    pub cron_id: Option<i64>,
    pub is_snippet: bool,
    pub cost_time_sec: Option<i64>,
    pub progress: Option<u8>,
    pub labels: BTreeMap<String, String>,
    pub time_begin: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(p: &Pipeline) -> Self {
        Self {
            id: p.base.id,
            source: p.base.source.clone(),
            yml_name: p.base.yml_name.clone(),
            cluster_name: p.base.cluster_name.clone(),
            status: p.base.status,
            pipeline_type: p.base.pipeline_type,
            trigger_mode: p.base.trigger_mode,
            cron_id: p.base.cron_id,
            is_snippet: p.base.is_snippet,
            cost_time_sec: p.calculate_cost_time_sec(),
            progress: p.base.progress,
            labels: p.extra.labels.clone(),
            time_begin: p.base.time_begin,
            time_end: p.base.time_end,
            created_at: p.base.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingResponse {
    pub total: i64,
    pub page_no: i64,
    pub page_size: i64,
    pub pipelines: Vec<PipelineSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineButtons {
    pub can_manual_run: bool,
    pub can_cancel: bool,
    pub can_force_cancel: bool,
    pub can_rerun: bool,
    pub can_rerun_failed: bool,
    pub can_start_cron: bool,
    pub can_stop_cron: bool,
    pub can_pause: bool,
    pub can_unpause: bool,
    pub can_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamWithValue {
    pub name: String,
    pub desc: Option<String>,
    pub default: Option<serde_json::Value>,
    pub required: bool,
    pub param_type: Option<String>,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: PipelineTask,
    pub merged_result: TaskResult,
    pub containers: Vec<TaskContainer>,
}

impl From<PipelineTask> for TaskDetail {
    fn from(mut task: PipelineTask) -> Self {
        task.cost_time_sec = task.calculate_cost_time_sec();
        Self {
            merged_result: task.merged_result(),
            containers: task.containers(),
            task,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDetail {
    #[serde(flatten)]
    pub stage: PipelineStage,
    pub tasks: Vec<TaskDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetail {
    #[serde(flatten)]
    pub summary: PipelineSummary,
    pub namespace: String,
    pub yml_content: String,
    pub stages: Vec<StageDetail>,
    pub buttons: PipelineButtons,
    pub cron: Option<PipelineCron>,
    pub run_params: Vec<ParamWithValue>,
    pub defined_outputs: Vec<PipelineOutput>,
    pub applied_resources: Option<AppliedResources>,
    pub need_approval: bool,
    pub show_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticResponse {
    pub success: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySnippetResponse {
    pub params: Vec<PipelineParam>,
    pub outputs: Vec<PipelineOutput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_defaults_and_caps() {
        let req = PagingRequest::default();
        assert_eq!(req.page_no(), 1);
        assert_eq!(req.page_size(), 20);

        let req = PagingRequest {
            page_no: Some(0),
            page_size: Some(5000),
            ..Default::default()
        };
        assert_eq!(req.page_no(), 1);
        assert_eq!(req.page_size(), 1000);
    }

    #[test]
    fn test_status_list() {
        let req = PagingRequest {
            statuses: Some("Running, Success,,".into()),
            ..Default::default()
        };
        assert_eq!(
            req.status_list(),
            [PipelineStatus::Running, PipelineStatus::Success]
        );
    }

    #[test]
    fn test_create_request_deserializes_identity_inline() {
        let req: CreatePipelineRequestV2 = serde_json::from_value(serde_json::json!({
            "pipeline_yml": "version: \"1.1\"",
            "pipeline_source": "dice",
            "cluster_name": "local",
            "user_id": "1"
        }))
        .unwrap();
        assert_eq!(req.identity.user_id.as_deref(), Some("1"));
        assert!(req.labels.is_empty());
    }

    #[test]
    fn test_legacy_request_converts() {
        let req = CreatePipelineRequest {
            pipeline_yml: "y".into(),
            auto_run: true,
            ..Default::default()
        };
        let v2: CreatePipelineRequestV2 = req.into();
        assert!(v2.auto_run_at_once);
        assert_eq!(v2.pipeline_yml, "y");
    }
}
