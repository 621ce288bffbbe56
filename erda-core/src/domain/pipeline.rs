//! Pipeline domain types
//!
//! A pipeline is split into a base (the indexed identity and status columns)
//! and an extra (everything else, stored as JSON).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::status::PipelineStatus;
use crate::resource::AppliedResources;
use crate::yml::PipelineOutput;

pub const DEFAULT_PIPELINE_YML_NAME: &str = "pipeline.yml";

/// Pipeline instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(flatten)]
    pub base: PipelineBase,
    pub extra: PipelineExtra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineBase {
    pub id: i64,
    pub source: String,
    pub yml_name: String,
    pub cluster_name: String,
    pub status: PipelineStatus,
    pub pipeline_type: PipelineType,
    pub trigger_mode: TriggerMode,
    pub cron_id: Option<i64>,
    pub is_snippet: bool,
    pub parent_pipeline_id: Option<i64>,
    pub parent_task_id: Option<i64>,
    pub is_edge: bool,
    /// `None` until the pipeline has finished
    pub cost_time_sec: Option<i64>,
    /// Percentage, `None` until the reconciler reports progress
    pub progress: Option<u8>,
    pub time_begin: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PipelineBase {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            source: String::new(),
            yml_name: DEFAULT_PIPELINE_YML_NAME.to_string(),
            cluster_name: String::new(),
            status: PipelineStatus::Analyzed,
            pipeline_type: PipelineType::Normal,
            trigger_mode: TriggerMode::Manual,
            cron_id: None,
            is_snippet: false,
            parent_pipeline_id: None,
            parent_task_id: None,
            is_edge: false,
            cost_time_sec: None,
            progress: None,
            time_begin: None,
            time_end: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineType {
    #[default]
    Normal,
    Rerun,
    RerunFailed,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::Normal => "normal",
            PipelineType::Rerun => "rerun",
            PipelineType::RerunFailed => "rerun-failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(PipelineType::Normal),
            "rerun" => Some(PipelineType::Rerun),
            "rerun-failed" => Some(PipelineType::RerunFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Manual,
    Cron,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Manual => "manual",
            TriggerMode::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TriggerMode::Manual),
            "cron" => Some(TriggerMode::Cron),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineExtra {
    pub pipeline_yml: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Labels too long to be indexed
    pub normal_labels: BTreeMap<String, String>,
    pub snapshot: Snapshot,
    pub gc: GcOption,
    pub queue: Option<QueueInfo>,
    pub submit_user: Option<UserIdentity>,
    pub run_user: Option<UserIdentity>,
    pub cancel_user: Option<UserIdentity>,
    pub internal_client: Option<String>,
    pub task_operates: Vec<TaskOperate>,
    /// Ancestor pipeline IDs, outermost first
    pub snippet_chain: Vec<i64>,
    pub rerun_failed_detail: Option<RerunFailedDetail>,
    pub show_message: Option<ShowMessage>,
    pub complete_reconciler_gc: bool,
    pub incoming_secrets: BTreeMap<String, String>,
    pub config_manage_namespaces: Vec<String>,
    pub cron_expr: Option<String>,
    pub cron_trigger_time: Option<DateTime<Utc>>,
    pub enable_local_storage: bool,
    /// ID on the edge cluster when this row mirrors an edge pipeline
    pub edge_pipeline_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub secrets: BTreeMap<String, String>,
    pub platform_secrets: BTreeMap<String, String>,
    pub envs: BTreeMap<String, String>,
    pub run_params: Vec<RunParam>,
    pub defined_outputs: Vec<PipelineOutput>,
    pub applied_resources: Option<AppliedResources>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParam {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Operator request against one task, applied when tasks are merged
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskOperate {
    pub task_alias: String,
    #[serde(default)]
    pub disable: Option<bool>,
    #[serde(default)]
    pub pause: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RerunFailedDetail {
    pub origin_pipeline_id: i64,
    /// Successful task name to task ID in the origin pipeline
    pub success_tasks: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShowMessage {
    pub msg: String,
    #[serde(default)]
    pub stacks: Vec<String>,
    #[serde(default)]
    pub abort_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueueCondition {
    SkipAlreadyRunningLimit,
}

impl EnqueueCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SkipAlreadyRunningLimit" => Some(EnqueueCondition::SkipAlreadyRunningLimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueInfo {
    pub queue_id: i64,
    pub custom_priority: i64,
    #[serde(default)]
    pub enqueue_condition: Option<EnqueueCondition>,
}

impl QueueInfo {
    pub fn skips_running_limit(&self) -> bool {
        self.enqueue_condition == Some(EnqueueCondition::SkipAlreadyRunningLimit)
    }
}

// =============================================================================
// GC
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcOption {
    pub resource: ResourceGc,
    pub database: DatabaseGc,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGc {
    pub success_ttl_second: Option<u64>,
    pub failed_ttl_second: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseGc {
    pub analyzed: DatabaseGcItem,
    pub finished: DatabaseGcItem,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseGcItem {
    pub ttl_second: Option<u64>,
    pub need_archive: Option<bool>,
}

/// Platform GC defaults used to fill unset options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcDefaults {
    pub analyzed_database_ttl: u64,
    pub finished_database_ttl: u64,
    pub success_resource_ttl: u64,
    pub failed_resource_ttl: u64,
}

impl Default for GcDefaults {
    fn default() -> Self {
        Self {
            analyzed_database_ttl: 86_400,
            finished_database_ttl: 5_184_000,
            success_resource_ttl: 1_800,
            failed_resource_ttl: 1_800,
        }
    }
}

impl GcOption {
    /// Fill every unset field from `defaults`
    pub fn ensure(&mut self, defaults: &GcDefaults) {
        self.resource
            .success_ttl_second
            .get_or_insert(defaults.success_resource_ttl);
        self.resource
            .failed_ttl_second
            .get_or_insert(defaults.failed_resource_ttl);
        self.database
            .analyzed
            .ttl_second
            .get_or_insert(defaults.analyzed_database_ttl);
        self.database.analyzed.need_archive.get_or_insert(false);
        self.database
            .finished
            .ttl_second
            .get_or_insert(defaults.finished_database_ttl);
        self.database.finished.need_archive.get_or_insert(true);
    }
}

// =============================================================================
// Pipeline helpers
// =============================================================================

impl Pipeline {
    pub fn id(&self) -> i64 {
        self.base.id
    }

    pub fn status(&self) -> PipelineStatus {
        self.base.status
    }

    pub fn ensure_gc(&mut self, defaults: &GcDefaults) {
        self.extra.gc.ensure(defaults);
    }

    /// Labels and normal labels merged, labels win
    pub fn merged_labels(&self) -> BTreeMap<String, String> {
        let mut merged = self.extra.normal_labels.clone();
        merged.extend(self.extra.labels.clone());
        merged
    }

    pub fn can_delete(&self) -> Result<(), String> {
        let status = self.status();
        if !status.can_delete() {
            return Err(format!("invalid status: {status}"));
        }
        if status.is_end() && !self.extra.complete_reconciler_gc {
            return Err("waiting gc".to_string());
        }
        Ok(())
    }

    /// Wall-clock run time, once both ends are known
    pub fn calculate_cost_time_sec(&self) -> Option<i64> {
        match (self.base.time_begin, self.base.time_end) {
            (Some(begin), Some(end)) if end >= begin => Some((end - begin).num_seconds()),
            _ => self.base.cost_time_sec,
        }
    }
}
