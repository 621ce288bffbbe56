//! Pipeline task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::status::PipelineStatus;
use crate::resource::AppliedResources;

pub const BIG_DATA_CONF_PARAM: &str = "bigDataConf";

pub const EXECUTOR_K8S_JOB: &str = "k8sjob";
pub const EXECUTOR_K8S_FLINK: &str = "k8sflink";
pub const EXECUTOR_K8S_SPARK: &str = "k8sspark";
pub const EXECUTOR_SNIPPET: &str = "snippet";

/// One action execution unit within a stage
///
/// Identity within a pipeline is `(pipeline_id, stage_id, task_type, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    /// `0` until the task is persisted
    pub id: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub name: String,
    pub task_type: String,
    pub executor_kind: ExecutorKind,
    pub status: PipelineStatus,
    pub is_snippet: bool,
    pub snippet_pipeline_id: Option<i64>,
    pub extra: TaskExtra,
    pub result: Option<TaskResult>,
    pub inspect: TaskInspect,
    pub cost_time_sec: Option<i64>,
    pub time_begin: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorKind {
    #[default]
    Scheduler,
    /// Nested action pipeline, used by snippet tasks
    Ap,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Scheduler => "SCHEDULER",
            ExecutorKind::Ap => "AP",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "AP" => ExecutorKind::Ap,
            _ => ExecutorKind::Scheduler,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskExtra {
    pub uuid: String,
    pub namespace: String,
    pub cluster_name: String,
    pub executor_name: String,
    pub image: String,
    pub cmd: Option<String>,
    pub action_version: Option<String>,
    pub action_params: BTreeMap<String, serde_json::Value>,
    pub public_envs: BTreeMap<String, String>,
    pub applied_resources: AppliedResources,
    pub stage_order: i32,
    pub pause: bool,
    pub allow_failure: bool,
    pub timeout_sec: Option<i64>,
    pub caches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskResult {
    pub metadata: Vec<MetadataField>,
    pub errors: Vec<ErrorItem>,
}

/// Internal observations of the reconciler about a task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInspect {
    pub inspect: String,
    pub events: String,
    pub metadata: Vec<MetadataField>,
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorItem {
    pub msg: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContainer {
    pub task_name: String,
}

/// Big-data workload declared by the `bigDataConf` action param
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigDataKind {
    Flink,
    Spark,
}

impl BigDataKind {
    /// Detect the workload kind. `bigDataConf` may be an object or a JSON
    /// string. When both confs are present, spark wins.
    pub fn detect(params: &BTreeMap<String, serde_json::Value>) -> Option<Self> {
        let conf = match params.get(BIG_DATA_CONF_PARAM)? {
            serde_json::Value::String(s) => serde_json::from_str(s).ok()?,
            other => other.clone(),
        };
        let declared = |key: &str| conf.get(key).is_some_and(|v| !v.is_null());

        if declared("sparkConf") {
            Some(BigDataKind::Spark)
        } else if declared("flinkConf") {
            Some(BigDataKind::Flink)
        } else {
            None
        }
    }
}

/// Scheduler executor for a normal task
pub fn executor_name_for(params: &BTreeMap<String, serde_json::Value>) -> &'static str {
    match BigDataKind::detect(params) {
        Some(BigDataKind::Flink) => EXECUTOR_K8S_FLINK,
        Some(BigDataKind::Spark) => EXECUTOR_K8S_SPARK,
        None => EXECUTOR_K8S_JOB,
    }
}

impl PipelineTask {
    /// Containers the task runs as, derived from its big-data conf
    pub fn containers(&self) -> Vec<TaskContainer> {
        let names = match BigDataKind::detect(&self.extra.action_params) {
            Some(BigDataKind::Flink) => vec![
                format!("{}-job", self.name),
                format!("{}-job-manager", self.name),
                format!("{}-task-manager", self.name),
            ],
            Some(BigDataKind::Spark) => vec![
                format!("{}-task-driver", self.name),
                format!("{}-task-executor", self.name),
            ],
            None => vec![self.name.clone()],
        };
        names
            .into_iter()
            .map(|task_name| TaskContainer { task_name })
            .collect()
    }

    /// Result with external metadata and errors taking priority over the
    /// internal inspect data
    pub fn merged_result(&self) -> TaskResult {
        let external = self.result.clone().unwrap_or_default();

        let mut metadata = external.metadata;
        for field in &self.inspect.metadata {
            if !metadata.iter().any(|m| m.name == field.name) {
                metadata.push(field.clone());
            }
        }

        let mut errors = external.errors;
        for err in &self.inspect.errors {
            if !errors.iter().any(|e| e.msg == err.msg) {
                errors.push(err.clone());
            }
        }

        TaskResult { metadata, errors }
    }

    pub fn same_identity(&self, other: &PipelineTask) -> bool {
        self.pipeline_id == other.pipeline_id
            && self.stage_id == other.stage_id
            && self.task_type == other.task_type
            && self.name == other.name
    }

    pub fn calculate_cost_time_sec(&self) -> Option<i64> {
        match (self.time_begin, self.time_end) {
            (Some(begin), Some(end)) if end >= begin => Some((end - begin).num_seconds()),
            _ => self.cost_time_sec,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn task(name: &str) -> PipelineTask {
        let now = Utc::now();
        PipelineTask {
            id: 0,
            pipeline_id: 1,
            stage_id: 1,
            name: name.to_string(),
            task_type: "custom-script".to_string(),
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

    fn container_names(t: &PipelineTask) -> Vec<String> {
        t.containers().into_iter().map(|c| c.task_name).collect()
    }

    #[test]
    fn test_containers_flink() {
        let mut t = task("t");
        t.extra
            .action_params
            .insert(BIG_DATA_CONF_PARAM.into(), json!({"flinkConf": {"parallelism": 1}}));
        assert_eq!(container_names(&t), ["t-job", "t-job-manager", "t-task-manager"]);
    }

    #[test]
    fn test_containers_spark_from_json_string() {
        let mut t = task("t");
        t.extra.action_params.insert(
            BIG_DATA_CONF_PARAM.into(),
            json!(r#"{"sparkConf": {"kind": "java"}}"#),
        );
        assert_eq!(container_names(&t), ["t-task-driver", "t-task-executor"]);
    }

    #[test]
    fn test_containers_plain_task() {
        assert_eq!(container_names(&task("t")), ["t"]);
    }

    #[test]
    fn test_executor_name() {
        let mut params = BTreeMap::new();
        assert_eq!(executor_name_for(&params), EXECUTOR_K8S_JOB);

        params.insert(BIG_DATA_CONF_PARAM.into(), json!({"flinkConf": {}}));
        assert_eq!(executor_name_for(&params), EXECUTOR_K8S_FLINK);

        params.insert(
            BIG_DATA_CONF_PARAM.into(),
            json!({"flinkConf": {}, "sparkConf": {}}),
        );
        assert_eq!(executor_name_for(&params), EXECUTOR_K8S_SPARK);
    }

    #[test]
    fn test_merged_result_prefers_external() {
        let mut t = task("t");
        t.result = Some(TaskResult {
            metadata: vec![MetadataField {
                name: "image".into(),
                value: "external".into(),
                field_type: None,
            }],
            errors: vec![],
        });
        t.inspect.metadata = vec![
            MetadataField {
                name: "image".into(),
                value: "internal".into(),
                field_type: None,
            },
            MetadataField {
                name: "pod".into(),
                value: "p-1".into(),
                field_type: None,
            },
        ];
        t.inspect.errors = vec![ErrorItem {
            msg: "image pull backoff".into(),
            code: None,
        }];

        let merged = t.merged_result();
        assert_eq!(merged.metadata.len(), 2);
        assert_eq!(merged.metadata[0].value, "external");
        assert_eq!(merged.errors.len(), 1);
    }
}
