//! Pipeline stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::status::PipelineStatus;

/// An ordered group of tasks. Stages of a pipeline run one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: i64,
    pub pipeline_id: i64,
    pub name: String,
    pub status: PipelineStatus,
    /// Index of the stage in the pipeline yml
    pub stage_order: i32,
    pub cost_time_sec: Option<i64>,
    pub time_begin: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineStage {
    /// A not yet persisted stage in `Analyzed` status
    pub fn analyzed(pipeline_id: i64, stage_order: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            pipeline_id,
            name: String::new(),
            status: PipelineStatus::Analyzed,
            stage_order,
            cost_time_sec: None,
            time_begin: None,
            time_end: None,
            created_at: now,
            updated_at: now,
        }
    }
}
