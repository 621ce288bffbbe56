//! Pipeline cron domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Periodic trigger for a `(source, yml_name)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCron {
    pub id: i64,
    pub source: String,
    pub yml_name: String,
    pub cluster_name: String,
    pub cron_expr: String,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
