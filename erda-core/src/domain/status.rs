//! Pipeline status
//!
//! One status enum is shared by pipelines, stages and tasks. The predicates
//! below decide which operator actions are allowed in which state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PipelineStatus {
    #[default]
    Analyzed,
    AnalyzeFailed,
    Paused,
    Disabled,
    Born,
    Mark,
    Created,
    Queue,
    Running,
    Success,
    Failed,
    Timeout,
    StopByUser,
    NoNeedBySystem,
    CreateError,
    StartError,
    Error,
    #[serde(rename = "DBError")]
    DbError,
    Unknown,
}

const ALL_STATUSES: [PipelineStatus; 19] = [
    PipelineStatus::Analyzed,
    PipelineStatus::AnalyzeFailed,
    PipelineStatus::Paused,
    PipelineStatus::Disabled,
    PipelineStatus::Born,
    PipelineStatus::Mark,
    PipelineStatus::Created,
    PipelineStatus::Queue,
    PipelineStatus::Running,
    PipelineStatus::Success,
    PipelineStatus::Failed,
    PipelineStatus::Timeout,
    PipelineStatus::StopByUser,
    PipelineStatus::NoNeedBySystem,
    PipelineStatus::CreateError,
    PipelineStatus::StartError,
    PipelineStatus::Error,
    PipelineStatus::DbError,
    PipelineStatus::Unknown,
];

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Analyzed => "Analyzed",
            PipelineStatus::AnalyzeFailed => "AnalyzeFailed",
            PipelineStatus::Paused => "Paused",
            PipelineStatus::Disabled => "Disabled",
            PipelineStatus::Born => "Born",
            PipelineStatus::Mark => "Mark",
            PipelineStatus::Created => "Created",
            PipelineStatus::Queue => "Queue",
            PipelineStatus::Running => "Running",
            PipelineStatus::Success => "Success",
            PipelineStatus::Failed => "Failed",
            PipelineStatus::Timeout => "Timeout",
            PipelineStatus::StopByUser => "StopByUser",
            PipelineStatus::NoNeedBySystem => "NoNeedBySystem",
            PipelineStatus::CreateError => "CreateError",
            PipelineStatus::StartError => "StartError",
            PipelineStatus::Error => "Error",
            PipelineStatus::DbError => "DBError",
            PipelineStatus::Unknown => "Unknown",
        }
    }

    /// Parse a persisted status string. Unrecognized values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        ALL_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .unwrap_or(PipelineStatus::Unknown)
    }

    /// Every terminal status
    pub fn end_statuses() -> Vec<PipelineStatus> {
        ALL_STATUSES.iter().copied().filter(|s| s.is_end()).collect()
    }

    pub fn is_success(self) -> bool {
        matches!(self, PipelineStatus::Success)
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            PipelineStatus::AnalyzeFailed
                | PipelineStatus::Failed
                | PipelineStatus::Timeout
                | PipelineStatus::StopByUser
                | PipelineStatus::CreateError
                | PipelineStatus::StartError
                | PipelineStatus::Error
                | PipelineStatus::DbError
                | PipelineStatus::Unknown
        )
    }

    pub fn is_disabled(self) -> bool {
        matches!(self, PipelineStatus::Disabled)
    }

    pub fn is_stop_by_user(self) -> bool {
        matches!(self, PipelineStatus::StopByUser)
    }

    /// Terminal states. Nothing transitions out of these.
    pub fn is_end(self) -> bool {
        self.is_success()
            || self.is_failed()
            || self.is_disabled()
            || matches!(self, PipelineStatus::NoNeedBySystem)
    }

    /// States in which the reconciler owns the pipeline.
    pub fn is_reconciler_running(self) -> bool {
        matches!(
            self,
            PipelineStatus::Born
                | PipelineStatus::Mark
                | PipelineStatus::Created
                | PipelineStatus::Queue
                | PipelineStatus::Running
        )
    }

    pub fn can_pause(self) -> bool {
        matches!(self, PipelineStatus::Analyzed | PipelineStatus::Born)
    }

    pub fn can_unpause(self) -> bool {
        matches!(self, PipelineStatus::Paused)
    }

    pub fn can_cancel(self) -> bool {
        self.is_reconciler_running()
    }

    pub fn can_delete(self) -> bool {
        matches!(self, PipelineStatus::Analyzed) || self.is_end()
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
