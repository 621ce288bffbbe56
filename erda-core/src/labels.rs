//! Well-known pipeline labels
//!
//! Labels are free-form strings attached at create time. The ones below are
//! interpreted by the pipeline service and copied into typed fields.

pub const LABEL_CREATE_USER_ID: &str = "createUser";
pub const LABEL_ORG_ID: &str = "orgID";
pub const LABEL_ORG_NAME: &str = "orgName";
pub const LABEL_PROJECT_ID: &str = "projectID";
pub const LABEL_APP_ID: &str = "appID";
pub const LABEL_BRANCH: &str = "branch";
pub const LABEL_DICE_WORKSPACE: &str = "diceWorkspace";
pub const LABEL_PIPELINE_TYPE: &str = "pipelineType";
pub const LABEL_PIPELINE_TRIGGER_MODE: &str = "pipelineTriggerMode";
pub const LABEL_PIPELINE_CRON_ID: &str = "cronID";
pub const LABEL_PIPELINE_CRON_TRIGGER_TIME: &str = "cronTriggerTime";
pub const LABEL_BIND_QUEUE_ID: &str = "__bind_queue_id";
pub const LABEL_BIND_QUEUE_CUSTOM_PRIORITY: &str = "__bind_queue_custom_priority";
pub const LABEL_BIND_QUEUE_ENQUEUE_CONDITION: &str = "__bind_queue_enqueue_condition";

/// Longest label key or value that still fits the label index
pub const MAX_INDEXED_LABEL_LEN: usize = 191;

/// Prefix of secrets injected by the platform. User secrets cannot override them.
pub const PLATFORM_SECRET_PREFIX: &str = "dice.";
