//! Run-time secrets
//!
//! Secrets of a run come from three places: the config namespaces the
//! pipeline references, the secrets passed with the run request, and the
//! platform secrets derived from the pipeline itself. Platform secrets always
//! win and are kept in their own map.

use erda_core::domain::pipeline::Pipeline;
use erda_core::labels::{
    LABEL_APP_ID, LABEL_DICE_WORKSPACE, LABEL_ORG_ID, LABEL_ORG_NAME, LABEL_PROJECT_ID,
    PLATFORM_SECRET_PREFIX,
};
use std::collections::BTreeMap;

/// Secrets snapshotted onto a pipeline when it starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSecrets {
    pub secrets: BTreeMap<String, String>,
    pub platform_secrets: BTreeMap<String, String>,
}

/// Platform secrets of a pipeline, all prefixed with `dice.`
pub fn platform_secrets(p: &Pipeline, run_user_id: Option<&str>) -> BTreeMap<String, String> {
    let labels = p.merged_labels();
    let mut secrets = BTreeMap::new();
    let mut put = |key: &str, value: Option<&str>| {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            secrets.insert(format!("{PLATFORM_SECRET_PREFIX}{key}"), v.to_string());
        }
    };

    let pipeline_id = p.id().to_string();
    put("pipeline.id", Some(pipeline_id.as_str()));
    put("pipeline.source", Some(p.base.source.as_str()));
    put("pipeline.yml.name", Some(p.base.yml_name.as_str()));
    put("cluster.name", Some(p.base.cluster_name.as_str()));
    put("org.id", labels.get(LABEL_ORG_ID).map(String::as_str));
    put("org.name", labels.get(LABEL_ORG_NAME).map(String::as_str));
    put("project.id", labels.get(LABEL_PROJECT_ID).map(String::as_str));
    put("application.id", labels.get(LABEL_APP_ID).map(String::as_str));
    put("workspace", labels.get(LABEL_DICE_WORKSPACE).map(String::as_str));
    put("operator.id", run_user_id);
    secrets
}

/// Merge namespace secrets, then request secrets, then hold platform keys
/// against override
pub fn merge_run_secrets(
    namespace_secrets: BTreeMap<String, String>,
    incoming: &BTreeMap<String, String>,
    platform: BTreeMap<String, String>,
) -> RunSecrets {
    let mut secrets = namespace_secrets;
    secrets.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
    secrets.retain(|k, _| !platform.contains_key(k));

    RunSecrets {
        secrets,
        platform_secrets: platform,
    }
}
