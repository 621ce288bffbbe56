//! Pipeline YAML
//!
//! Parses a `version: "1.1"` pipeline document into a [`PipelineYml`].
//!
//! ```yaml
//! version: "1.1"
//! stages:
//!   - stage:
//!       - git-checkout:
//!           alias: repo
//!       - java:
//!           alias: build
//!           params:
//!             workdir: ${repo}
//!           resources:
//!             cpu: 1
//!             mem: 2048
//! ```
//!
//! Every entry of a stage is a map with exactly one key, the action type.
//! The alias defaults to the action type and must be unique across the whole
//! document, since it becomes the task name and therefore part of the task
//! identity.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::domain::action::action_key;

pub const SUPPORTED_VERSION: &str = "1.1";
pub const SNIPPET_ACTION_TYPE: &str = "snippet";

#[derive(Debug, Error)]
pub enum YmlError {
    #[error("failed to parse pipeline yml: {0}")]
    Malformed(#[from] serde_yaml::Error),

    #[error("pipeline yml version is missing")]
    MissingVersion,

    #[error("unsupported pipeline yml version: {0}")]
    UnsupportedVersion(String),

    #[error("stage {stage} item {item}: expected exactly one action type, found {found}")]
    InvalidActionEntry {
        stage: usize,
        item: usize,
        found: usize,
    },

    #[error("duplicate action alias: {0}")]
    DuplicateAlias(String),

    #[error("action type cannot be empty (stage {0})")]
    EmptyActionType(usize),
}

/// Parsed pipeline document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineYml {
    pub version: String,
    pub cron: Option<String>,
    pub envs: BTreeMap<String, String>,
    pub params: Vec<PipelineParam>,
    pub outputs: Vec<PipelineOutput>,
    pub storage: Option<StorageConfig>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    pub alias: String,
    pub version: Option<String>,
    pub params: BTreeMap<String, serde_json::Value>,
    pub resources: ActionResources,
    pub caches: Vec<ActionCache>,
    pub timeout: Option<i64>,
    pub disable: bool,
    pub snippet_config: Option<SnippetConfig>,
}

/// Resources declared on an action
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionResources {
    pub cpu: f64,
    pub max_cpu: f64,
    pub min_cpu: f64,
    pub mem: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCache {
    pub path: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetConfig {
    pub name: String,
    pub source: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParam {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default, rename = "type")]
    pub param_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub context: Option<String>,
}

impl Action {
    pub fn is_snippet(&self) -> bool {
        self.action_type == SNIPPET_ACTION_TYPE
    }

    /// Registry key of this action, `type@version`
    pub fn type_version(&self) -> String {
        action_key(&self.action_type, self.version.as_deref())
    }
}

impl PipelineYml {
    pub fn parse(content: &str) -> Result<Self, YmlError> {
        let raw: RawYml = serde_yaml::from_str(content)?;
        raw.try_into()
    }

    /// Iterate `(stage_index, action)` in declaration order
    pub fn actions(&self) -> impl Iterator<Item = (usize, &Action)> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(si, stage)| stage.actions.iter().map(move |a| (si, a)))
    }

    /// Registry keys of every non-snippet action, deduplicated, in first-seen order
    pub fn action_keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.actions()
            .filter(|(_, a)| !a.is_snippet())
            .map(|(_, a)| a.type_version())
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }
}

// =============================================================================
// Raw document
// =============================================================================

#[derive(Deserialize)]
struct RawYml {
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    envs: BTreeMap<String, String>,
    #[serde(default)]
    params: Vec<PipelineParam>,
    #[serde(default)]
    outputs: Vec<PipelineOutput>,
    #[serde(default)]
    storage: Option<StorageConfig>,
    #[serde(default)]
    stages: Vec<RawStage>,
}

#[derive(Deserialize)]
struct RawStage {
    #[serde(default)]
    stage: Vec<BTreeMap<String, Option<RawAction>>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAction {
    alias: Option<String>,
    version: Option<String>,
    params: BTreeMap<String, serde_json::Value>,
    resources: ActionResources,
    caches: Vec<ActionCache>,
    timeout: Option<i64>,
    disable: bool,
    snippet_config: Option<SnippetConfig>,
}

impl TryFrom<RawYml> for PipelineYml {
    type Error = YmlError;

    fn try_from(raw: RawYml) -> Result<Self, Self::Error> {
        let version = match raw.version {
            None | Some(serde_yaml::Value::Null) => return Err(YmlError::MissingVersion),
            Some(serde_yaml::Value::String(s)) => s,
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(other) => return Err(YmlError::UnsupportedVersion(format!("{other:?}"))),
        };
        if version != SUPPORTED_VERSION {
            return Err(YmlError::UnsupportedVersion(version));
        }

        let mut aliases = HashSet::new();
        let mut stages = Vec::with_capacity(raw.stages.len());

        for (si, raw_stage) in raw.stages.into_iter().enumerate() {
            let mut actions = Vec::with_capacity(raw_stage.stage.len());
            for (ai, entry) in raw_stage.stage.into_iter().enumerate() {
                if entry.len() != 1 {
                    return Err(YmlError::InvalidActionEntry {
                        stage: si,
                        item: ai,
                        found: entry.len(),
                    });
                }
                let Some((action_type, body)) = entry.into_iter().next() else {
                    continue;
                };
                if action_type.trim().is_empty() {
                    return Err(YmlError::EmptyActionType(si));
                }
                let body = body.unwrap_or_default();
                let alias = body
                    .alias
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| action_type.clone());
                if !aliases.insert(alias.clone()) {
                    return Err(YmlError::DuplicateAlias(alias));
                }
                actions.push(Action {
                    action_type,
                    alias,
                    version: body.version,
                    params: body.params,
                    resources: body.resources,
                    caches: body.caches,
                    timeout: body.timeout,
                    disable: body.disable,
                    snippet_config: body.snippet_config,
                });
            }
            stages.push(Stage { actions });
        }

        Ok(PipelineYml {
            version,
            cron: raw.cron.filter(|c| !c.trim().is_empty()),
            envs: raw.envs,
            params: raw.params,
            outputs: raw.outputs,
            storage: raw.storage,
            stages,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Five sequential stages with one action each
    pub(crate) const FIVE_STAGE_YML: &str = r#"
version: "1.1"
stages:
  - stage:
      - git-checkout:
          alias: git-checkout
  - stage:
      - java:
          alias: java-demo
          params:
            build_type: maven
            workdir: ${git-checkout}
            options: -am -pl user
            target: ./user/target/user.jar
          caches:
            - path: /root/.m2/repository
  - stage:
      - release:
          alias: release
          params:
            dice_yml: ${git-checkout}/dice.yml
            image:
              java-demo: ${java-demo:OUTPUT:image}
  - stage:
      - dice:
          alias: dice
          params:
            release_id: ${release:OUTPUT:releaseID}
  - stage:
      - snippet:
          alias: snippet
"#;

    #[test]
    fn test_parse_five_stages() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        assert_eq!(yml.version, "1.1");
        assert_eq!(yml.stages.len(), 5);

        let aliases: Vec<_> = yml.actions().map(|(_, a)| a.alias.as_str()).collect();
        assert_eq!(
            aliases,
            ["git-checkout", "java-demo", "release", "dice", "snippet"]
        );
        assert_eq!(yml.stages[1].actions[0].caches[0].path, "/root/.m2/repository");
        assert!(yml.stages[4].actions[0].is_snippet());
    }

    #[test]
    fn test_action_keys_skip_snippets() {
        let yml = PipelineYml::parse(FIVE_STAGE_YML).unwrap();
        assert_eq!(
            yml.action_keys(),
            ["git-checkout", "java", "release", "dice"]
        );
    }

    #[test]
    fn test_alias_defaults_to_type() {
        let yml = PipelineYml::parse(
            r#"
version: "1.1"
stages:
  - stage:
      - git-checkout:
"#,
        )
        .unwrap();
        assert_eq!(yml.stages[0].actions[0].alias, "git-checkout");
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let err = PipelineYml::parse(
            r#"
version: "1.1"
stages:
  - stage:
      - shell:
          alias: build
  - stage:
      - java:
          alias: build
"#,
        )
        .unwrap_err();
        assert!(matches!(err, YmlError::DuplicateAlias(alias) if alias == "build"));
    }

    #[test]
    fn test_two_keys_in_one_item_rejected() {
        let err = PipelineYml::parse(
            r#"
version: "1.1"
stages:
  - stage:
      - shell: {}
        java: {}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, YmlError::InvalidActionEntry { found: 2, .. }));
    }

    #[test]
    fn test_version_checks() {
        assert!(matches!(
            PipelineYml::parse("stages: []").unwrap_err(),
            YmlError::MissingVersion
        ));
        assert!(matches!(
            PipelineYml::parse("version: \"1.0\"\nstages: []").unwrap_err(),
            YmlError::UnsupportedVersion(v) if v == "1.0"
        ));
        // unquoted 1.1 is read as a float
        assert!(PipelineYml::parse("version: 1.1\nstages: []").is_ok());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            PipelineYml::parse("version: [unclosed").unwrap_err(),
            YmlError::Malformed(_)
        ));
    }

    #[test]
    fn test_params_outputs_and_resources() {
        let yml = PipelineYml::parse(
            r#"
version: "1.1"
cron: "0 0 * * *"
params:
  - name: branch
    required: true
    default: master
    type: string
outputs:
  - name: image
    ref: ${build:OUTPUT:image}
stages:
  - stage:
      - java:
          alias: build
          version: "1.0"
          resources:
            cpu: 1
            max_cpu: 2
            mem: 4096
"#,
        )
        .unwrap();
        assert_eq!(yml.cron.as_deref(), Some("0 0 * * *"));
        assert_eq!(yml.params[0].name, "branch");
        assert_eq!(yml.outputs[0].reference, "${build:OUTPUT:image}");
        let action = &yml.stages[0].actions[0];
        assert_eq!(action.type_version(), "java@1.0");
        assert_eq!(action.resources.max_cpu, 2.0);
        assert_eq!(action.resources.mem, 4096.0);
    }
}
