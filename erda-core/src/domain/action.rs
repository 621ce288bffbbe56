//! Action definitions
//!
//! An action is a reusable step (`git-checkout`, `java`, `release`, ...).
//! The registry resolves `type@version` into a job definition (what to run)
//! and a spec (which params and outputs it declares).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Build the registry key for an action. A missing version means "default".
pub fn action_key(action_type: &str, version: Option<&str>) -> String {
    match version.filter(|v| !v.is_empty()) {
        Some(v) => format!("{action_type}@{v}"),
        None => action_type.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub action_type: String,
    pub version: String,
    pub job: JobDefinition,
    pub spec: ActionSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefinition {
    pub image: String,
    pub cmd: Option<String>,
    pub resources: JobDefResources,
}

/// Resource defaults declared by an action's job definition
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefResources {
    pub cpu: f64,
    pub max_cpu: f64,
    pub mem: f64,
    pub max_mem: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSpec {
    pub desc: Option<String>,
    pub params: Vec<ActionParamSpec>,
    pub outputs: Vec<ActionOutputSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParamSpec {
    pub name: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionOutputSpec {
    pub name: String,
    pub desc: Option<String>,
}

/// Action definitions fetched once for one create call, keyed by `type@version`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassedDataWhenCreate {
    actions: HashMap<String, ActionDefinition>,
}

impl PassedDataWhenCreate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, def: ActionDefinition) {
        self.actions.insert(key.into(), def);
    }

    pub fn get(&self, key: &str) -> Option<&ActionDefinition> {
        self.actions.get(key)
    }

    /// Keys from `wanted` that have not been fetched yet
    pub fn missing<'a>(&self, wanted: &'a [String]) -> Vec<&'a String> {
        wanted
            .iter()
            .filter(|k| !self.actions.contains_key(k.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<(String, ActionDefinition)> for PassedDataWhenCreate {
    fn from_iter<I: IntoIterator<Item = (String, ActionDefinition)>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}
