//! Config management (CMS) domain types
//!
//! Configs are namespaced key/value pairs used as pipeline secrets. A value
//! may be stored encrypted, in which case it is decrypted before it is
//! injected into a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsConfig {
    pub key: String,
    pub value: String,
    pub encrypt: bool,
    #[serde(default)]
    pub config_type: ConfigType,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigType {
    #[default]
    Kv,
    DiceFile,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Kv => "kv",
            ConfigType::DiceFile => "dice-file",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "dice-file" => ConfigType::DiceFile,
            _ => ConfigType::Kv,
        }
    }
}
