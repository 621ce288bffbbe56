//! Config management DTOs

use serde::{Deserialize, Serialize};

use crate::domain::cms::{CmsConfig, ConfigType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CmsConfigInput {
    pub key: String,
    pub value: String,
    pub encrypt: bool,
    pub config_type: ConfigType,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfigsRequest {
    pub pipeline_source: String,
    pub configs: Vec<CmsConfigInput>,
}

/// Query of the get endpoint. `keys` is comma separated, absent means every
/// key of the namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetConfigsRequest {
    pub keys: Option<String>,
    pub decrypt: bool,
}

impl GetConfigsRequest {
    pub fn key_list(&self) -> Vec<String> {
        split_keys(self.keys.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteConfigsRequest {
    pub keys: Option<String>,
}

impl DeleteConfigsRequest {
    pub fn key_list(&self) -> Vec<String> {
        split_keys(self.keys.as_deref())
    }
}

fn split_keys(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigsResponse {
    pub ns: String,
    pub configs: Vec<CmsConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_list() {
        let req = GetConfigsRequest {
            keys: Some("a, b,,c".into()),
            decrypt: true,
        };
        assert_eq!(req.key_list(), ["a", "b", "c"]);
        assert!(DeleteConfigsRequest::default().key_list().is_empty());
    }
}
