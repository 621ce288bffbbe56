//! Action registry
//!
//! Resolves `type@version` keys into action definitions. A create request
//! searches every key of its yml at once.

use async_trait::async_trait;
use erda_core::domain::action::{ActionDefinition, PassedDataWhenCreate};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::repository::action_repository;
use crate::service::error::{Result, ServiceError};

#[async_trait]
pub trait ActionRegistry: Send + Sync {
    /// Look up every key. A key the registry does not know is an error.
    async fn search_actions(&self, keys: &[String]) -> Result<PassedDataWhenCreate>;
}

fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('@') {
        Some((action_type, version)) if !version.is_empty() => (action_type, Some(version)),
        Some((action_type, _)) => (action_type, None),
        None => (key, None),
    }
}

fn unknown_action(key: &str) -> ServiceError {
    ServiceError::InvalidParameter(format!("action {key} not found in registry"))
}

/// Registry backed by the `pipeline_actions` table
pub struct DbActionRegistry {
    pool: PgPool,
}

impl DbActionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionRegistry for DbActionRegistry {
    async fn search_actions(&self, keys: &[String]) -> Result<PassedDataWhenCreate> {
        let mut passed = PassedDataWhenCreate::new();
        for key in keys {
            let (action_type, version) = split_key(key);
            let def = action_repository::find(&self.pool, action_type, version)
                .await?
                .ok_or_else(|| unknown_action(key))?;
            passed.put(key.clone(), def);
        }
        tracing::debug!("resolved {} action(s) from registry", passed.len());
        Ok(passed)
    }
}

/// In-memory registry. Keys without a version resolve to the entry
/// registered as default for the type.
#[derive(Default)]
pub struct StaticActionRegistry {
    actions: HashMap<String, ActionDefinition>,
}

impl StaticActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, def: ActionDefinition, is_default: bool) -> Self {
        if is_default {
            self.actions.insert(def.action_type.clone(), def.clone());
        }
        self.actions
            .insert(format!("{}@{}", def.action_type, def.version), def);
        self
    }
}

#[async_trait]
impl ActionRegistry for StaticActionRegistry {
    async fn search_actions(&self, keys: &[String]) -> Result<PassedDataWhenCreate> {
        keys.iter()
            .map(|key| {
                self.actions
                    .get(key)
                    .map(|def| (key.clone(), def.clone()))
                    .ok_or_else(|| unknown_action(key))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(action_type: &str, version: &str, image: &str) -> ActionDefinition {
        let mut d = ActionDefinition {
            action_type: action_type.into(),
            version: version.into(),
            ..Default::default()
        };
        d.job.image = image.into();
        d
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("java@1.0"), ("java", Some("1.0")));
        assert_eq!(split_key("java"), ("java", None));
        assert_eq!(split_key("java@"), ("java", None));
    }

    #[tokio::test]
    async fn test_static_registry_resolves_default_and_versions() {
        let registry = StaticActionRegistry::new()
            .with_action(def("java", "1.0", "java:1.0"), false)
            .with_action(def("java", "2.0", "java:2.0"), true);

        let passed = registry
            .search_actions(&["java".to_string(), "java@1.0".to_string()])
            .await
            .unwrap();
        assert_eq!(passed.get("java").unwrap().job.image, "java:2.0");
        assert_eq!(passed.get("java@1.0").unwrap().job.image, "java:1.0");
    }

    #[tokio::test]
    async fn test_static_registry_unknown_action() {
        let registry = StaticActionRegistry::new();
        let err = registry
            .search_actions(&["release".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParameter(_)));
    }
}
