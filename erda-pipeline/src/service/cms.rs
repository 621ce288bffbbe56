//! Config Management Service
//!
//! Namespaced configs used as pipeline secrets. Values flagged `encrypt` are
//! stored RSA-encrypted and decrypted on demand, at most
//! [`MAX_PARALLEL_DECRYPT`] at a time.

use chrono::Utc;
use erda_core::domain::cms::CmsConfig;
use erda_core::dto::cms::{ConfigsResponse, UpdateConfigsRequest};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::repository::cms_repository;
use crate::service::cipher::RsaCipher;
use crate::service::error::{Result, ServiceError};

pub const MAX_PARALLEL_DECRYPT: usize = 10;

#[derive(Clone)]
pub struct CmsService {
    pool: PgPool,
    cipher: Option<Arc<RsaCipher>>,
}

impl CmsService {
    pub fn new(pool: PgPool, cipher: Option<Arc<RsaCipher>>) -> Self {
        Self { pool, cipher }
    }

    /// Create or update configs, creating the namespace on first use
    pub async fn update_configs(&self, ns: &str, req: UpdateConfigsRequest) -> Result<()> {
        if ns.trim().is_empty() {
            return Err(ServiceError::MissingParameter("ns".to_string()));
        }
        if req.pipeline_source.trim().is_empty() {
            return Err(ServiceError::MissingParameter("pipelineSource".to_string()));
        }

        let now = Utc::now();
        let mut configs = Vec::with_capacity(req.configs.len());
        for input in req.configs {
            if input.key.trim().is_empty() {
                return Err(ServiceError::MissingParameter("config key".to_string()));
            }
            let value = if input.encrypt {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    ServiceError::InvalidParameter(format!(
                        "config {} requires encryption but no key is configured",
                        input.key
                    ))
                })?;
                cipher
                    .encrypt(&input.value)
                    .map_err(|e| ServiceError::Internal(e.to_string()))?
            } else {
                input.value
            };
            configs.push(CmsConfig {
                key: input.key,
                value,
                encrypt: input.encrypt,
                config_type: input.config_type,
                comment: input.comment,
                created_at: now,
                updated_at: now,
            });
        }

        let mut tx = self.pool.begin().await?;
        let ns_id = cms_repository::ensure_ns(&mut *tx, &req.pipeline_source, ns).await?;
        for config in &configs {
            cms_repository::upsert_config(&mut *tx, ns_id, config).await?;
        }
        tx.commit().await?;

        tracing::info!("Updated {} config(s) of namespace {}", configs.len(), ns);
        Ok(())
    }

    /// Configs of a namespace, decrypted when asked to
    pub async fn get_configs(
        &self,
        ns: &str,
        keys: &[String],
        decrypt: bool,
    ) -> Result<ConfigsResponse> {
        let ns_id = cms_repository::find_ns_id(&self.pool, ns)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("namespace {ns}")))?;

        let configs = cms_repository::find_configs(&self.pool, ns_id, keys).await?;
        let configs = if decrypt {
            self.decrypt_configs(configs).await?
        } else {
            configs
        };

        Ok(ConfigsResponse {
            ns: ns.to_string(),
            configs,
        })
    }

    pub async fn delete_configs(&self, ns: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Err(ServiceError::MissingParameter("keys".to_string()));
        }
        let ns_id = cms_repository::find_ns_id(&self.pool, ns)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("namespace {ns}")))?;

        let deleted = cms_repository::delete_configs(&self.pool, ns_id, keys).await?;
        tracing::info!("Deleted {} config(s) of namespace {}", deleted, ns);
        Ok(())
    }

    /// Decrypted key/values of several namespaces. Later namespaces override
    /// earlier ones; unknown namespaces are skipped.
    pub async fn fetch_secrets(&self, namespaces: &[String]) -> Result<BTreeMap<String, String>> {
        let mut secrets = BTreeMap::new();
        for ns in namespaces {
            let Some(ns_id) = cms_repository::find_ns_id(&self.pool, ns).await? else {
                tracing::debug!("config namespace {} not found, skipped", ns);
                continue;
            };
            let configs = cms_repository::find_configs(&self.pool, ns_id, &[]).await?;
            for config in self.decrypt_configs(configs).await? {
                secrets.insert(config.key, config.value);
            }
        }
        Ok(secrets)
    }

    async fn decrypt_configs(&self, configs: Vec<CmsConfig>) -> Result<Vec<CmsConfig>> {
        decrypt_configs(self.cipher.clone(), configs).await
    }
}

/// Decrypt every encrypted config, preserving order
async fn decrypt_configs(
    cipher: Option<Arc<RsaCipher>>,
    configs: Vec<CmsConfig>,
) -> Result<Vec<CmsConfig>> {
    if !configs.iter().any(|c| c.encrypt) {
        return Ok(configs);
    }
    let cipher = cipher.ok_or_else(|| {
        ServiceError::Internal("encrypted configs found but no key is configured".to_string())
    })?;

    let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_DECRYPT));
    let mut set = JoinSet::new();
    let total = configs.len();

    for (idx, mut config) in configs.into_iter().enumerate() {
        let cipher = Arc::clone(&cipher);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            if !config.encrypt {
                return Ok((idx, config));
            }
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            let value = config.value.clone();
            let plain = tokio::task::spawn_blocking(move || cipher.decrypt(&value))
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?
                .map_err(|e| {
                    ServiceError::Internal(format!("failed to decrypt config {}: {e}", config.key))
                })?;
            config.value = plain;
            config.encrypt = false;
            Ok::<_, ServiceError>((idx, config))
        });
    }

    let mut decrypted: Vec<Option<CmsConfig>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        let (idx, config) = joined.map_err(|e| ServiceError::Internal(e.to_string()))??;
        decrypted[idx] = Some(config);
    }
    Ok(decrypted.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use erda_core::domain::cms::ConfigType;

    fn config(key: &str, value: &str, encrypt: bool) -> CmsConfig {
        let now = Utc::now();
        CmsConfig {
            key: key.into(),
            value: value.into(),
            encrypt,
            config_type: ConfigType::Kv,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_decrypt_configs_keeps_order() {
        let cipher = Arc::new(RsaCipher::generate(1024).unwrap());
        let configs: Vec<CmsConfig> = (0..25)
            .map(|i| {
                let plain = format!("value-{i}");
                if i % 2 == 0 {
                    config(&format!("k{i}"), &cipher.encrypt(&plain).unwrap(), true)
                } else {
                    config(&format!("k{i}"), &plain, false)
                }
            })
            .collect();

        let out = decrypt_configs(Some(cipher), configs).await.unwrap();
        assert_eq!(out.len(), 25);
        for (i, c) in out.iter().enumerate() {
            assert_eq!(c.key, format!("k{i}"));
            assert_eq!(c.value, format!("value-{i}"));
            assert!(!c.encrypt);
        }
    }

    #[tokio::test]
    async fn test_plain_configs_need_no_key() {
        let out = decrypt_configs(None, vec![config("a", "1", false)])
            .await
            .unwrap();
        assert_eq!(out[0].value, "1");
    }

    #[tokio::test]
    async fn test_encrypted_config_without_key_fails() {
        let err = decrypt_configs(None, vec![config("a", "xx", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }
}
