//! Pipeline cache
//!
//! Memoizes per-pipeline data that is read several times while one request
//! works on a pipeline: its stages, its parsed yml, the successful tasks of a
//! rerun-failed origin and the action definitions fetched at create time.
//! Decrypted secrets are never cached; they only live in the run snapshot.
//!
//! Entries live until the [`CacheScope`] opened for the pipeline is dropped.

use dashmap::DashMap;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use erda_core::domain::action::PassedDataWhenCreate;
use erda_core::domain::pipeline::{Pipeline, PipelineType};
use erda_core::domain::stage::PipelineStage;
use erda_core::domain::task::PipelineTask;
use erda_core::yml::{PipelineYml, YmlError};
use sqlx::PgPool;

use crate::repository::{stage_repository, task_repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Stages,
    PipelineYml,
    RerunSuccessTasks,
    PassedData,
}

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct PipelineCache {
    entries: DashMap<(i64, CacheKind), Entry>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope for a pipeline. Every entry of the pipeline is cleared
    /// when the returned scope is dropped.
    pub fn scope(self: &Arc<Self>, pipeline_id: i64) -> CacheScope {
        CacheScope {
            cache: Arc::clone(self),
            pipeline_id,
        }
    }

    /// Remove every entry of a pipeline
    pub fn clear(&self, pipeline_id: i64) {
        self.entries.retain(|(id, _), _| *id != pipeline_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get<T: Any + Send + Sync>(&self, pipeline_id: i64, kind: CacheKind) -> Option<Arc<T>> {
        // clone out of the shard before downcasting so no guard outlives this call
        let entry = self.entries.get(&(pipeline_id, kind))?.value().clone();
        entry.downcast::<T>().ok()
    }

    fn set<T: Any + Send + Sync>(&self, pipeline_id: i64, kind: CacheKind, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries
            .insert((pipeline_id, kind), value.clone() as Entry);
        value
    }

    /// Return the cached value or load and cache it
    ///
    /// Two concurrent misses may both load; the last write wins.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        pipeline_id: i64,
        kind: CacheKind,
        load: F,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(pipeline_id, kind) {
            return Ok(hit);
        }
        let value = load().await?;
        Ok(self.set(pipeline_id, kind, value))
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub async fn get_or_set_stages(
        &self,
        pool: &PgPool,
        pipeline_id: i64,
    ) -> Result<Arc<Vec<PipelineStage>>, sqlx::Error> {
        self.get_or_load(pipeline_id, CacheKind::Stages, || {
            stage_repository::find_by_pipeline(pool, pipeline_id)
        })
        .await
    }

    pub fn get_or_set_pipeline_yml(&self, p: &Pipeline) -> Result<Arc<PipelineYml>, YmlError> {
        if let Some(hit) = self.get::<PipelineYml>(p.id(), CacheKind::PipelineYml) {
            return Ok(hit);
        }
        let yml = PipelineYml::parse(&p.extra.pipeline_yml)?;
        Ok(self.set(p.id(), CacheKind::PipelineYml, yml))
    }

    /// Successful tasks of the origin of a rerun-failed pipeline, by name
    ///
    /// Empty for any other pipeline type.
    pub async fn get_or_set_rerun_success_tasks(
        &self,
        pool: &PgPool,
        p: &Pipeline,
    ) -> Result<Arc<BTreeMap<String, PipelineTask>>, sqlx::Error> {
        self.get_or_load(p.id(), CacheKind::RerunSuccessTasks, || async move {
            let Some(detail) = p
                .extra
                .rerun_failed_detail
                .as_ref()
                .filter(|_| p.base.pipeline_type == PipelineType::RerunFailed)
            else {
                return Ok(BTreeMap::new());
            };

            let origin_tasks =
                task_repository::find_by_pipeline(pool, detail.origin_pipeline_id).await?;
            Ok(origin_tasks
                .into_iter()
                .filter(|t| detail.success_tasks.get(&t.name) == Some(&t.id))
                .map(|t| (t.name.clone(), t))
                .collect())
        })
        .await
    }

    pub fn set_passed_data(&self, pipeline_id: i64, passed: PassedDataWhenCreate) {
        self.set(pipeline_id, CacheKind::PassedData, passed);
    }

    pub fn get_passed_data(&self, pipeline_id: i64) -> Option<Arc<PassedDataWhenCreate>> {
        self.get(pipeline_id, CacheKind::PassedData)
    }
}

/// Guard bounding the cache lifetime of one pipeline
pub struct CacheScope {
    cache: Arc<PipelineCache>,
    pipeline_id: i64,
}

impl CacheScope {
    pub fn pipeline_id(&self) -> i64 {
        self.pipeline_id
    }
}

impl Deref for CacheScope {
    type Target = PipelineCache;

    fn deref(&self) -> &PipelineCache {
        &self.cache
    }
}

impl Drop for CacheScope {
    fn drop(&mut self) {
        self.cache.clear(self.pipeline_id);
        tracing::debug!("cleared cache of pipeline {}", self.pipeline_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_with_yml(id: i64, yml: &str) -> Pipeline {
        let mut p = Pipeline::default();
        p.base.id = id;
        p.extra.pipeline_yml = yml.to_string();
        p
    }

    #[tokio::test]
    async fn test_scope_drop_clears_only_its_pipeline() {
        let cache = Arc::new(PipelineCache::new());
        {
            let scope = cache.scope(1);
            scope.set_passed_data(1, PassedDataWhenCreate::new());
            scope
                .get_or_set_pipeline_yml(&pipeline_with_yml(1, "version: \"1.1\"\nstages: []\n"))
                .unwrap();
            cache.set_passed_data(2, PassedDataWhenCreate::new());
            assert_eq!(cache.len(), 3);
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.get_passed_data(1).is_none());
        assert!(cache.get_passed_data(2).is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_loads_once() {
        let cache = PipelineCache::new();
        let mut calls = 0;

        let first: Arc<i32> = cache
            .get_or_load(7, CacheKind::Stages, || {
                calls += 1;
                async { Ok::<_, ()>(42) }
            })
            .await
            .unwrap();
        assert_eq!(*first, 42);

        let second: Arc<i32> = cache
            .get_or_load(7, CacheKind::Stages, || async { Err(()) })
            .await
            .unwrap();
        assert_eq!(*second, 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_load_error_is_not_cached() {
        let cache = PipelineCache::new();
        let res: Result<Arc<i32>, &str> = cache
            .get_or_load(7, CacheKind::Stages, || async { Err("db down") })
            .await;
        assert!(res.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pipeline_yml_is_memoized() {
        let cache = PipelineCache::new();
        let p = pipeline_with_yml(3, "version: \"1.1\"\nstages: []\n");
        let a = cache.get_or_set_pipeline_yml(&p).unwrap();
        let b = cache.get_or_set_pipeline_yml(&p).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let broken = pipeline_with_yml(4, "stages: [");
        assert!(cache.get_or_set_pipeline_yml(&broken).is_err());
    }
}
