//! Pipeline Service
//!
//! Owns every collaborator a pipeline verb needs. The verbs themselves live
//! in the sibling modules (`create`, `graph`, `run`, `cancel`, `rerun`,
//! `detail`, `query`, `callback`), each adding an `impl PipelineService`
//! block.

use erda_core::domain::pipeline::{GcDefaults, Pipeline};
use erda_core::resource::ResourceCalculator;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::repository::pipeline_repository;
use crate::service::action_registry::ActionRegistry;
use crate::service::background::BackgroundPool;
use crate::service::cache::PipelineCache;
use crate::service::cms::CmsService;
use crate::service::edge::EdgeProxy;
use crate::service::engine::Engine;
use crate::service::error::{Result, ServiceError};
use crate::service::events::{EventSink, PipelineEvent};

/// External seams of the pipeline service
pub struct ServiceParts {
    pub registry: Arc<dyn ActionRegistry>,
    pub engine: Arc<dyn Engine>,
    pub events: Arc<dyn EventSink>,
    pub background: BackgroundPool,
    pub edge: EdgeProxy,
    pub cms: CmsService,
}

pub struct PipelineService {
    pub(crate) pool: PgPool,
    pub(crate) calculator: ResourceCalculator,
    pub(crate) gc_defaults: GcDefaults,
    pub(crate) cache: Arc<PipelineCache>,
    pub(crate) registry: Arc<dyn ActionRegistry>,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) background: BackgroundPool,
    pub(crate) edge: EdgeProxy,
    pub(crate) cms: CmsService,
}

impl PipelineService {
    pub fn new(pool: PgPool, config: &Config, parts: ServiceParts) -> Self {
        Self {
            pool,
            calculator: config.resource_calculator(),
            gc_defaults: config.gc,
            cache: Arc::new(PipelineCache::new()),
            registry: parts.registry,
            engine: parts.engine,
            events: parts.events,
            background: parts.background,
            edge: parts.edge,
            cms: parts.cms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    pub(crate) async fn get_pipeline(&self, id: i64) -> Result<Pipeline> {
        pipeline_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("pipeline {id}")))
    }

    /// Deliver an event off the request path
    pub(crate) fn emit(&self, event: PipelineEvent) {
        let sink = Arc::clone(&self.events);
        let name = format!("{} event", event.name());
        self.background
            .submit(name, async move { sink.send(&event).await });
    }
}
