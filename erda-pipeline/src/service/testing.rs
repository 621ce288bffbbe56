//! Database-backed fixtures for service tests
//!
//! Compiled with the `db-tests` feature; `#[sqlx::test]` hands every test a
//! fresh database from `DATABASE_URL`.

use async_trait::async_trait;
use erda_core::domain::pipeline::Pipeline;
use erda_core::domain::status::PipelineStatus;
use erda_core::dto::Identity;
use erda_core::dto::pipeline::CreatePipelineRequestV2;
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db;
use crate::repository::pipeline_repository;
use crate::service::action_registry::StaticActionRegistry;
use crate::service::background::BackgroundPool;
use crate::service::edge::EdgeProxy;
use crate::service::engine::Engine;
use crate::service::events::LogEventSink;
use crate::service::{CmsService, PipelineService, ServiceParts};

pub(crate) const EMPTY_YML: &str = "version: \"1.1\"\nstages: []\n";

/// Engine counting hand-overs instead of writing the outbox
#[derive(Default)]
pub(crate) struct CountingEngine {
    pub distributed: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl CountingEngine {
    pub(crate) fn distributed(&self) -> usize {
        self.distributed.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for CountingEngine {
    async fn distribute(&self, _pipeline_id: i64) -> anyhow::Result<()> {
        self.distributed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _pipeline_id: i64) -> anyhow::Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Migrated service over `pool` with a counting engine
pub(crate) async fn service(pool: PgPool, edge: EdgeProxy) -> (PipelineService, Arc<CountingEngine>) {
    db::run_migrations(&pool).await.unwrap();

    let engine = Arc::new(CountingEngine::default());
    let (background, _workers) = BackgroundPool::start(1, 16, CancellationToken::new());
    let parts = ServiceParts {
        registry: Arc::new(StaticActionRegistry::new()),
        engine: engine.clone(),
        events: Arc::new(LogEventSink),
        background,
        edge,
        cms: CmsService::new(pool.clone(), None),
    };
    let svc = PipelineService::new(pool, &Config::default(), parts);
    (svc, engine)
}

pub(crate) fn identity() -> Identity {
    Identity {
        user_id: Some("1".into()),
        internal_client: None,
    }
}

pub(crate) fn create_request(source: &str, cluster_name: &str, yml: &str) -> CreatePipelineRequestV2 {
    CreatePipelineRequestV2 {
        pipeline_yml: yml.to_string(),
        pipeline_source: source.to_string(),
        cluster_name: cluster_name.to_string(),
        identity: identity(),
        ..Default::default()
    }
}

/// Insert a bare pipeline row in `status`, last touched `age_secs` ago
pub(crate) async fn insert_pipeline(pool: &PgPool, status: PipelineStatus, age_secs: i64) -> Pipeline {
    let at = chrono::Utc::now() - chrono::Duration::seconds(age_secs);
    let mut p = Pipeline::default();
    p.base.source = "dice".into();
    p.base.cluster_name = "terminus-dev".into();
    p.base.status = status;
    p.base.created_at = at;
    p.base.updated_at = at;
    if status.is_end() {
        p.base.time_end = Some(at);
    }
    p.extra.pipeline_yml = EMPTY_YML.to_string();

    let mut conn = pool.acquire().await.unwrap();
    pipeline_repository::insert(&mut conn, &mut p).await.unwrap();
    p
}

pub(crate) async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}
