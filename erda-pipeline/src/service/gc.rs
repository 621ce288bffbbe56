//! Pipeline GC
//!
//! Periodically removes pipelines whose database TTL elapsed, archiving them
//! first when asked to, and marks finished pipelines whose resource TTL
//! elapsed as reclaimed.

use erda_core::domain::pipeline::{GcDefaults, Pipeline};
use erda_core::domain::status::PipelineStatus;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::repository::{archive_repository, pipeline_repository, stage_repository, task_repository};
use crate::service::cache::PipelineCache;

/// Pipelines handled per GC kind and round
const GC_BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub archived: usize,
    pub deleted: usize,
    pub resources_reclaimed: usize,
}

pub struct GcRunner {
    pool: PgPool,
    defaults: GcDefaults,
    interval: Duration,
    cache: Arc<PipelineCache>,
}

impl GcRunner {
    pub fn new(
        pool: PgPool,
        defaults: GcDefaults,
        interval: Duration,
        cache: Arc<PipelineCache>,
    ) -> Self {
        Self {
            pool,
            defaults,
            interval,
            cache,
        }
    }

    /// Run GC rounds until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Pipeline GC started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Pipeline GC stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report == GcReport::default() => debug!("GC round found nothing to do"),
                        Ok(report) => info!(
                            "GC round: {} archived, {} deleted, {} resource(s) reclaimed",
                            report.archived, report.deleted, report.resources_reclaimed
                        ),
                        Err(e) => error!("[alert] GC round failed: {}", e),
                    }
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<GcReport, sqlx::Error> {
        let mut report = GcReport::default();

        let analyzed = pipeline_repository::find_database_gc_candidates(
            &self.pool,
            &[PipelineStatus::Analyzed],
            "analyzed",
            self.defaults.analyzed_database_ttl,
            GC_BATCH_SIZE,
        )
        .await?;
        for p in analyzed {
            let archive = p.extra.gc.database.analyzed.need_archive.unwrap_or(false);
            self.gc_database(&p, archive, &mut report).await?;
        }

        let finished = pipeline_repository::find_database_gc_candidates(
            &self.pool,
            &PipelineStatus::end_statuses(),
            "finished",
            self.defaults.finished_database_ttl,
            GC_BATCH_SIZE,
        )
        .await?;
        for p in finished {
            let archive = p.extra.gc.database.finished.need_archive.unwrap_or(true);
            self.gc_database(&p, archive, &mut report).await?;
        }

        let reclaimable = pipeline_repository::find_resource_gc_candidates(
            &self.pool,
            self.defaults.success_resource_ttl,
            self.defaults.failed_resource_ttl,
            GC_BATCH_SIZE,
        )
        .await?;
        for p in reclaimable {
            pipeline_repository::mark_complete_reconciler_gc(&self.pool, p.id()).await?;
            debug!("resources of pipeline {} reclaimed", p.id());
            report.resources_reclaimed += 1;
        }

        Ok(report)
    }

    async fn gc_database(
        &self,
        p: &Pipeline,
        archive: bool,
        report: &mut GcReport,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if archive {
            let stages = stage_repository::find_by_pipeline(&mut *tx, p.id()).await?;
            let tasks = task_repository::find_by_pipeline(&mut *tx, p.id()).await?;
            let archive_id = archive_repository::insert(&mut *tx, p, &stages, &tasks).await?;
            debug!("pipeline {} archived as {}", p.id(), archive_id);
            report.archived += 1;
        }
        if pipeline_repository::delete(&mut *tx, p.id()).await? {
            report.deleted += 1;
        }
        tx.commit().await?;

        self.cache.clear(p.id());
        Ok(())
    }
}

#[cfg(all(test, feature = "db-tests"))]
mod db_tests {
    use super::*;

    use crate::db;
    use crate::service::testing::{count, insert_pipeline};

    fn runner(pool: PgPool) -> GcRunner {
        let defaults = GcDefaults {
            analyzed_database_ttl: 3_600,
            finished_database_ttl: 7_200,
            success_resource_ttl: 60,
            failed_resource_ttl: 60,
        };
        GcRunner::new(
            pool,
            defaults,
            Duration::from_secs(60),
            Arc::new(PipelineCache::new()),
        )
    }

    async fn exists(pool: &PgPool, id: i64) -> bool {
        pipeline_repository::find_by_id(pool, id)
            .await
            .unwrap()
            .is_some()
    }

    #[sqlx::test(migrations = false)]
    async fn test_analyzed_and_finished_ttls_apply_separately(pool: PgPool) {
        db::run_migrations(&pool).await.unwrap();
        let fresh_analyzed = insert_pipeline(&pool, PipelineStatus::Analyzed, 60).await;
        let old_analyzed = insert_pipeline(&pool, PipelineStatus::Analyzed, 5_000).await;
        let fresh_finished = insert_pipeline(&pool, PipelineStatus::Success, 5_000).await;
        let old_finished = insert_pipeline(&pool, PipelineStatus::Failed, 10_000).await;

        let report = runner(pool.clone()).run_once().await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.archived, 1);
        assert!(exists(&pool, fresh_analyzed.id()).await);
        assert!(!exists(&pool, old_analyzed.id()).await);
        assert!(exists(&pool, fresh_finished.id()).await);
        assert!(!exists(&pool, old_finished.id()).await);

        let archived: i64 = sqlx::query_scalar("SELECT pipeline_id FROM pipeline_archives")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(archived, old_finished.id());

        // the surviving finished pipeline is past its resource TTL
        assert_eq!(report.resources_reclaimed, 1);
        let reclaimed = pipeline_repository::find_by_id(&pool, fresh_finished.id())
            .await
            .unwrap()
            .unwrap();
        assert!(reclaimed.extra.complete_reconciler_gc);
    }

    #[sqlx::test(migrations = false)]
    async fn test_analyzed_pipeline_archived_when_asked(pool: PgPool) {
        db::run_migrations(&pool).await.unwrap();
        let mut p = insert_pipeline(&pool, PipelineStatus::Analyzed, 5_000).await;
        p.extra.gc.database.analyzed.need_archive = Some(true);
        pipeline_repository::update_extra(&pool, p.id(), &p.extra)
            .await
            .unwrap();

        let report = runner(pool.clone()).run_once().await.unwrap();

        assert_eq!(report.archived, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(count(&pool, "pipeline_archives").await, 1);
    }

    #[sqlx::test(migrations = false)]
    async fn test_rounds_are_batched(pool: PgPool) {
        db::run_migrations(&pool).await.unwrap();
        for _ in 0..GC_BATCH_SIZE + 1 {
            insert_pipeline(&pool, PipelineStatus::Failed, 10_000).await;
        }
        let gc = runner(pool.clone());

        let first = gc.run_once().await.unwrap();
        assert_eq!(first.deleted, GC_BATCH_SIZE as usize);
        assert_eq!(first.archived, GC_BATCH_SIZE as usize);
        assert_eq!(count(&pool, "pipeline_bases").await, 1);

        let second = gc.run_once().await.unwrap();
        assert_eq!(second.deleted, 1);
        assert_eq!(count(&pool, "pipeline_bases").await, 0);
    }
}
