//! Erda Pipeline Service
//!
//! Turns pipeline YAML into persisted pipelines, stages and tasks, and
//! exposes create, run, cancel, rerun, query and config management over HTTP.
//!
//! Architecture:
//! - Configuration: settings from environment with defaults
//! - Repositories: Postgres access through sqlx
//! - Services: pipeline verbs, config management, cache, GC, events
//! - API: axum handlers wrapping results in the response envelope
//!
//! Execution itself belongs to the reconciler, which consumes the
//! `pipeline_dispatches` outbox.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod state;

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::service::action_registry::DbActionRegistry;
use crate::service::background::BackgroundPool;
use crate::service::cipher::RsaCipher;
use crate::service::edge::EdgeProxy;
use crate::service::engine::OutboxEngine;
use crate::service::events::sink_from_config;
use crate::service::gc::GcRunner;
use crate::service::{CmsService, PipelineService, ServiceParts};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "erda_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Erda Pipeline...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: role={:?}, edge clusters={}",
        config.role,
        config.edge_clusters.len()
    );

    info!("Connecting to database...");
    let pool = connect_with_retry(&config).await?;
    info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let cipher = match config.cms_private_key_path.as_deref() {
        Some(path) => Some(Arc::new(
            RsaCipher::from_file(path).context("Failed to load config encryption key")?,
        )),
        None => {
            warn!("CMS_RSA_PRIVATE_KEY_PATH not set, encrypted configs are unavailable");
            None
        }
    };
    let cms = CmsService::new(pool.clone(), cipher);

    let shutdown = CancellationToken::new();
    let (background, workers) = BackgroundPool::start(
        config.background_workers,
        config.background_queue_size,
        shutdown.clone(),
    );

    let parts = ServiceParts {
        registry: Arc::new(DbActionRegistry::new(pool.clone())),
        engine: Arc::new(OutboxEngine::new(pool.clone())),
        events: sink_from_config(reqwest::Client::new(), config.event_webhook_url.as_deref()),
        background,
        edge: EdgeProxy::from_config(&config)?,
        cms: cms.clone(),
    };
    let pipelines = PipelineService::new(pool.clone(), &config, parts);

    let gc = GcRunner::new(
        pool.clone(),
        config.gc,
        config.gc_interval,
        Arc::clone(pipelines.cache()),
    );
    let gc_handle = tokio::spawn(gc.run(shutdown.clone()));

    info!("Services initialized");

    // Build router with all API endpoints
    let app = api::create_router(AppState::new(pipelines, cms));

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = gc_handle.await {
        error!("GC task panicked: {}", e);
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Background worker panicked: {}", e);
        }
    }

    info!("Erda Pipeline stopped");
    Ok(())
}

/// Connect to the database with exponential backoff
///
/// The database may still be starting when the service comes up in a
/// container environment.
async fn connect_with_retry(config: &Config) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(&config.database_url, config.db_max_connections).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to create database pool: {}", e));
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
