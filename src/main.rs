//! kaasmon - multi-tenant monitoring engine
//!
//! Metric catalog, value store, query proxy and alert evaluation for a
//! Kubernetes-as-a-service platform.

mod config;
mod db;
mod error;
mod query;
mod scheduler;
mod telemetry;
mod web;

use config::ServerConfig;
use db::Store;
use query::PrometheusClient;
use scheduler::{AlertEngine, RetentionManager, Scheduler};
use telemetry::Telemetry;
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("kaasmon=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    tracing::info!("Starting kaasmon on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let client = PrometheusClient::new(&cfg.monitoring.prometheus_url, cfg.monitoring.query_timeout)?;
    tracing::info!("Query backend at {}", client.base_url());

    let telemetry = Arc::new(Telemetry::new()?);
    if cfg.monitoring.enable_metrics {
        let metrics = telemetry.clone();
        let (port, path) = (cfg.monitoring.metrics_port, cfg.monitoring.metrics_path.clone());
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(port, path).await {
                tracing::error!("Telemetry: Metrics listener failed: {}", e);
            }
        });
    }

    // Start background managers
    let engine = Arc::new(AlertEngine::new(store.clone(), client.clone(), telemetry.clone()));
    let retention = RetentionManager::new(store.clone(), cfg.monitoring.retention_period);
    let scheduler = Scheduler::new(engine.clone(), retention, cfg.monitoring.clone());
    scheduler.start();

    // Start web server
    let server = Server::new(AppState {
        config: cfg,
        store,
        engine,
        client,
        telemetry,
    });
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down background managers");
    scheduler.stop().await;

    Ok(())
}
