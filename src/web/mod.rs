//! Web server module.

mod auth;
mod extract;
mod handlers;

pub use auth::*;
pub use extract::*;
pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::query::PrometheusClient;
use crate::scheduler::AlertEngine;
use crate::telemetry::Telemetry;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub engine: Arc<AlertEngine>,
    pub client: PrometheusClient,
    pub telemetry: Arc<Telemetry>,
}

/// API server of the monitoring engine.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server on the configured port and run until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Route table: org-scoped, workspace-scoped and internal endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let org = Router::new()
        // Metric definitions
        .route("/metrics", get(handlers::handle_list_metrics).post(handlers::handle_create_metric))
        .route(
            "/metrics/{id}",
            get(handlers::handle_get_metric)
                .put(handlers::handle_update_metric)
                .delete(handlers::handle_delete_metric),
        )
        .route(
            "/metrics/{id}/values",
            get(handlers::handle_get_values).post(handlers::handle_record_value),
        )
        // Query proxy
        .route("/query", post(handlers::handle_query))
        .route("/query_range", post(handlers::handle_query_range))
        // Alert rules and alerts
        .route(
            "/alerts/rules",
            get(handlers::handle_list_alert_rules).post(handlers::handle_create_alert_rule),
        )
        .route(
            "/alerts/rules/{id}",
            get(handlers::handle_get_alert_rule)
                .put(handlers::handle_update_alert_rule)
                .delete(handlers::handle_delete_alert_rule),
        )
        .route("/alerts", get(handlers::handle_list_alerts))
        .route("/alerts/{id}", get(handlers::handle_get_alert))
        .route("/alerts/{id}/resolve", post(handlers::handle_resolve_alert))
        .route("/alerts/{id}/acknowledge", post(handlers::handle_acknowledge_alert))
        // Targets
        .route("/targets", get(handlers::handle_list_targets).post(handlers::handle_create_target))
        .route(
            "/targets/{id}",
            get(handlers::handle_get_target)
                .put(handlers::handle_update_target)
                .delete(handlers::handle_delete_target),
        );

    let workspace = Router::new()
        .route("/metrics", get(handlers::handle_workspace_metrics))
        .route("/alerts", get(handlers::handle_workspace_alerts))
        .route("/alerts/rules", get(handlers::handle_workspace_alert_rules))
        .route("/targets", get(handlers::handle_workspace_targets));

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/api/v1/scrape_targets", get(handlers::handle_scrape_targets))
        .nest("/api/v1/organizations/{org_id}/monitoring", org)
        .nest("/api/v1/organizations/{org_id}/workspaces/{ws_id}/monitoring", workspace)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}
