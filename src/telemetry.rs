//! Self-metrics of the monitoring engine in Prometheus text format.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;

const NAMESPACE: &str = "kaasmon";

/// Counters and gauges the engine and the query proxy update.
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    pub evaluation_ticks: IntCounter,
    pub evaluation_failures: IntCounter,
    pub alerts_fired: IntCounter,
    pub alerts_resolved: IntCounter,
    pub alerts_firing: IntGauge,
    queries: IntCounterVec,
}

impl Telemetry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let evaluation_ticks = IntCounter::with_opts(opts(
            "alert_evaluation_ticks_total",
            "Alert evaluation ticks run",
        ))?;
        let evaluation_failures = IntCounter::with_opts(opts(
            "alert_evaluation_failures_total",
            "Per-rule evaluations that failed to query the backend",
        ))?;
        let alerts_fired = IntCounter::with_opts(opts("alerts_fired_total", "Alerts fired"))?;
        let alerts_resolved =
            IntCounter::with_opts(opts("alerts_resolved_total", "Alerts resolved"))?;
        let alerts_firing =
            IntGauge::with_opts(opts("alerts_firing", "Alerts currently firing"))?;
        let queries = IntCounterVec::new(
            opts("queries_total", "Queries proxied to the backend"),
            &["kind", "outcome"],
        )?;

        registry.register(Box::new(evaluation_ticks.clone()))?;
        registry.register(Box::new(evaluation_failures.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;
        registry.register(Box::new(alerts_resolved.clone()))?;
        registry.register(Box::new(alerts_firing.clone()))?;
        registry.register(Box::new(queries.clone()))?;

        Ok(Self {
            registry,
            evaluation_ticks,
            evaluation_failures,
            alerts_fired,
            alerts_resolved,
            alerts_firing,
            queries,
        })
    }

    /// Count one proxied query. `kind` is instant, range or evaluation.
    pub fn observe_query<T, E>(&self, kind: &str, result: &Result<T, E>) {
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.queries.with_label_values(&[kind, outcome]).inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(handle_metrics))
            .with_state(self)
    }

    /// Serve the metrics on their own listener.
    pub async fn serve(
        self: Arc<Self>,
        port: u16,
        path: String,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Metrics listening on {}{}", addr, path);
        axum::serve(listener, self.router(&path)).await?;
        Ok(())
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

async fn handle_metrics(State(telemetry): State<Arc<Telemetry>>) -> impl IntoResponse {
    match telemetry.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Telemetry: Failed to encode metrics: {}", e);
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
