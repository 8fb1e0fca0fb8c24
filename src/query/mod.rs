//! Query proxy: validates instant and range queries and forwards them to a
//! Prometheus-compatible backend.

mod client;
mod duration;
mod syntax;

pub use client::*;
pub use duration::*;
pub use syntax::*;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Prometheus refuses range queries above this many points per series.
pub const MAX_RANGE_POINTS: i64 = 11_000;

/// Query proxy error types.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("query is required")]
    MissingQuery,
    #[error("invalid query syntax: {0}")]
    InvalidSyntax(String),
    #[error("start time is required")]
    MissingStart,
    #[error("end time is required")]
    MissingEnd,
    #[error("step is required")]
    MissingStep,
    #[error("invalid step format: {0:?}")]
    InvalidStep(String),
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("end time must be after start time")]
    InvalidRange,
    #[error("exceeded maximum resolution of 11,000 points")]
    TooManyPoints,
    #[error("query backend unavailable: {0}")]
    Unavailable(String),
    #[error("query backend error: {0}")]
    Backend(String),
}

impl QueryError {
    /// True for errors caused by the caller's input rather than the backend.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Unavailable(_) | Self::Backend(_))
    }

    /// True for network-level failures worth one retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A timestamp given either as unix seconds or as an RFC 3339 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryTime {
    Unix(f64),
    Text(String),
}

impl QueryTime {
    pub fn resolve(&self) -> Result<DateTime<Utc>, QueryError> {
        match self {
            Self::Unix(secs) => from_unix_seconds(*secs)
                .ok_or_else(|| QueryError::InvalidTimestamp(secs.to_string())),
            Self::Text(s) => {
                if let Ok(secs) = s.trim().parse::<f64>() {
                    return from_unix_seconds(secs)
                        .ok_or_else(|| QueryError::InvalidTimestamp(s.clone()));
                }
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| QueryError::InvalidTimestamp(s.clone()))
            }
        }
    }
}

fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Format a timestamp the way the Prometheus HTTP API expects it.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

/// Body of an instant query request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstantQueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub time: Option<QueryTime>,
}

/// A validated instant query.
#[derive(Debug, Clone)]
pub struct InstantQuery {
    pub query: String,
    pub time: Option<DateTime<Utc>>,
}

impl InstantQueryRequest {
    pub fn validate(self) -> Result<InstantQuery, QueryError> {
        let query = validate_expression(&self.query)?;
        let time = self.time.as_ref().map(QueryTime::resolve).transpose()?;
        Ok(InstantQuery { query, time })
    }
}

/// Body of a range query request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub start: Option<QueryTime>,
    #[serde(default)]
    pub end: Option<QueryTime>,
    #[serde(default)]
    pub step: Option<String>,
}

/// A validated range query.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub query: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl RangeQueryRequest {
    pub fn validate(self) -> Result<RangeQuery, QueryError> {
        let query = validate_expression(&self.query)?;
        let start = self.start.as_ref().ok_or(QueryError::MissingStart)?.resolve()?;
        let end = self.end.as_ref().ok_or(QueryError::MissingEnd)?.resolve()?;

        let step_str = self.step.as_deref().map(str::trim).unwrap_or_default();
        if step_str.is_empty() {
            return Err(QueryError::MissingStep);
        }
        let step = parse_positive_duration(step_str)
            .map_err(|_| QueryError::InvalidStep(step_str.to_string()))?;

        if end <= start {
            return Err(QueryError::InvalidRange);
        }

        let span_ms = (end - start).num_milliseconds();
        let step_ms = step.as_millis().max(1);
        if (span_ms as u128) / step_ms > MAX_RANGE_POINTS as u128 {
            return Err(QueryError::TooManyPoints);
        }

        Ok(RangeQuery { query, start, end, step })
    }
}

/// Validate a query expression and return it trimmed.
pub fn validate_expression(query: &str) -> Result<String, QueryError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(QueryError::MissingQuery);
    }
    check_query_syntax(trimmed).map_err(QueryError::InvalidSyntax)?;
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub mod testing {
    //! A fake Prometheus HTTP API for tests.

    use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct MockState {
        pub value: Mutex<Option<f64>>,
        pub failing: AtomicBool,
        pub calls: AtomicUsize,
        pub last_form: Mutex<HashMap<String, String>>,
    }

    pub struct MockBackend {
        pub addr: SocketAddr,
        pub state: Arc<MockState>,
    }

    impl MockBackend {
        pub fn url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub fn set_value(&self, v: Option<f64>) {
            *self.state.value.lock() = v;
        }

        pub fn set_failing(&self, failing: bool) {
            self.state.failing.store(failing, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.state.calls.load(Ordering::SeqCst)
        }
    }

    async fn handle_query(
        State(state): State<Arc<MockState>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        state.calls.fetch_add(1, Ordering::SeqCst);
        *state.last_form.lock() = form;
        if state.failing.load(Ordering::SeqCst) {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "errorType": "unavailable", "error": "mock failure"})),
            );
        }
        let result = match *state.value.lock() {
            Some(v) => json!([{"metric": {"__name__": "up"}, "value": [1700000000.0, v.to_string()]}]),
            None => json!([]),
        };
        (
            StatusCode::OK,
            Json(json!({"status": "success", "data": {"resultType": "vector", "result": result}})),
        )
    }

    async fn handle_query_range(
        State(state): State<Arc<MockState>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        state.calls.fetch_add(1, Ordering::SeqCst);
        *state.last_form.lock() = form;
        if state.failing.load(Ordering::SeqCst) {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "errorType": "unavailable", "error": "mock failure"})),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [{"metric": {"__name__": "cpu_usage"}, "values": [[1700000000.0, "75.5"], [1700000060.0, "76.2"]]}]
                }
            })),
        )
    }

    pub async fn spawn() -> MockBackend {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/v1/query", post(handle_query))
            .route("/api/v1/query_range", post(handle_query_range))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockBackend { addr, state }
    }
}
