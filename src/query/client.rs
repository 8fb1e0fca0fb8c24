//! HTTP client for the Prometheus query API.

use super::{format_timestamp, InstantQuery, QueryError, RangeQuery};

use serde_json::Value;
use std::time::Duration;

/// Client for a Prometheus-compatible `/api/v1` endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    /// Create a client with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run an instant query once and return the backend body unmodified.
    pub async fn instant(&self, q: &InstantQuery) -> Result<Value, QueryError> {
        let mut form = vec![("query", q.query.clone())];
        if let Some(t) = q.time {
            form.push(("time", format_timestamp(t)));
        }
        self.post("/api/v1/query", &form).await
    }

    /// Run a range query once and return the backend body unmodified.
    pub async fn range(&self, q: &RangeQuery) -> Result<Value, QueryError> {
        let form = vec![
            ("query", q.query.clone()),
            ("start", format_timestamp(q.start)),
            ("end", format_timestamp(q.end)),
            ("step", format!("{}", q.step.as_secs_f64())),
        ];
        self.post("/api/v1/query_range", &form).await
    }

    /// Instant query for interactive callers: one retry on network failure.
    pub async fn instant_with_retry(&self, q: &InstantQuery) -> Result<Value, QueryError> {
        match self.instant(q).await {
            Err(e) if e.is_transient() => {
                tracing::warn!("Instant query failed, retrying once: {}", e);
                backoff().await;
                self.instant(q).await
            }
            other => other,
        }
    }

    /// Range query for interactive callers: one retry on network failure.
    pub async fn range_with_retry(&self, q: &RangeQuery) -> Result<Value, QueryError> {
        match self.range(q).await {
            Err(e) if e.is_transient() => {
                tracing::warn!("Range query failed, retrying once: {}", e);
                backoff().await;
                self.range(q).await
            }
            other => other,
        }
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<Value, QueryError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.http.post(&url).form(form).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                QueryError::Unavailable(e.to_string())
            } else {
                QueryError::Backend(e.to_string())
            }
        })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            QueryError::Backend(format!("unreadable response (HTTP {}): {}", status.as_u16(), e))
        })?;

        if !status.is_success() {
            return Err(QueryError::Backend(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text(&body)
            )));
        }

        if body.get("status").and_then(Value::as_str) != Some("success") {
            return Err(QueryError::Backend(error_text(&body)));
        }

        Ok(body)
    }
}

async fn backoff() {
    let jitter = 50 + rand::random::<u64>() % 100;
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}

fn error_text(body: &Value) -> String {
    match (
        body.get("errorType").and_then(Value::as_str),
        body.get("error").and_then(Value::as_str),
    ) {
        (Some(kind), Some(msg)) => format!("{}: {}", kind, msg),
        (None, Some(msg)) => msg.to_string(),
        _ => "unexpected response".to_string(),
    }
}

/// Extract the single value a threshold is compared against.
///
/// `scalar` results yield their value; `vector` results yield the first
/// sample. An empty vector or a NaN sample yields `None`.
pub fn sample_value(body: &Value) -> Result<Option<f64>, QueryError> {
    let data = body
        .get("data")
        .ok_or_else(|| QueryError::Backend("response has no data".to_string()))?;
    let result_type = data.get("resultType").and_then(Value::as_str).unwrap_or_default();
    let result = data.get("result");

    let sample = match result_type {
        "scalar" => result,
        "vector" => result
            .and_then(Value::as_array)
            .and_then(|series| series.first())
            .and_then(|s| s.get("value")),
        other => {
            return Err(QueryError::Backend(format!(
                "result type {:?} cannot be compared to a threshold",
                other
            )))
        }
    };

    let Some(sample) = sample else {
        return Ok(None);
    };

    let raw = sample
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::Backend("malformed sample".to_string()))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| QueryError::Backend(format!("non-numeric sample {:?}", raw)))?;

    Ok(if value.is_nan() { None } else { Some(value) })
}
