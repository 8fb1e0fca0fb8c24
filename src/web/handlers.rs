//! HTTP request handlers.

use super::auth::TenantScope;
use super::extract::{ApiJson, ListResponse, MessageResponse};
use super::AppState;
use crate::db::{
    AcknowledgeOutcome, AlertFilter, AlertRulePatch, AlertStatus, Condition, MetricDefinitionPatch,
    MetricType, MonitoringTarget, MonitoringTargetPatch, NewAlertRule, NewMetricDefinition, NewMetricValue,
    NewMonitoringTarget, ResolveOutcome, Severity, TargetType, ValueFilter,
};
use crate::error::MonitoringError;
use crate::query::{parse_time_span, validate_expression, InstantQueryRequest, QueryTime, RangeQueryRequest};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::OnceLock;

type ApiResult<T> = Result<T, MonitoringError>;

/// Samples returned by the workspace view.
const WORKSPACE_VALUES_LIMIT: u32 = 100;
const MAX_VALUES_LIMIT: u32 = 10_000;

#[derive(Debug, Deserialize)]
pub struct ResourcePath {
    pub id: String,
}

// ============================================================================
// Validation helpers
// ============================================================================

fn metric_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name pattern is valid"))
}

fn label_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("label name pattern is valid"))
}

fn required(value: &str, message: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MonitoringError::validation(message));
    }
    Ok(trimmed.to_string())
}

fn parse_enum<T: FromStr>(raw: Option<&str>, missing: &str, invalid: &str) -> ApiResult<T> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MonitoringError::validation(missing))?;
    raw.parse().map_err(|_| MonitoringError::validation(invalid))
}

fn check_label_name(name: &str) -> ApiResult<()> {
    if !label_name_regex().is_match(name) {
        return Err(MonitoringError::validation(format!("invalid label name: {:?}", name)));
    }
    Ok(())
}

/// Validate label names, dropping repeats after the first.
fn validate_label_names(labels: Vec<String>) -> ApiResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim().to_string();
        check_label_name(&label)?;
        if seen.insert(label.clone()) {
            out.push(label);
        }
    }
    Ok(out)
}

fn validate_label_map(labels: &BTreeMap<String, String>) -> ApiResult<()> {
    labels.keys().try_for_each(|k| check_label_name(k))
}

fn validate_metric_query(query: &str) -> ApiResult<String> {
    if query.trim().is_empty() {
        return Err(MonitoringError::validation("metric_query is required"));
    }
    Ok(validate_expression(query)?)
}

fn validate_rule_duration(duration: &str) -> ApiResult<String> {
    let trimmed = duration.trim();
    parse_time_span(trimmed).map_err(|_| MonitoringError::validation("invalid duration format"))?;
    Ok(trimmed.to_string())
}

fn validate_endpoint(endpoint: &str) -> ApiResult<String> {
    let endpoint = required(endpoint, "endpoint is required")?;
    let invalid = || MonitoringError::validation("invalid endpoint URL");
    let url = reqwest::Url::parse(&endpoint).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return Err(invalid());
    }
    Ok(endpoint)
}

fn parse_time_param(raw: Option<&str>, message: &str) -> ApiResult<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => QueryTime::Text(s.to_string())
            .resolve()
            .map(Some)
            .map_err(|_| MonitoringError::validation(message)),
        None => Ok(None),
    }
}

fn scope_workspace(scope: &TenantScope) -> ApiResult<&str> {
    scope
        .workspace_id
        .as_deref()
        .ok_or_else(|| MonitoringError::Internal("route has no workspace".to_string()))
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// API: Metric definitions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateMetricRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

pub async fn handle_create_metric(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(req): ApiJson<CreateMetricRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    let name = required(&req.name, "name is required")?;
    let metric_type: MetricType =
        parse_enum(req.metric_type.as_deref(), "type is required", "invalid metric type")?;
    if !metric_name_regex().is_match(&name) {
        return Err(MonitoringError::validation("invalid metric name"));
    }
    let labels = validate_label_names(req.labels)?;

    let metric = state.store.add_metric(&NewMetricDefinition {
        organization_id: scope.organization_id.clone(),
        name,
        metric_type,
        description: req.description,
        unit: req.unit,
        labels,
    })?;

    tracing::info!(
        "Created metric {} ({}) for org {}",
        metric.id,
        metric.name,
        scope.organization_id
    );
    Ok((StatusCode::CREATED, Json(metric)))
}

pub async fn handle_list_metrics(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let metrics = state.store.get_metrics(&scope.organization_id)?;
    Ok(Json(ListResponse::from(metrics)))
}

pub async fn handle_get_metric(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    let metric = state.store.get_metric(&scope.organization_id, &path.id)?;
    Ok(Json(metric))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMetricRequest {
    pub description: Option<String>,
    pub unit: Option<String>,
    pub labels: Option<Vec<String>>,
    #[serde(alias = "is_active")]
    pub enabled: Option<bool>,
}

pub async fn handle_update_metric(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
    ApiJson(req): ApiJson<UpdateMetricRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    let patch = MetricDefinitionPatch {
        description: req.description,
        unit: req.unit,
        labels: req.labels.map(validate_label_names).transpose()?,
        enabled: req.enabled,
    };
    let metric = state
        .store
        .update_metric(&scope.organization_id, &path.id, &patch)?;

    tracing::info!("Updated metric {} for org {}", metric.id, scope.organization_id);
    Ok(Json(metric))
}

pub async fn handle_delete_metric(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;
    state.store.delete_metric(&scope.organization_id, &path.id)?;

    tracing::info!("Deleted metric {} for org {}", path.id, scope.organization_id);
    Ok(Json(MessageResponse::new("metric deleted")))
}

// ============================================================================
// API: Metric values
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecordValueRequest {
    #[serde(default)]
    pub workspace_id: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
}

pub async fn handle_record_value(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
    ApiJson(req): ApiJson<RecordValueRequest>,
) -> ApiResult<impl IntoResponse> {
    let workspace_id = required(&req.workspace_id, "workspace_id is required")?;
    let value = req
        .value
        .ok_or_else(|| MonitoringError::validation("value is required"))?;
    validate_label_map(&req.labels)?;

    let source = match req.source.trim() {
        "" => "api".to_string(),
        s => s.to_string(),
    };

    let recorded = state.store.add_metric_value(
        &scope.organization_id,
        &path.id,
        &NewMetricValue {
            workspace_id,
            value,
            labels: req.labels,
            timestamp: req.timestamp.unwrap_or_else(Utc::now),
            source,
        },
    )?;

    tracing::debug!(
        "Recorded value {} for metric {} (org {}, workspace {})",
        recorded.id,
        recorded.metric_id,
        scope.organization_id,
        recorded.workspace_id
    );
    Ok((StatusCode::CREATED, Json(recorded)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ValuesQuery {
    pub workspace_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
}

pub async fn handle_get_values(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
    Query(query): Query<ValuesQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut filter = ValueFilter {
        workspace_id: query.workspace_id.filter(|w| !w.trim().is_empty()),
        start: parse_time_param(query.start.as_deref(), "invalid start time")?,
        end: parse_time_param(query.end.as_deref(), "invalid end time")?,
        ..Default::default()
    };
    if let Some(raw) = query.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let limit: u32 = raw
            .parse()
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| MonitoringError::validation("invalid limit"))?;
        filter.limit = limit.min(MAX_VALUES_LIMIT);
    }

    let values = state
        .store
        .get_metric_values(&scope.organization_id, &path.id, &filter)?;
    Ok(Json(ListResponse::from(values)))
}

// ============================================================================
// API: Query proxy
// ============================================================================

pub async fn handle_query(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(req): ApiJson<InstantQueryRequest>,
) -> ApiResult<Json<Value>> {
    let query = req.validate()?;
    tracing::debug!("Instant query for org {}: {}", scope.organization_id, query.query);

    let result = state.client.instant_with_retry(&query).await;
    state.telemetry.observe_query("instant", &result);
    Ok(Json(result?))
}

pub async fn handle_query_range(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(req): ApiJson<RangeQueryRequest>,
) -> ApiResult<Json<Value>> {
    let query = req.validate()?;
    tracing::debug!("Range query for org {}: {}", scope.organization_id, query.query);

    let result = state.client.range_with_retry(&query).await;
    state.telemetry.observe_query("range", &result);
    Ok(Json(result?))
}

// ============================================================================
// API: Alert rules
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAlertRuleRequest {
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metric_query: String,
    pub condition: Option<String>,
    pub threshold: Option<f64>,
    pub duration: Option<String>,
    pub severity: Option<String>,
    #[serde(default = "default_true", alias = "is_active")]
    pub enabled: bool,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

pub async fn handle_create_alert_rule(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(req): ApiJson<CreateAlertRuleRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    let name = required(&req.name, "name is required")?;
    let severity: Severity =
        parse_enum(req.severity.as_deref(), "severity is required", "invalid severity")?;
    let condition: Condition =
        parse_enum(req.condition.as_deref(), "condition is required", "invalid condition")?;
    let metric_query = validate_metric_query(&req.metric_query)?;
    let threshold = req
        .threshold
        .ok_or_else(|| MonitoringError::validation("threshold is required"))?;
    let duration = req
        .duration
        .as_deref()
        .ok_or_else(|| MonitoringError::validation("duration is required"))
        .and_then(validate_rule_duration)?;

    let rule = state.store.add_alert_rule(&NewAlertRule {
        organization_id: scope.organization_id.clone(),
        workspace_id: req.workspace_id.filter(|w| !w.trim().is_empty()),
        name,
        description: req.description,
        metric_query,
        condition,
        threshold,
        duration,
        severity,
        enabled: req.enabled,
        annotations: req.annotations,
    })?;

    tracing::info!(
        "Created alert rule {} ({}) for org {}",
        rule.id,
        rule.name,
        scope.organization_id
    );
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn handle_list_alert_rules(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let rules = state.store.get_alert_rules(&scope.organization_id, None)?;
    Ok(Json(ListResponse::from(rules)))
}

pub async fn handle_workspace_alert_rules(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let ws = scope_workspace(&scope)?;
    let rules = state.store.get_alert_rules(&scope.organization_id, Some(ws))?;
    Ok(Json(ListResponse::from(rules)))
}

pub async fn handle_get_alert_rule(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    let rule = state.store.get_alert_rule(&scope.organization_id, &path.id)?;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRuleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metric_query: Option<String>,
    pub condition: Option<String>,
    pub threshold: Option<f64>,
    pub duration: Option<String>,
    pub severity: Option<String>,
    #[serde(alias = "is_active")]
    pub enabled: Option<bool>,
    pub annotations: Option<BTreeMap<String, String>>,
}

pub async fn handle_update_alert_rule(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
    ApiJson(req): ApiJson<UpdateAlertRuleRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    let patch = AlertRulePatch {
        name: req
            .name
            .map(|n| required(&n, "name is required"))
            .transpose()?,
        description: req.description,
        metric_query: req
            .metric_query
            .map(|q| validate_metric_query(&q))
            .transpose()?,
        condition: req
            .condition
            .map(|c| parse_enum(Some(c.as_str()), "invalid condition", "invalid condition"))
            .transpose()?,
        threshold: req.threshold,
        duration: req
            .duration
            .map(|d| validate_rule_duration(&d))
            .transpose()?,
        severity: req
            .severity
            .map(|s| parse_enum(Some(s.as_str()), "invalid severity", "invalid severity"))
            .transpose()?,
        enabled: req.enabled,
        annotations: req.annotations,
    };

    let rule = state
        .store
        .update_alert_rule(&scope.organization_id, &path.id, &patch)?;
    state.engine.forget_rule(&rule.id);

    tracing::info!("Updated alert rule {} for org {}", rule.id, scope.organization_id);
    Ok(Json(rule))
}

pub async fn handle_delete_alert_rule(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;
    let resolved = state.engine.delete_rule(&scope.organization_id, &path.id)?;

    match resolved {
        Some(alert) => tracing::info!(
            "Deleted alert rule {} for org {}, resolved alert {}",
            path.id,
            scope.organization_id,
            alert.id
        ),
        None => tracing::info!("Deleted alert rule {} for org {}", path.id, scope.organization_id),
    }
    Ok(Json(MessageResponse::new("alert rule deleted")))
}

// ============================================================================
// API: Alerts
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub rule_id: Option<String>,
}

impl AlertsQuery {
    fn into_filter(self, workspace_id: Option<&str>) -> ApiResult<AlertFilter> {
        Ok(AlertFilter {
            status: parse_optional_enum::<AlertStatus>(self.status.as_deref(), "invalid status")?,
            severity: parse_optional_enum::<Severity>(self.severity.as_deref(), "invalid severity")?,
            rule_id: self.rule_id.filter(|r| !r.trim().is_empty()),
            workspace_id: workspace_id.map(str::to_string),
        })
    }
}

fn parse_optional_enum<T: FromStr>(raw: Option<&str>, invalid: &str) -> ApiResult<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| MonitoringError::validation(invalid)),
        None => Ok(None),
    }
}

pub async fn handle_list_alerts(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter(None)?;
    let alerts = state.store.get_alerts(&scope.organization_id, &filter)?;
    Ok(Json(ListResponse::from(alerts)))
}

pub async fn handle_get_alert(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    let alert = state.store.get_alert(&scope.organization_id, &path.id)?;
    Ok(Json(alert))
}

pub async fn handle_resolve_alert(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    match state
        .engine
        .resolve_alert(&scope.organization_id, &path.id, &scope.user_id)?
    {
        ResolveOutcome::Resolved(alert) => {
            tracing::info!(
                "Alert {} resolved by {} (org {})",
                alert.id,
                scope.user_id,
                scope.organization_id
            );
            Ok(Json(alert))
        }
        ResolveOutcome::AlreadyResolved(_) => {
            Err(MonitoringError::validation("alert is already resolved"))
        }
    }
}

pub async fn handle_acknowledge_alert(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    match state
        .store
        .acknowledge_alert(&scope.organization_id, &path.id, Utc::now(), &scope.user_id)?
    {
        AcknowledgeOutcome::Acknowledged(alert) => {
            tracing::info!(
                "Alert {} acknowledged by {} (org {})",
                alert.id,
                alert.acknowledged_by.as_deref().unwrap_or_default(),
                scope.organization_id
            );
            Ok(Json(alert))
        }
        AcknowledgeOutcome::AlreadyResolved(_) => {
            Err(MonitoringError::validation("alert is already resolved"))
        }
    }
}

// ============================================================================
// API: Monitoring targets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub target_type: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub scrape_config: Map<String, Value>,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    scope: TenantScope,
    ApiJson(req): ApiJson<CreateTargetRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    let workspace_id = required(&req.workspace_id, "workspace_id is required")?;
    let name = required(&req.name, "name is required")?;
    let target_type: TargetType =
        parse_enum(req.target_type.as_deref(), "type is required", "invalid target type")?;
    let endpoint = validate_endpoint(&req.endpoint)?;
    validate_label_map(&req.labels)?;

    let target = state.store.add_target(&NewMonitoringTarget {
        organization_id: scope.organization_id.clone(),
        workspace_id,
        name,
        target_type,
        endpoint,
        labels: req.labels,
        scrape_config: req.scrape_config,
    })?;

    tracing::info!(
        "Created monitoring target {} ({}) for org {}",
        target.id,
        target.endpoint,
        scope.organization_id
    );
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn handle_list_targets(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let targets = state.store.get_targets(&scope.organization_id, None)?;
    Ok(Json(ListResponse::from(targets)))
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    let target = state.store.get_target(&scope.organization_id, &path.id)?;
    Ok(Json(target))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub target_type: Option<String>,
    pub endpoint: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub scrape_config: Option<Map<String, Value>>,
    #[serde(alias = "is_active")]
    pub enabled: Option<bool>,
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
    ApiJson(req): ApiJson<UpdateTargetRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;

    if let Some(labels) = &req.labels {
        validate_label_map(labels)?;
    }
    let patch = MonitoringTargetPatch {
        name: req
            .name
            .map(|n| required(&n, "name is required"))
            .transpose()?,
        target_type: req
            .target_type
            .map(|t| parse_enum(Some(t.as_str()), "invalid target type", "invalid target type"))
            .transpose()?,
        endpoint: req.endpoint.map(|e| validate_endpoint(&e)).transpose()?,
        labels: req.labels,
        scrape_config: req.scrape_config,
        enabled: req.enabled,
    };

    let target = state
        .store
        .update_target(&scope.organization_id, &path.id, &patch)?;

    tracing::info!("Updated monitoring target {} for org {}", target.id, scope.organization_id);
    Ok(Json(target))
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    scope: TenantScope,
    Path(path): Path<ResourcePath>,
) -> ApiResult<impl IntoResponse> {
    scope.require_admin()?;
    state.store.delete_target(&scope.organization_id, &path.id)?;

    tracing::info!("Deleted monitoring target {} for org {}", path.id, scope.organization_id);
    Ok(Json(MessageResponse::new("monitoring target deleted")))
}

// ============================================================================
// API: Workspace views
// ============================================================================

pub async fn handle_workspace_metrics(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let ws = scope_workspace(&scope)?;
    let values = state
        .store
        .get_workspace_values(&scope.organization_id, ws, WORKSPACE_VALUES_LIMIT)?;
    Ok(Json(ListResponse::from(values)))
}

pub async fn handle_workspace_alerts(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter(Some(scope_workspace(&scope)?))?;
    let alerts = state.store.get_alerts(&scope.organization_id, &filter)?;
    Ok(Json(ListResponse::from(alerts)))
}

pub async fn handle_workspace_targets(
    State(state): State<AppState>,
    scope: TenantScope,
) -> ApiResult<impl IntoResponse> {
    let ws = scope_workspace(&scope)?;
    let targets = state.store.get_targets(&scope.organization_id, Some(ws))?;
    Ok(Json(ListResponse::from(targets)))
}

// ============================================================================
// Scrape collector discovery
// ============================================================================

/// One entry of the Prometheus HTTP service-discovery response.
#[derive(Debug, Serialize, PartialEq)]
pub struct ScrapeTargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Translate a target into its discovery entry. Unusable endpoints yield `None`.
pub fn scrape_group(target: &MonitoringTarget) -> Option<ScrapeTargetGroup> {
    let url = reqwest::Url::parse(&target.endpoint).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?;
    let port = url.port_or_known_default()?;

    let mut labels = target.labels.clone();
    for (key, meta) in [
        ("scrape_interval", "__scrape_interval__"),
        ("scrape_timeout", "__scrape_timeout__"),
    ] {
        if let Some(Value::String(v)) = target.scrape_config.get(key) {
            labels.insert(meta.to_string(), v.clone());
        }
    }
    for (name, value) in url.query_pairs() {
        labels.insert(format!("__param_{}", name), value.into_owned());
    }

    let path = match url.path() {
        "" | "/" => "/metrics",
        p => p,
    };
    labels.insert("__metrics_path__".to_string(), path.to_string());
    labels.insert("__scheme__".to_string(), url.scheme().to_string());
    labels.insert("organization_id".to_string(), target.organization_id.clone());
    labels.insert("workspace_id".to_string(), target.workspace_id.clone());
    labels.insert("target_type".to_string(), target.target_type.to_string());
    labels.insert("target_name".to_string(), target.name.clone());

    Some(ScrapeTargetGroup {
        targets: vec![format!("{}:{}", host, port)],
        labels,
    })
}

pub async fn handle_scrape_targets(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let targets = state.store.get_enabled_targets()?;
    let groups: Vec<ScrapeTargetGroup> = targets
        .iter()
        .filter_map(|t| {
            let group = scrape_group(t);
            if group.is_none() {
                tracing::warn!("Skipping target {} with unusable endpoint {}", t.id, t.endpoint);
            }
            group
        })
        .collect();
    Ok(Json(groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(endpoint: &str) -> MonitoringTarget {
        MonitoringTarget {
            id: "target-1".to_string(),
            organization_id: "org-1".to_string(),
            workspace_id: "ws-1".to_string(),
            name: "api".to_string(),
            target_type: TargetType::Pod,
            endpoint: endpoint.to_string(),
            labels: BTreeMap::from([("team".to_string(), "core".to_string())]),
            scrape_config: Map::from_iter([("scrape_interval".to_string(), json!("30s"))]),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_scrape_group_labels() {
        let group = scrape_group(&target("https://10.0.0.5/stats?format=prometheus")).unwrap();
        assert_eq!(group.targets, vec!["10.0.0.5:443".to_string()]);
        assert_eq!(group.labels["__metrics_path__"], "/stats");
        assert_eq!(group.labels["__scheme__"], "https");
        assert_eq!(group.labels["__param_format"], "prometheus");
        assert_eq!(group.labels["__scrape_interval__"], "30s");
        assert_eq!(group.labels["target_type"], "pod");
        assert_eq!(group.labels["team"], "core");
    }

    #[test]
    fn test_scrape_group_default_path() {
        let group = scrape_group(&target("http://node-exporter:9100")).unwrap();
        assert_eq!(group.targets, vec!["node-exporter:9100".to_string()]);
        assert_eq!(group.labels["__metrics_path__"], "/metrics");
    }

    #[test]
    fn test_label_name_validation() {
        let labels = validate_label_names(vec!["pod".into(), "namespace".into(), "pod".into()]).unwrap();
        assert_eq!(labels, vec!["pod".to_string(), "namespace".to_string()]);
        assert!(validate_label_names(vec!["9lives".into()]).is_err());
        assert!(validate_label_names(vec!["has-dash".into()]).is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(validate_endpoint("https://ws-1.example.com/metrics").is_ok());
        assert_eq!(
            validate_endpoint("").unwrap_err().to_string(),
            "endpoint is required"
        );
        for bad in ["not a url", "ftp://example.com", "unix:/var/run/socket"] {
            assert_eq!(validate_endpoint(bad).unwrap_err().to_string(), "invalid endpoint URL");
        }
    }
}
