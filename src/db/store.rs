//! SQLite database store implementation.
//!
//! Every read and write is scoped by organization id: a row belonging to
//! another organization is reported as not found.

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::models::*;
use crate::query::references_metric;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Who resolved an alert when the engine did it.
pub const RESOLVED_BY_ENGINE: &str = "engine";

const METRIC_COLUMNS: &str =
    "id, organization_id, name, metric_type, description, unit, labels, created_at, updated_at, enabled";
const VALUE_COLUMNS: &str =
    "id, metric_id, organization_id, workspace_id, value, labels, timestamp, source, created_at";
const RULE_COLUMNS: &str = "id, organization_id, workspace_id, name, description, metric_query, condition, threshold, duration, severity, enabled, annotations, created_at, updated_at";
const ALERT_COLUMNS: &str = "id, alert_rule_id, organization_id, workspace_id, status, severity, value, fired_at, resolved_at, resolved_by, acknowledged_at, acknowledged_by";
const TARGET_COLUMNS: &str = "id, organization_id, workspace_id, name, target_type, endpoint, labels, scrape_config, enabled, created_at, updated_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Apply embedded migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn.lock();
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    // --- Workspaces ---

    /// Insert or replace a workspace row.
    pub fn upsert_workspace(&self, ws: &Workspace) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO workspaces (id, organization_id, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id, name = excluded.name",
            params![ws.id, ws.organization_id, ws.name],
        )?;
        Ok(())
    }

    /// Get a workspace that belongs to the organization.
    pub fn get_workspace(&self, org_id: &str, ws_id: &str) -> Result<Workspace, DbError> {
        let conn = self.conn.lock();
        find_workspace(&conn, org_id, ws_id)
    }

    // --- Metric definitions ---

    /// Add a metric definition. Names are unique per organization.
    pub fn add_metric(&self, new: &NewMetricDefinition) -> Result<MetricDefinition, DbError> {
        let now = Utc::now();
        let metric = MetricDefinition {
            id: format!("metric-{}", Uuid::new_v4()),
            organization_id: new.organization_id.clone(),
            name: new.name.clone(),
            metric_type: new.metric_type,
            description: new.description.clone(),
            unit: new.unit.clone(),
            labels: new.labels.clone(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metric_definitions (id, organization_id, name, metric_type, description, unit, labels, created_at, updated_at, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                metric.id,
                metric.organization_id,
                metric.name,
                metric.metric_type.as_str(),
                metric.description,
                metric.unit,
                serde_json::to_string(&metric.labels)?,
                fmt_time(&metric.created_at),
                fmt_time(&metric.updated_at),
                metric.enabled,
            ],
        )
        .map_err(|e| conflict_or(e, "metric already exists"))?;

        Ok(metric)
    }

    /// Get all metric definitions of an organization in insertion order.
    pub fn get_metrics(&self, org_id: &str) -> Result<Vec<MetricDefinition>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM metric_definitions WHERE organization_id = ?1 ORDER BY seq ASC",
            METRIC_COLUMNS
        ))?;
        let metrics = stmt
            .query_map(params![org_id], metric_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(metrics)
    }

    /// Get a metric definition by ID.
    pub fn get_metric(&self, org_id: &str, id: &str) -> Result<MetricDefinition, DbError> {
        let conn = self.conn.lock();
        find_metric(&conn, org_id, id)
    }

    /// Update the mutable fields of a metric definition.
    pub fn update_metric(
        &self,
        org_id: &str,
        id: &str,
        patch: &MetricDefinitionPatch,
    ) -> Result<MetricDefinition, DbError> {
        let conn = self.conn.lock();
        let mut metric = find_metric(&conn, org_id, id)?;

        if let Some(description) = &patch.description {
            metric.description = description.clone();
        }
        if let Some(unit) = &patch.unit {
            metric.unit = unit.clone();
        }
        if let Some(labels) = &patch.labels {
            metric.labels = labels.clone();
        }
        if let Some(enabled) = patch.enabled {
            metric.enabled = enabled;
        }
        metric.updated_at = Utc::now();

        conn.execute(
            "UPDATE metric_definitions SET description = ?1, unit = ?2, labels = ?3, enabled = ?4, updated_at = ?5
             WHERE id = ?6 AND organization_id = ?7",
            params![
                metric.description,
                metric.unit,
                serde_json::to_string(&metric.labels)?,
                metric.enabled,
                fmt_time(&metric.updated_at),
                metric.id,
                metric.organization_id,
            ],
        )?;

        Ok(metric)
    }

    /// Delete a metric definition nothing refers to.
    pub fn delete_metric(&self, org_id: &str, id: &str) -> Result<(), DbError> {
        let conn = self.conn.lock();
        let metric = find_metric(&conn, org_id, id)?;

        let value_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metric_values WHERE metric_id = ?1",
            params![metric.id],
            |r| r.get(0),
        )?;
        if value_count > 0 {
            return Err(DbError::Conflict("metric has recorded values".to_string()));
        }

        let rules = query_rules(
            &conn,
            &format!(
                "SELECT {} FROM alert_rules WHERE organization_id = ?1 ORDER BY seq ASC",
                RULE_COLUMNS
            ),
            params![org_id],
        )?;
        if let Some(rule) = rules
            .iter()
            .find(|r| references_metric(&r.metric_query, &metric.name))
        {
            return Err(DbError::Conflict(format!(
                "metric is referenced by alert rule {}",
                rule.name
            )));
        }

        conn.execute(
            "DELETE FROM metric_definitions WHERE id = ?1 AND organization_id = ?2",
            params![metric.id, org_id],
        )?;
        Ok(())
    }

    // --- Metric values ---

    /// Append a sample to an enabled metric of the organization.
    ///
    /// A disabled metric is reported as not found.
    pub fn add_metric_value(
        &self,
        org_id: &str,
        metric_id: &str,
        new: &NewMetricValue,
    ) -> Result<MetricValue, DbError> {
        let conn = self.conn.lock();
        let metric = find_metric(&conn, org_id, metric_id)?;
        if !metric.enabled {
            return Err(DbError::NotFound("metric"));
        }
        find_workspace(&conn, org_id, &new.workspace_id)?;

        let value = MetricValue {
            id: format!("metric-val-{}", Uuid::new_v4()),
            metric_id: metric.id,
            organization_id: org_id.to_string(),
            workspace_id: new.workspace_id.clone(),
            value: new.value,
            labels: new.labels.clone(),
            timestamp: new.timestamp,
            source: new.source.clone(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO metric_values (id, metric_id, organization_id, workspace_id, value, labels, timestamp, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                value.id,
                value.metric_id,
                value.organization_id,
                value.workspace_id,
                value.value,
                serde_json::to_string(&value.labels)?,
                fmt_time(&value.timestamp),
                value.source,
                fmt_time(&value.created_at),
            ],
        )?;

        Ok(value)
    }

    /// Get the newest `filter.limit` samples of a metric, oldest first.
    pub fn get_metric_values(
        &self,
        org_id: &str,
        metric_id: &str,
        filter: &ValueFilter,
    ) -> Result<Vec<MetricValue>, DbError> {
        let conn = self.conn.lock();
        find_metric(&conn, org_id, metric_id)?;

        let mut clauses = vec!["metric_id = ?", "organization_id = ?"];
        let mut args = vec![
            SqlValue::Text(metric_id.to_string()),
            SqlValue::Text(org_id.to_string()),
        ];
        if let Some(ws) = &filter.workspace_id {
            clauses.push("workspace_id = ?");
            args.push(SqlValue::Text(ws.clone()));
        }
        if let Some(start) = &filter.start {
            clauses.push("timestamp >= ?");
            args.push(SqlValue::Text(fmt_time(start)));
        }
        if let Some(end) = &filter.end {
            clauses.push("timestamp < ?");
            args.push(SqlValue::Text(fmt_time(end)));
        }
        args.push(SqlValue::Integer(i64::from(filter.limit)));

        query_values(&conn, &clauses.join(" AND "), args)
    }

    /// Get the newest `limit` samples recorded for a workspace, oldest first.
    pub fn get_workspace_values(
        &self,
        org_id: &str,
        ws_id: &str,
        limit: u32,
    ) -> Result<Vec<MetricValue>, DbError> {
        let conn = self.conn.lock();
        let args = vec![
            SqlValue::Text(ws_id.to_string()),
            SqlValue::Text(org_id.to_string()),
            SqlValue::Integer(i64::from(limit)),
        ];
        query_values(&conn, "workspace_id = ? AND organization_id = ?", args)
    }

    /// Delete samples older than the cutoff. Returns the number removed.
    pub fn delete_metric_values_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM metric_values WHERE timestamp < ?1",
            params![fmt_time(&cutoff)],
        )?;
        Ok(n)
    }

    // --- Alert rules ---

    /// Add an alert rule. A workspace-scoped rule must name a workspace of the organization.
    pub fn add_alert_rule(&self, new: &NewAlertRule) -> Result<AlertRule, DbError> {
        let conn = self.conn.lock();
        if let Some(ws) = &new.workspace_id {
            find_workspace(&conn, &new.organization_id, ws)?;
        }

        let now = Utc::now();
        let rule = AlertRule {
            id: format!("alert-rule-{}", Uuid::new_v4()),
            organization_id: new.organization_id.clone(),
            workspace_id: new.workspace_id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            metric_query: new.metric_query.clone(),
            condition: new.condition,
            threshold: new.threshold,
            duration: new.duration.clone(),
            severity: new.severity,
            enabled: new.enabled,
            annotations: new.annotations.clone(),
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            &format!(
                "INSERT INTO alert_rules ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                RULE_COLUMNS
            ),
            params![
                rule.id,
                rule.organization_id,
                rule.workspace_id,
                rule.name,
                rule.description,
                rule.metric_query,
                rule.condition.as_str(),
                rule.threshold,
                rule.duration,
                rule.severity.as_str(),
                rule.enabled,
                serde_json::to_string(&rule.annotations)?,
                fmt_time(&rule.created_at),
                fmt_time(&rule.updated_at),
            ],
        )?;

        Ok(rule)
    }

    /// Get the alert rules of an organization, optionally only one workspace's.
    pub fn get_alert_rules(
        &self,
        org_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<Vec<AlertRule>, DbError> {
        let conn = self.conn.lock();
        match workspace_id {
            Some(ws) => query_rules(
                &conn,
                &format!(
                    "SELECT {} FROM alert_rules WHERE organization_id = ?1 AND workspace_id = ?2 ORDER BY seq ASC",
                    RULE_COLUMNS
                ),
                params![org_id, ws],
            ),
            None => query_rules(
                &conn,
                &format!(
                    "SELECT {} FROM alert_rules WHERE organization_id = ?1 ORDER BY seq ASC",
                    RULE_COLUMNS
                ),
                params![org_id],
            ),
        }
    }

    /// Get every enabled rule across organizations.
    pub fn get_enabled_alert_rules(&self) -> Result<Vec<AlertRule>, DbError> {
        let conn = self.conn.lock();
        query_rules(
            &conn,
            &format!(
                "SELECT {} FROM alert_rules WHERE enabled = 1 ORDER BY seq ASC",
                RULE_COLUMNS
            ),
            [],
        )
    }

    /// Get an alert rule by ID.
    pub fn get_alert_rule(&self, org_id: &str, id: &str) -> Result<AlertRule, DbError> {
        let conn = self.conn.lock();
        find_rule(&conn, org_id, id)
    }

    /// Update an alert rule.
    pub fn update_alert_rule(
        &self,
        org_id: &str,
        id: &str,
        patch: &AlertRulePatch,
    ) -> Result<AlertRule, DbError> {
        let conn = self.conn.lock();
        let mut rule = find_rule(&conn, org_id, id)?;

        if let Some(v) = &patch.name {
            rule.name = v.clone();
        }
        if let Some(v) = &patch.description {
            rule.description = v.clone();
        }
        if let Some(v) = &patch.metric_query {
            rule.metric_query = v.clone();
        }
        if let Some(v) = patch.condition {
            rule.condition = v;
        }
        if let Some(v) = patch.threshold {
            rule.threshold = v;
        }
        if let Some(v) = &patch.duration {
            rule.duration = v.clone();
        }
        if let Some(v) = patch.severity {
            rule.severity = v;
        }
        if let Some(v) = patch.enabled {
            rule.enabled = v;
        }
        if let Some(v) = &patch.annotations {
            rule.annotations = v.clone();
        }
        rule.updated_at = Utc::now();

        conn.execute(
            "UPDATE alert_rules SET name = ?1, description = ?2, metric_query = ?3, condition = ?4,
             threshold = ?5, duration = ?6, severity = ?7, enabled = ?8, annotations = ?9, updated_at = ?10
             WHERE id = ?11 AND organization_id = ?12",
            params![
                rule.name,
                rule.description,
                rule.metric_query,
                rule.condition.as_str(),
                rule.threshold,
                rule.duration,
                rule.severity.as_str(),
                rule.enabled,
                serde_json::to_string(&rule.annotations)?,
                fmt_time(&rule.updated_at),
                rule.id,
                rule.organization_id,
            ],
        )?;

        Ok(rule)
    }

    /// Delete an alert rule, resolving its firing alert. Alert history is kept.
    pub fn delete_alert_rule(
        &self,
        org_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, DbError> {
        let conn = self.conn.lock();
        let rule = find_rule(&conn, org_id, id)?;
        let tx = conn.unchecked_transaction()?;

        let firing = find_firing_alert(&tx, &rule.id)?;
        if let Some(alert) = &firing {
            resolve_if_firing(&tx, &alert.id, now, RESOLVED_BY_ENGINE)?;
        }
        tx.execute(
            "DELETE FROM alert_rules WHERE id = ?1 AND organization_id = ?2",
            params![rule.id, org_id],
        )?;
        tx.commit()?;

        match firing {
            Some(alert) => Ok(Some(find_alert(&conn, org_id, &alert.id)?)),
            None => Ok(None),
        }
    }

    // --- Alerts ---

    /// Get the open alert of a rule, if any.
    pub fn get_firing_alert(&self, rule_id: &str) -> Result<Option<Alert>, DbError> {
        let conn = self.conn.lock();
        find_firing_alert(&conn, rule_id)
    }

    /// Record a new firing alert for a rule.
    ///
    /// Fails with a conflict if the rule already has a firing alert.
    pub fn fire_alert(
        &self,
        rule: &AlertRule,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<Alert, DbError> {
        let alert = Alert {
            id: format!("alert-{}", Uuid::new_v4()),
            alert_rule_id: rule.id.clone(),
            organization_id: rule.organization_id.clone(),
            workspace_id: rule.workspace_id.clone(),
            status: AlertStatus::Firing,
            severity: rule.severity,
            value,
            fired_at: now,
            resolved_at: None,
            resolved_by: None,
            acknowledged_at: None,
            acknowledged_by: None,
        };

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, NULL, NULL)",
                ALERT_COLUMNS
            ),
            params![
                alert.id,
                alert.alert_rule_id,
                alert.organization_id,
                alert.workspace_id,
                alert.status.as_str(),
                alert.severity.as_str(),
                alert.value,
                fmt_time(&alert.fired_at),
            ],
        )
        .map_err(|e| conflict_or(e, "alert already firing for rule"))?;

        Ok(alert)
    }

    /// Resolve an alert only if it is still firing. Returns whether it changed.
    pub fn resolve_alert_if_firing(
        &self,
        alert_id: &str,
        now: DateTime<Utc>,
        resolved_by: &str,
    ) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        resolve_if_firing(&conn, alert_id, now, resolved_by)
    }

    /// Resolve an alert of the organization on request.
    pub fn resolve_alert(
        &self,
        org_id: &str,
        id: &str,
        now: DateTime<Utc>,
        resolved_by: &str,
    ) -> Result<ResolveOutcome, DbError> {
        let conn = self.conn.lock();
        let alert = find_alert(&conn, org_id, id)?;
        if !resolve_if_firing(&conn, &alert.id, now, resolved_by)? {
            return Ok(ResolveOutcome::AlreadyResolved(alert));
        }
        Ok(ResolveOutcome::Resolved(find_alert(&conn, org_id, id)?))
    }

    /// Acknowledge a firing alert of the organization. The status stays firing.
    pub fn acknowledge_alert(
        &self,
        org_id: &str,
        id: &str,
        now: DateTime<Utc>,
        acknowledged_by: &str,
    ) -> Result<AcknowledgeOutcome, DbError> {
        let conn = self.conn.lock();
        let alert = find_alert(&conn, org_id, id)?;
        if alert.status == AlertStatus::Resolved {
            return Ok(AcknowledgeOutcome::AlreadyResolved(alert));
        }

        conn.execute(
            "UPDATE alerts SET acknowledged_at = MAX(?1, fired_at), acknowledged_by = ?2
             WHERE id = ?3 AND status = 'firing' AND acknowledged_at IS NULL",
            params![fmt_time(&now), acknowledged_by, alert.id],
        )?;

        let alert = find_alert(&conn, org_id, id)?;
        match alert.status {
            AlertStatus::Firing => Ok(AcknowledgeOutcome::Acknowledged(alert)),
            AlertStatus::Resolved => Ok(AcknowledgeOutcome::AlreadyResolved(alert)),
        }
    }

    /// Get alerts of an organization, newest first.
    pub fn get_alerts(&self, org_id: &str, filter: &AlertFilter) -> Result<Vec<Alert>, DbError> {
        let conn = self.conn.lock();

        let mut sql = format!("SELECT {} FROM alerts WHERE organization_id = ?", ALERT_COLUMNS);
        let mut args = vec![SqlValue::Text(org_id.to_string())];
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(severity) = filter.severity {
            sql.push_str(" AND severity = ?");
            args.push(SqlValue::Text(severity.as_str().to_string()));
        }
        if let Some(rule_id) = &filter.rule_id {
            sql.push_str(" AND alert_rule_id = ?");
            args.push(SqlValue::Text(rule_id.clone()));
        }
        if let Some(ws) = &filter.workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(SqlValue::Text(ws.clone()));
        }
        sql.push_str(" ORDER BY fired_at DESC, seq DESC");

        let mut stmt = conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(params_from_iter(args), alert_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(alerts)
    }

    /// Get an alert by ID.
    pub fn get_alert(&self, org_id: &str, id: &str) -> Result<Alert, DbError> {
        let conn = self.conn.lock();
        find_alert(&conn, org_id, id)
    }

    /// Get every firing alert across organizations.
    pub fn get_firing_alerts(&self) -> Result<Vec<Alert>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE status = 'firing' ORDER BY seq ASC",
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map([], alert_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(alerts)
    }

    // --- Monitoring targets ---

    /// Add a monitoring target to a workspace of the organization.
    pub fn add_target(&self, new: &NewMonitoringTarget) -> Result<MonitoringTarget, DbError> {
        let conn = self.conn.lock();
        find_workspace(&conn, &new.organization_id, &new.workspace_id)?;

        let now = Utc::now();
        let target = MonitoringTarget {
            id: format!("target-{}", Uuid::new_v4()),
            organization_id: new.organization_id.clone(),
            workspace_id: new.workspace_id.clone(),
            name: new.name.clone(),
            target_type: new.target_type,
            endpoint: new.endpoint.clone(),
            labels: new.labels.clone(),
            scrape_config: new.scrape_config.clone(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            &format!(
                "INSERT INTO monitoring_targets ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                TARGET_COLUMNS
            ),
            params![
                target.id,
                target.organization_id,
                target.workspace_id,
                target.name,
                target.target_type.as_str(),
                target.endpoint,
                serde_json::to_string(&target.labels)?,
                serde_json::to_string(&target.scrape_config)?,
                target.enabled,
                fmt_time(&target.created_at),
                fmt_time(&target.updated_at),
            ],
        )?;

        Ok(target)
    }

    /// Get targets of an organization, optionally only one workspace's.
    pub fn get_targets(
        &self,
        org_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<Vec<MonitoringTarget>, DbError> {
        let conn = self.conn.lock();
        match workspace_id {
            Some(ws) => query_targets(
                &conn,
                &format!(
                    "SELECT {} FROM monitoring_targets WHERE organization_id = ?1 AND workspace_id = ?2 ORDER BY seq ASC",
                    TARGET_COLUMNS
                ),
                params![org_id, ws],
            ),
            None => query_targets(
                &conn,
                &format!(
                    "SELECT {} FROM monitoring_targets WHERE organization_id = ?1 ORDER BY seq ASC",
                    TARGET_COLUMNS
                ),
                params![org_id],
            ),
        }
    }

    /// Get every enabled target across organizations.
    pub fn get_enabled_targets(&self) -> Result<Vec<MonitoringTarget>, DbError> {
        let conn = self.conn.lock();
        query_targets(
            &conn,
            &format!(
                "SELECT {} FROM monitoring_targets WHERE enabled = 1 ORDER BY seq ASC",
                TARGET_COLUMNS
            ),
            [],
        )
    }

    /// Get a target by ID.
    pub fn get_target(&self, org_id: &str, id: &str) -> Result<MonitoringTarget, DbError> {
        let conn = self.conn.lock();
        find_target(&conn, org_id, id)
    }

    /// Update an existing target.
    pub fn update_target(
        &self,
        org_id: &str,
        id: &str,
        patch: &MonitoringTargetPatch,
    ) -> Result<MonitoringTarget, DbError> {
        let conn = self.conn.lock();
        let mut target = find_target(&conn, org_id, id)?;

        if let Some(v) = &patch.name {
            target.name = v.clone();
        }
        if let Some(v) = patch.target_type {
            target.target_type = v;
        }
        if let Some(v) = &patch.endpoint {
            target.endpoint = v.clone();
        }
        if let Some(v) = &patch.labels {
            target.labels = v.clone();
        }
        if let Some(v) = &patch.scrape_config {
            target.scrape_config = v.clone();
        }
        if let Some(v) = patch.enabled {
            target.enabled = v;
        }
        target.updated_at = Utc::now();

        conn.execute(
            "UPDATE monitoring_targets SET name = ?1, target_type = ?2, endpoint = ?3, labels = ?4,
             scrape_config = ?5, enabled = ?6, updated_at = ?7 WHERE id = ?8 AND organization_id = ?9",
            params![
                target.name,
                target.target_type.as_str(),
                target.endpoint,
                serde_json::to_string(&target.labels)?,
                serde_json::to_string(&target.scrape_config)?,
                target.enabled,
                fmt_time(&target.updated_at),
                target.id,
                target.organization_id,
            ],
        )?;

        Ok(target)
    }

    /// Delete a target.
    pub fn delete_target(&self, org_id: &str, id: &str) -> Result<(), DbError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM monitoring_targets WHERE id = ?1 AND organization_id = ?2",
            params![id, org_id],
        )?;
        if n == 0 {
            return Err(DbError::NotFound("monitoring target"));
        }
        Ok(())
    }
}

// --- Lookups shared by store methods (caller holds the lock) ---

fn find_workspace(conn: &Connection, org_id: &str, ws_id: &str) -> Result<Workspace, DbError> {
    conn.query_row(
        "SELECT id, organization_id, name FROM workspaces WHERE id = ?1 AND organization_id = ?2",
        params![ws_id, org_id],
        |row| {
            Ok(Workspace {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(DbError::NotFound("workspace"))
}

fn find_metric(conn: &Connection, org_id: &str, id: &str) -> Result<MetricDefinition, DbError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM metric_definitions WHERE id = ?1 AND organization_id = ?2",
            METRIC_COLUMNS
        ),
        params![id, org_id],
        metric_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("metric"))
}

fn find_rule(conn: &Connection, org_id: &str, id: &str) -> Result<AlertRule, DbError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM alert_rules WHERE id = ?1 AND organization_id = ?2",
            RULE_COLUMNS
        ),
        params![id, org_id],
        rule_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("alert rule"))
}

fn find_alert(conn: &Connection, org_id: &str, id: &str) -> Result<Alert, DbError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM alerts WHERE id = ?1 AND organization_id = ?2",
            ALERT_COLUMNS
        ),
        params![id, org_id],
        alert_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("alert"))
}

fn find_firing_alert(conn: &Connection, rule_id: &str) -> Result<Option<Alert>, DbError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM alerts WHERE alert_rule_id = ?1 AND status = 'firing'",
                ALERT_COLUMNS
            ),
            params![rule_id],
            alert_from_row,
        )
        .optional()?)
}

fn find_target(conn: &Connection, org_id: &str, id: &str) -> Result<MonitoringTarget, DbError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM monitoring_targets WHERE id = ?1 AND organization_id = ?2",
            TARGET_COLUMNS
        ),
        params![id, org_id],
        target_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound("monitoring target"))
}

/// Conditional update; resolved_at never precedes fired_at.
fn resolve_if_firing(
    conn: &Connection,
    alert_id: &str,
    now: DateTime<Utc>,
    resolved_by: &str,
) -> Result<bool, DbError> {
    let n = conn.execute(
        "UPDATE alerts SET status = 'resolved', resolved_at = MAX(?1, fired_at), resolved_by = ?2
         WHERE id = ?3 AND status = 'firing'",
        params![fmt_time(&now), resolved_by, alert_id],
    )?;
    Ok(n == 1)
}

fn query_rules<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<AlertRule>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rules = stmt
        .query_map(params, rule_from_row)?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(rules)
}

fn query_targets<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<MonitoringTarget>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let targets = stmt
        .query_map(params, target_from_row)?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(targets)
}

/// Newest rows matching `where_clause` (last arg is the limit), returned oldest first.
fn query_values(
    conn: &Connection,
    where_clause: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<MetricValue>, DbError> {
    let sql = format!(
        "SELECT {cols} FROM (
            SELECT seq, {cols} FROM metric_values WHERE {where_clause}
            ORDER BY timestamp DESC, seq DESC LIMIT ?
         ) ORDER BY timestamp ASC, seq ASC",
        cols = VALUE_COLUMNS,
        where_clause = where_clause,
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map(params_from_iter(args), value_from_row)?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(values)
}

// --- Row mapping ---

fn metric_from_row(row: &Row) -> SqlResult<MetricDefinition> {
    Ok(MetricDefinition {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        metric_type: enum_at(row, 3)?,
        description: row.get(4)?,
        unit: row.get(5)?,
        labels: json_at(row, 6)?,
        created_at: time_at(row, 7)?,
        updated_at: time_at(row, 8)?,
        enabled: row.get(9)?,
    })
}

fn value_from_row(row: &Row) -> SqlResult<MetricValue> {
    Ok(MetricValue {
        id: row.get(0)?,
        metric_id: row.get(1)?,
        organization_id: row.get(2)?,
        workspace_id: row.get(3)?,
        value: row.get(4)?,
        labels: json_at(row, 5)?,
        timestamp: time_at(row, 6)?,
        source: row.get(7)?,
        created_at: time_at(row, 8)?,
    })
}

fn rule_from_row(row: &Row) -> SqlResult<AlertRule> {
    Ok(AlertRule {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        workspace_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        metric_query: row.get(5)?,
        condition: enum_at(row, 6)?,
        threshold: row.get(7)?,
        duration: row.get(8)?,
        severity: enum_at(row, 9)?,
        enabled: row.get(10)?,
        annotations: json_at(row, 11)?,
        created_at: time_at(row, 12)?,
        updated_at: time_at(row, 13)?,
    })
}

fn alert_from_row(row: &Row) -> SqlResult<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        alert_rule_id: row.get(1)?,
        organization_id: row.get(2)?,
        workspace_id: row.get(3)?,
        status: enum_at(row, 4)?,
        severity: enum_at(row, 5)?,
        value: row.get(6)?,
        fired_at: time_at(row, 7)?,
        resolved_at: opt_time_at(row, 8)?,
        resolved_by: row.get(9)?,
        acknowledged_at: opt_time_at(row, 10)?,
        acknowledged_by: row.get(11)?,
    })
}

fn target_from_row(row: &Row) -> SqlResult<MonitoringTarget> {
    Ok(MonitoringTarget {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        workspace_id: row.get(2)?,
        name: row.get(3)?,
        target_type: enum_at(row, 4)?,
        endpoint: row.get(5)?,
        labels: json_at(row, 6)?,
        scrape_config: json_at(row, 7)?,
        enabled: row.get(8)?,
        created_at: time_at(row, 9)?,
        updated_at: time_at(row, 10)?,
    })
}

fn time_at(row: &Row, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_time_col(idx, &s)
}

fn opt_time_at(row: &Row, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_time_col(idx, &s)).transpose()
}

fn parse_time_col(idx: usize, s: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {:?}", s).into(),
        )
    })
}

fn json_at<T: DeserializeOwned>(row: &Row, idx: usize) -> SqlResult<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_at<T: FromStr<Err = UnknownVariant>>(row: &Row, idx: usize) -> SqlResult<T> {
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e: UnknownVariant| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conflict_or(err: rusqlite::Error, message: &str) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DbError::Conflict(message.to_string())
        }
        _ => DbError::Sqlite(err),
    }
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        for (ws, org) in [("ws-a1", "org-a"), ("ws-a2", "org-a"), ("ws-b1", "org-b")] {
            store
                .upsert_workspace(&Workspace {
                    id: ws.to_string(),
                    organization_id: org.to_string(),
                    name: ws.to_string(),
                })
                .unwrap();
        }
        (tmp, store)
    }

    fn new_metric(org: &str, name: &str) -> NewMetricDefinition {
        NewMetricDefinition {
            organization_id: org.to_string(),
            name: name.to_string(),
            metric_type: MetricType::Gauge,
            description: String::new(),
            unit: "percent".to_string(),
            labels: vec!["pod".to_string()],
        }
    }

    fn new_rule(org: &str, query: &str) -> NewAlertRule {
        NewAlertRule {
            organization_id: org.to_string(),
            workspace_id: None,
            name: "high cpu".to_string(),
            description: String::new(),
            metric_query: query.to_string(),
            condition: Condition::GreaterThan,
            threshold: 80.0,
            duration: "5m".to_string(),
            severity: Severity::Warning,
            enabled: true,
            annotations: BTreeMap::new(),
        }
    }

    fn sample(ws: &str, value: f64, timestamp: DateTime<Utc>) -> NewMetricValue {
        NewMetricValue {
            workspace_id: ws.to_string(),
            value,
            labels: BTreeMap::new(),
            timestamp,
            source: "api".to_string(),
        }
    }

    #[test]
    fn test_metric_crud() {
        let (_tmp, store) = test_store();

        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        assert!(metric.id.starts_with("metric-"));

        let fetched = store.get_metric("org-a", &metric.id).unwrap();
        assert_eq!(fetched.name, "cpu_usage");
        assert_eq!(fetched.labels, vec!["pod".to_string()]);

        let patch = MetricDefinitionPatch {
            description: Some("CPU".to_string()),
            ..Default::default()
        };
        let updated = store.update_metric("org-a", &metric.id, &patch).unwrap();
        assert_eq!(updated.description, "CPU");
        assert_eq!(updated.unit, "percent");

        store.delete_metric("org-a", &metric.id).unwrap();
        assert!(matches!(
            store.get_metric("org-a", &metric.id),
            Err(DbError::NotFound("metric"))
        ));
    }

    #[test]
    fn test_metric_name_unique_per_organization() {
        let (_tmp, store) = test_store();

        store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        let err = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m == "metric already exists"));

        store.add_metric(&new_metric("org-b", "cpu_usage")).unwrap();
    }

    #[test]
    fn test_metrics_are_tenant_scoped() {
        let (_tmp, store) = test_store();

        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        store.add_metric(&new_metric("org-a", "mem_usage")).unwrap();

        assert!(store.get_metric("org-b", &metric.id).is_err());
        assert!(store.delete_metric("org-b", &metric.id).is_err());
        assert!(store.get_metrics("org-b").unwrap().is_empty());

        let names: Vec<_> = store
            .get_metrics("org-a")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["cpu_usage", "mem_usage"]);
    }

    #[test]
    fn test_delete_metric_blocked_by_references() {
        let (_tmp, store) = test_store();

        let with_values = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        store
            .add_metric_value("org-a", &with_values.id, &sample("ws-a1", 1.0, Utc::now()))
            .unwrap();
        let err = store.delete_metric("org-a", &with_values.id).unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m == "metric has recorded values"));

        let referenced = store.add_metric(&new_metric("org-a", "mem_usage")).unwrap();
        store.add_alert_rule(&new_rule("org-a", "avg(mem_usage) > 90")).unwrap();
        let err = store.delete_metric("org-a", &referenced.id).unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m.starts_with("metric is referenced by alert rule")));
    }

    #[test]
    fn test_values_ordering_and_scope() {
        let (_tmp, store) = test_store();
        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        let base = Utc::now();

        for (i, offset) in [30, 10, 20].iter().enumerate() {
            let ws = if i == 0 { "ws-a2" } else { "ws-a1" };
            store
                .add_metric_value(
                    "org-a",
                    &metric.id,
                    &sample(ws, *offset as f64, base + ChronoDuration::seconds(*offset)),
                )
                .unwrap();
        }

        let values = store
            .get_metric_values("org-a", &metric.id, &ValueFilter::default())
            .unwrap();
        let got: Vec<f64> = values.iter().map(|v| v.value).collect();
        assert_eq!(got, vec![10.0, 20.0, 30.0]);

        let filter = ValueFilter {
            workspace_id: Some("ws-a1".to_string()),
            ..Default::default()
        };
        assert_eq!(store.get_metric_values("org-a", &metric.id, &filter).unwrap().len(), 2);

        let filter = ValueFilter {
            limit: 2,
            ..Default::default()
        };
        let got: Vec<f64> = store
            .get_metric_values("org-a", &metric.id, &filter)
            .unwrap()
            .iter()
            .map(|v| v.value)
            .collect();
        assert_eq!(got, vec![20.0, 30.0]);

        let ws_values = store.get_workspace_values("org-a", "ws-a1", 100).unwrap();
        assert_eq!(ws_values.len(), 2);
        assert!(store.get_workspace_values("org-b", "ws-a1", 100).unwrap().is_empty());
    }

    #[test]
    fn test_value_requires_metric_and_workspace_in_org() {
        let (_tmp, store) = test_store();
        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();

        let err = store
            .add_metric_value("org-a", "metric-missing", &sample("ws-a1", 1.0, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("metric")));

        let err = store
            .add_metric_value("org-a", &metric.id, &sample("ws-b1", 1.0, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("workspace")));

        let err = store
            .add_metric_value("org-b", &metric.id, &sample("ws-b1", 1.0, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("metric")));
    }

    #[test]
    fn test_disabled_metric_rejects_values() {
        let (_tmp, store) = test_store();
        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        assert!(metric.enabled);
        store
            .add_metric_value("org-a", &metric.id, &sample("ws-a1", 1.0, Utc::now()))
            .unwrap();

        let disable = MetricDefinitionPatch {
            enabled: Some(false),
            ..Default::default()
        };
        let updated = store.update_metric("org-a", &metric.id, &disable).unwrap();
        assert!(!updated.enabled);
        assert!(!store.get_metric("org-a", &metric.id).unwrap().enabled);

        let err = store
            .add_metric_value("org-a", &metric.id, &sample("ws-a1", 2.0, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("metric")));
        // History stays readable.
        assert_eq!(
            store
                .get_metric_values("org-a", &metric.id, &ValueFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_retention_delete() {
        let (_tmp, store) = test_store();
        let metric = store.add_metric(&new_metric("org-a", "cpu_usage")).unwrap();
        let now = Utc::now();

        store
            .add_metric_value("org-a", &metric.id, &sample("ws-a1", 1.0, now - ChronoDuration::days(20)))
            .unwrap();
        store
            .add_metric_value("org-a", &metric.id, &sample("ws-a1", 2.0, now))
            .unwrap();

        let removed = store
            .delete_metric_values_before(now - ChronoDuration::days(15))
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_single_firing_alert_per_rule() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let now = Utc::now();

        let alert = store.fire_alert(&rule, 91.0, now).unwrap();
        let err = store.fire_alert(&rule, 92.0, now).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        assert!(store.resolve_alert_if_firing(&alert.id, now, RESOLVED_BY_ENGINE).unwrap());
        assert!(!store.resolve_alert_if_firing(&alert.id, now, RESOLVED_BY_ENGINE).unwrap());

        // A new episode is allowed once the previous one resolved.
        store.fire_alert(&rule, 93.0, now).unwrap();
        assert_eq!(store.get_alerts("org-a", &AlertFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_alert_is_idempotent() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let fired = Utc::now();
        let alert = store.fire_alert(&rule, 91.0, fired).unwrap();

        let first_resolve = fired + ChronoDuration::seconds(10);
        let resolved = match store.resolve_alert("org-a", &alert.id, first_resolve, "user-1").unwrap() {
            ResolveOutcome::Resolved(a) => a,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("user-1"));

        match store
            .resolve_alert("org-a", &alert.id, first_resolve + ChronoDuration::seconds(60), "user-2")
            .unwrap()
        {
            ResolveOutcome::AlreadyResolved(a) => {
                assert_eq!(a.resolved_at, resolved.resolved_at);
                assert_eq!(a.resolved_by.as_deref(), Some("user-1"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(matches!(
            store.resolve_alert("org-b", &alert.id, first_resolve, "user-3"),
            Err(DbError::NotFound("alert"))
        ));
    }

    #[test]
    fn test_acknowledge_alert() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let fired = Utc::now();
        let alert = store.fire_alert(&rule, 91.0, fired).unwrap();
        assert!(alert.acknowledged_at.is_none());

        let acked = match store
            .acknowledge_alert("org-a", &alert.id, fired + ChronoDuration::seconds(10), "user-1")
            .unwrap()
        {
            AcknowledgeOutcome::Acknowledged(a) => a,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(acked.status, AlertStatus::Firing);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("user-1"));
        assert!(acked.acknowledged_at.unwrap() >= acked.fired_at);

        // A second acknowledgement keeps the first one.
        match store
            .acknowledge_alert("org-a", &alert.id, fired + ChronoDuration::seconds(20), "user-2")
            .unwrap()
        {
            AcknowledgeOutcome::Acknowledged(a) => {
                assert_eq!(a.acknowledged_by.as_deref(), Some("user-1"));
                assert_eq!(a.acknowledged_at, acked.acknowledged_at);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Acknowledged alerts still resolve normally.
        store
            .resolve_alert_if_firing(&alert.id, fired + ChronoDuration::seconds(30), RESOLVED_BY_ENGINE)
            .unwrap();
        assert!(matches!(
            store.acknowledge_alert("org-a", &alert.id, Utc::now(), "user-1").unwrap(),
            AcknowledgeOutcome::AlreadyResolved(_)
        ));
        assert!(matches!(
            store.acknowledge_alert("org-b", &alert.id, Utc::now(), "user-3"),
            Err(DbError::NotFound("alert"))
        ));
    }

    #[test]
    fn test_resolved_at_never_precedes_fired_at() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let fired = Utc::now();
        let alert = store.fire_alert(&rule, 91.0, fired).unwrap();

        store
            .resolve_alert_if_firing(&alert.id, fired - ChronoDuration::seconds(5), RESOLVED_BY_ENGINE)
            .unwrap();
        let stored = store.get_alert("org-a", &alert.id).unwrap();
        assert!(stored.resolved_at.unwrap() >= stored.fired_at);
    }

    #[test]
    fn test_delete_rule_resolves_firing_alert() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let alert = store.fire_alert(&rule, 91.0, Utc::now()).unwrap();

        let resolved = store.delete_alert_rule("org-a", &rule.id, Utc::now()).unwrap().unwrap();
        assert_eq!(resolved.id, alert.id);
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(store.get_alert_rule("org-a", &rule.id).is_err());
        assert_eq!(store.get_alerts("org-a", &AlertFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_rule_workspace_must_belong_to_org() {
        let (_tmp, store) = test_store();
        let mut rule = new_rule("org-a", "cpu_usage");
        rule.workspace_id = Some("ws-b1".to_string());
        assert!(matches!(store.add_alert_rule(&rule), Err(DbError::NotFound("workspace"))));

        rule.workspace_id = Some("ws-a1".to_string());
        let created = store.add_alert_rule(&rule).unwrap();
        assert_eq!(store.get_alert_rules("org-a", Some("ws-a1")).unwrap()[0].id, created.id);
        assert!(store.get_alert_rules("org-a", Some("ws-a2")).unwrap().is_empty());
    }

    #[test]
    fn test_alert_filters() {
        let (_tmp, store) = test_store();
        let rule = store.add_alert_rule(&new_rule("org-a", "cpu_usage")).unwrap();
        let now = Utc::now();
        let first = store.fire_alert(&rule, 91.0, now).unwrap();
        store.resolve_alert_if_firing(&first.id, now, RESOLVED_BY_ENGINE).unwrap();
        store.fire_alert(&rule, 95.0, now + ChronoDuration::seconds(1)).unwrap();

        let firing = AlertFilter {
            status: Some(AlertStatus::Firing),
            ..Default::default()
        };
        assert_eq!(store.get_alerts("org-a", &firing).unwrap().len(), 1);
        assert_eq!(store.get_firing_alerts().unwrap().len(), 1);

        let mut critical_rule = new_rule("org-a", "mem_usage");
        critical_rule.severity = Severity::Critical;
        let critical_rule = store.add_alert_rule(&critical_rule).unwrap();
        store.fire_alert(&critical_rule, 99.0, now).unwrap();

        let critical = AlertFilter {
            severity: Some(Severity::Critical),
            ..Default::default()
        };
        let found = store.get_alerts("org-a", &critical).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].alert_rule_id, critical_rule.id);
        let warning_firing = AlertFilter {
            status: Some(AlertStatus::Firing),
            severity: Some(Severity::Warning),
            ..Default::default()
        };
        assert_eq!(store.get_alerts("org-a", &warning_firing).unwrap().len(), 1);

        let all = store.get_alerts("org-a", &AlertFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value, 95.0);
        assert!(store.get_alerts("org-b", &AlertFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = test_store();

        let new = NewMonitoringTarget {
            organization_id: "org-a".to_string(),
            workspace_id: "ws-a1".to_string(),
            name: "vcluster api".to_string(),
            target_type: TargetType::Vcluster,
            endpoint: "https://ws-a1.example.com/metrics".to_string(),
            labels: BTreeMap::from([("env".to_string(), "prod".to_string())]),
            scrape_config: serde_json::Map::new(),
        };
        let target = store.add_target(&new).unwrap();
        assert!(target.enabled);

        let patch = MonitoringTargetPatch {
            enabled: Some(false),
            ..Default::default()
        };
        let updated = store.update_target("org-a", &target.id, &patch).unwrap();
        assert!(!updated.enabled);
        assert!(store.get_enabled_targets().unwrap().is_empty());

        assert!(store.get_target("org-b", &target.id).is_err());
        assert!(store.delete_target("org-b", &target.id).is_err());
        store.delete_target("org-a", &target.id).unwrap();
        assert!(store.get_targets("org-a", None).unwrap().is_empty());
    }
}
