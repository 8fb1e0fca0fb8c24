//! Alert engine: periodic threshold evaluation of alert rules.
//!
//! Each enabled rule moves through Idle, PendingBreach, Firing and Resolved.
//! Firing is the rule's open alert row in the store. PendingBreach is the
//! first-breach time kept in memory, so it resets when the process restarts.

use crate::db::{Alert, AlertRule, DbError, ResolveOutcome, Store, RESOLVED_BY_ENGINE};
use crate::query::{parse_time_span, sample_value, InstantQuery, InvalidDuration, PrometheusClient, QueryError};
use crate::telemetry::Telemetry;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a single rule could not be evaluated this tick.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Store(#[from] DbError),
    #[error("rule duration: {0}")]
    Duration(#[from] InvalidDuration),
}

/// What one evaluation did to a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Condition not holding and nothing open.
    Idle,
    /// Condition holding since the given time, duration not yet reached.
    Pending(DateTime<Utc>),
    Fired(Alert),
    /// Condition still holding and the alert is already open.
    StillFiring,
    Resolved(String),
}

/// Counts of one evaluation tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub failed: usize,
    pub fired: usize,
    pub resolved: usize,
}

/// Evaluates alert rules against the query backend.
pub struct AlertEngine {
    store: Arc<Store>,
    client: PrometheusClient,
    telemetry: Arc<Telemetry>,
    pending: Mutex<HashMap<String, DateTime<Utc>>>,
    stop: Arc<tokio::sync::Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl AlertEngine {
    pub fn new(store: Arc<Store>, client: PrometheusClient, telemetry: Arc<Telemetry>) -> Self {
        Self {
            store,
            client,
            telemetry,
            pending: Mutex::new(HashMap::new()),
            stop: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Start the evaluation loop on a fixed cadence.
    pub fn start(self: &Arc<Self>, every: Duration) {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = engine.stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!("AlertEngine: evaluating every {:?}", every);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        engine.evaluate_all(Utc::now()).await;
                    }
                }
            }
        });
    }

    /// Stop the evaluation loop.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }

    /// Run one tick over every enabled rule.
    ///
    /// A failing rule is logged and skipped; the rest of the tick continues.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> TickSummary {
        self.telemetry.evaluation_ticks.inc();
        let mut summary = TickSummary::default();

        let rules = match self.store.get_enabled_alert_rules() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("AlertEngine: Failed to get rules: {}", e);
                return summary;
            }
        };

        let enabled: HashSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        self.pending.lock().retain(|id, _| enabled.contains(id.as_str()));
        summary.resolved += self.resolve_orphaned(&enabled, now);

        for rule in &rules {
            summary.evaluated += 1;
            match self.evaluate_rule(rule, now).await {
                Ok(Transition::Fired(alert)) => {
                    tracing::info!(
                        "AlertEngine: Alert {} firing for rule {} (org {}, value {})",
                        alert.id,
                        rule.id,
                        rule.organization_id,
                        alert.value
                    );
                    self.telemetry.alerts_fired.inc();
                    summary.fired += 1;
                }
                Ok(Transition::Resolved(alert_id)) => {
                    tracing::info!(
                        "AlertEngine: Alert {} resolved for rule {} (org {})",
                        alert_id,
                        rule.id,
                        rule.organization_id
                    );
                    self.telemetry.alerts_resolved.inc();
                    summary.resolved += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("AlertEngine: Failed to evaluate rule {}: {}", rule.id, e);
                    self.telemetry.evaluation_failures.inc();
                    summary.failed += 1;
                }
            }
        }

        match self.store.get_firing_alerts() {
            Ok(firing) => self.telemetry.alerts_firing.set(firing.len() as i64),
            Err(e) => tracing::error!("AlertEngine: Failed to count firing alerts: {}", e),
        }

        summary
    }

    /// Query the backend for one rule and drive its state machine.
    ///
    /// A query error leaves the rule's state untouched.
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<Transition, EvalError> {
        let query = InstantQuery {
            query: rule.metric_query.clone(),
            time: Some(now),
        };
        let result = self.client.instant(&query).await;
        self.telemetry.observe_query("evaluation", &result);
        let observed = sample_value(&result?)?;

        self.apply(rule, observed, now)
    }

    fn apply(
        &self,
        rule: &AlertRule,
        observed: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Transition, EvalError> {
        let hold_for = parse_time_span(&rule.duration)?;

        let mut pending = self.pending.lock();
        let firing = self.store.get_firing_alert(&rule.id)?;

        let breach = observed.filter(|v| rule.condition.holds(*v, rule.threshold));
        let Some(value) = breach else {
            pending.remove(&rule.id);
            if let Some(alert) = firing {
                if self
                    .store
                    .resolve_alert_if_firing(&alert.id, now, RESOLVED_BY_ENGINE)?
                {
                    return Ok(Transition::Resolved(alert.id));
                }
            }
            return Ok(Transition::Idle);
        };

        if firing.is_some() {
            return Ok(Transition::StillFiring);
        }

        let since = *pending.entry(rule.id.clone()).or_insert(now);
        if now - since < hold_for {
            return Ok(Transition::Pending(since));
        }

        match self.store.fire_alert(rule, value, now) {
            Ok(alert) => {
                pending.remove(&rule.id);
                Ok(Transition::Fired(alert))
            }
            Err(DbError::Conflict(_)) => Ok(Transition::StillFiring),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve firing alerts whose rule is disabled or gone.
    fn resolve_orphaned(&self, enabled: &HashSet<&str>, now: DateTime<Utc>) -> usize {
        let firing = match self.store.get_firing_alerts() {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("AlertEngine: Failed to get firing alerts: {}", e);
                return 0;
            }
        };

        let mut resolved = 0;
        for alert in firing
            .iter()
            .filter(|a| !enabled.contains(a.alert_rule_id.as_str()))
        {
            match self
                .store
                .resolve_alert_if_firing(&alert.id, now, RESOLVED_BY_ENGINE)
            {
                Ok(true) => {
                    tracing::info!(
                        "AlertEngine: Alert {} resolved, rule {} disabled (org {})",
                        alert.id,
                        alert.alert_rule_id,
                        alert.organization_id
                    );
                    self.telemetry.alerts_resolved.inc();
                    resolved += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("AlertEngine: Failed to resolve alert {}: {}", alert.id, e)
                }
            }
        }
        resolved
    }

    /// Manually resolve an alert and reset its rule to Idle.
    pub fn resolve_alert(
        &self,
        org_id: &str,
        alert_id: &str,
        user_id: &str,
    ) -> Result<ResolveOutcome, DbError> {
        let mut pending = self.pending.lock();
        let outcome = self
            .store
            .resolve_alert(org_id, alert_id, Utc::now(), user_id)?;
        if let ResolveOutcome::Resolved(alert) = &outcome {
            pending.remove(&alert.alert_rule_id);
            self.telemetry.alerts_resolved.inc();
            self.telemetry.alerts_firing.dec();
        }
        Ok(outcome)
    }

    /// Delete a rule, resolving its open alert and dropping its timer.
    pub fn delete_rule(&self, org_id: &str, rule_id: &str) -> Result<Option<Alert>, DbError> {
        let mut pending = self.pending.lock();
        let resolved = self.store.delete_alert_rule(org_id, rule_id, Utc::now())?;
        pending.remove(rule_id);
        if resolved.is_some() {
            self.telemetry.alerts_resolved.inc();
            self.telemetry.alerts_firing.dec();
        }
        Ok(resolved)
    }

    /// Drop a rule's pending-breach timer after its definition changed.
    pub fn forget_rule(&self, rule_id: &str) {
        self.pending.lock().remove(rule_id);
    }
}
