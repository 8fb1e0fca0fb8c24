//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a string is not one of an enumeration's values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown value {0:?}")]
pub struct UnknownVariant(pub String);

/// Closed string enumerations stored as TEXT and sent as JSON strings.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            #[cfg(test)]
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

string_enum!(
    /// Kind of a metric definition.
    MetricType {
        Counter => "counter",
        Gauge => "gauge",
        Histogram => "histogram",
        Summary => "summary",
    }
);

string_enum!(
    /// Comparison applied between a query result and a rule threshold.
    Condition {
        GreaterThan => ">",
        LessThan => "<",
        GreaterThanOrEqual => ">=",
        LessThanOrEqual => "<=",
        Equal => "==",
        NotEqual => "!=",
    }
);

impl Condition {
    /// Whether `value <op> threshold` holds.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterThanOrEqual => value >= threshold,
            Self::LessThanOrEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }
}

string_enum!(
    Severity {
        Warning => "warning",
        Critical => "critical",
    }
);

string_enum!(
    AlertStatus {
        Firing => "firing",
        Resolved => "resolved",
    }
);

string_enum!(
    /// What a monitoring target points at.
    TargetType {
        Vcluster => "vcluster",
        Pod => "pod",
        Service => "service",
        Node => "node",
    }
);

/// A workspace row owned by the workspace management layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub organization_id: String,
    pub name: String,
}

/// A metric definition registered by an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    pub labels: Vec<String>,
    /// Disabled metrics keep their history but accept no new samples.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMetricDefinition {
    pub organization_id: String,
    pub name: String,
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    pub labels: Vec<String>,
}

/// Mutable fields of a metric definition.
#[derive(Debug, Clone, Default)]
pub struct MetricDefinitionPatch {
    pub description: Option<String>,
    pub unit: Option<String>,
    pub labels: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

/// A single recorded sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValue {
    pub id: String,
    pub metric_id: String,
    pub organization_id: String,
    pub workspace_id: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMetricValue {
    pub workspace_id: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Filters for reading samples of one metric.
#[derive(Debug, Clone)]
pub struct ValueFilter {
    pub workspace_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl Default for ValueFilter {
    fn default() -> Self {
        Self {
            workspace_id: None,
            start: None,
            end: None,
            limit: 100,
        }
    }
}

/// A threshold rule evaluated by the alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub organization_id: String,
    pub workspace_id: Option<String>,
    pub name: String,
    pub description: String,
    pub metric_query: String,
    pub condition: Condition,
    pub threshold: f64,
    pub duration: String,
    pub severity: Severity,
    pub enabled: bool,
    pub annotations: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub organization_id: String,
    pub workspace_id: Option<String>,
    pub name: String,
    pub description: String,
    pub metric_query: String,
    pub condition: Condition,
    pub threshold: f64,
    pub duration: String,
    pub severity: Severity,
    pub enabled: bool,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertRulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metric_query: Option<String>,
    pub condition: Option<Condition>,
    pub threshold: Option<f64>,
    pub duration: Option<String>,
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
    pub annotations: Option<BTreeMap<String, String>>,
}

/// One firing episode of an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_rule_id: String,
    pub organization_id: String,
    pub workspace_id: Option<String>,
    pub status: AlertStatus,
    pub severity: Severity,
    pub value: f64,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    /// Set once when an operator takes ownership of a firing alert.
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub rule_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Outcome of a resolve request against a stored alert.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Resolved(Alert),
    AlreadyResolved(Alert),
}

/// Outcome of an acknowledge request. Acknowledging twice keeps the first.
#[derive(Debug, Clone)]
pub enum AcknowledgeOutcome {
    Acknowledged(Alert),
    AlreadyResolved(Alert),
}

/// A scrape endpoint registered for the external collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringTarget {
    pub id: String,
    pub organization_id: String,
    pub workspace_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub endpoint: String,
    pub labels: BTreeMap<String, String>,
    pub scrape_config: serde_json::Map<String, serde_json::Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMonitoringTarget {
    pub organization_id: String,
    pub workspace_id: String,
    pub name: String,
    pub target_type: TargetType,
    pub endpoint: String,
    pub labels: BTreeMap<String, String>,
    pub scrape_config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MonitoringTargetPatch {
    pub name: Option<String>,
    pub target_type: Option<TargetType>,
    pub endpoint: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub scrape_config: Option<serde_json::Map<String, serde_json::Value>>,
    pub enabled: Option<bool>,
}
