//! Configuration module for the monitoring engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::query::parse_duration;

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings of the monitoring subsystem.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Base URL of the Prometheus-compatible query backend
    pub prometheus_url: String,
    /// Per-request timeout for backend queries
    pub query_timeout: Duration,
    /// Port of the self-metrics listener
    pub metrics_port: u16,
    /// Path the self-metrics are served on
    pub metrics_path: String,
    pub enable_metrics: bool,
    pub enable_alerts: bool,
    /// Alert evaluation cadence
    pub scrape_interval: Duration,
    /// How long metric values are kept
    pub retention_period: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://localhost:9090".to_string(),
            query_timeout: Duration::from_secs(30),
            metrics_port: 2112,
            metrics_path: "/metrics".to_string(),
            enable_metrics: true,
            enable_alerts: true,
            scrape_interval: Duration::from_secs(15),
            retention_period: Duration::from_secs(15 * 24 * 3600),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "kaasmon.db")
    pub db_path: String,
    pub monitoring: MonitoringConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "kaasmon.db".to_string(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KAASMON_HTTP_PORT`: HTTP port (default: 8080)
    /// - `KAASMON_DB_PATH`: Database file path (default: "kaasmon.db")
    /// - `KAASMON_PROMETHEUS_URL`: Query backend (default: "http://localhost:9090")
    /// - `KAASMON_QUERY_TIMEOUT`: Backend timeout (default: "30s")
    /// - `KAASMON_METRICS_PORT` / `KAASMON_METRICS_PATH`: self-metrics listener (default: 2112, "/metrics")
    /// - `KAASMON_ENABLE_METRICS` / `KAASMON_ENABLE_ALERTS`: feature switches (default: true)
    /// - `KAASMON_SCRAPE_INTERVAL`: alert evaluation cadence (default: "15s")
    /// - `KAASMON_RETENTION_PERIOD`: value retention (default: "15d")
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let m = &mut cfg.monitoring;

        if let Some(v) = lookup("KAASMON_HTTP_PORT") {
            cfg.http_port = parse_port("KAASMON_HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("KAASMON_DB_PATH") {
            cfg.db_path = v;
        }
        if let Some(v) = lookup("KAASMON_PROMETHEUS_URL") {
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                return Err(invalid("KAASMON_PROMETHEUS_URL", &v, "expected an http(s) URL"));
            }
            m.prometheus_url = v;
        }
        if let Some(v) = lookup("KAASMON_QUERY_TIMEOUT") {
            m.query_timeout = parse_positive("KAASMON_QUERY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("KAASMON_METRICS_PORT") {
            m.metrics_port = parse_port("KAASMON_METRICS_PORT", &v)?;
        }
        if let Some(v) = lookup("KAASMON_METRICS_PATH") {
            if !v.starts_with('/') {
                return Err(invalid("KAASMON_METRICS_PATH", &v, "must start with '/'"));
            }
            m.metrics_path = v;
        }
        if let Some(v) = lookup("KAASMON_ENABLE_METRICS") {
            m.enable_metrics = parse_bool("KAASMON_ENABLE_METRICS", &v)?;
        }
        if let Some(v) = lookup("KAASMON_ENABLE_ALERTS") {
            m.enable_alerts = parse_bool("KAASMON_ENABLE_ALERTS", &v)?;
        }
        if let Some(v) = lookup("KAASMON_SCRAPE_INTERVAL") {
            m.scrape_interval = parse_positive("KAASMON_SCRAPE_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("KAASMON_RETENTION_PERIOD") {
            m.retention_period = parse_positive("KAASMON_RETENTION_PERIOD", &v)?;
        }

        Ok(cfg)
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_port(var: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(var, value, &e.to_string()))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected a boolean")),
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(value.trim()).map_err(|e| invalid(var, value, &e.to_string()))?;
    if d.is_zero() {
        return Err(invalid(var, value, "must be positive"));
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "kaasmon.db");
        assert_eq!(cfg.monitoring.prometheus_url, "http://localhost:9090");
        assert_eq!(cfg.monitoring.metrics_port, 2112);
        assert_eq!(cfg.monitoring.scrape_interval, Duration::from_secs(15));
        assert_eq!(cfg.monitoring.retention_period, Duration::from_secs(15 * 86400));
        assert!(cfg.monitoring.enable_alerts);
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("KAASMON_HTTP_PORT", "9000"),
            ("KAASMON_SCRAPE_INTERVAL", "1m"),
            ("KAASMON_ENABLE_ALERTS", "false"),
            ("KAASMON_PROMETHEUS_URL", "https://prom.internal:9090"),
        ])
        .unwrap();
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.monitoring.scrape_interval, Duration::from_secs(60));
        assert!(!cfg.monitoring.enable_alerts);
        assert_eq!(cfg.monitoring.prometheus_url, "https://prom.internal:9090");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("KAASMON_HTTP_PORT", "eighty")]).is_err());
        assert!(load(&[("KAASMON_SCRAPE_INTERVAL", "0s")]).is_err());
        assert!(load(&[("KAASMON_RETENTION_PERIOD", "two weeks")]).is_err());
        assert!(load(&[("KAASMON_ENABLE_METRICS", "maybe")]).is_err());
        assert!(load(&[("KAASMON_METRICS_PATH", "metrics")]).is_err());
    }
}
