//! Prometheus-style duration parsing (`30s`, `5m`, `1h30m`, `15d`).

use chrono::Duration as ChronoDuration;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid duration {0:?}")]
pub struct InvalidDuration(pub String);

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<y>[0-9]+)y)?(?:(?P<w>[0-9]+)w)?(?:(?P<d>[0-9]+)d)?(?:(?P<h>[0-9]+)h)?(?:(?P<m>[0-9]+)m)?(?:(?P<s>[0-9]+)s)?(?:(?P<ms>[0-9]+)ms)?$",
        )
        .expect("duration pattern is valid")
    })
}

/// Units in the order the pattern lists them, with their length in milliseconds.
const UNITS: [(&str, u64); 7] = [
    ("y", 365 * 24 * 60 * 60 * 1000),
    ("w", 7 * 24 * 60 * 60 * 1000),
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

/// Parse a duration string.
///
/// Accepts unit-suffixed components in descending order (`1h30m`, `500ms`)
/// or a bare non-negative number of seconds (`15`, `0.5`).
pub fn parse_duration(input: &str) -> Result<Duration, InvalidDuration> {
    let s = input.trim();
    let invalid = || InvalidDuration(input.to_string());

    if s.is_empty() {
        return Err(invalid());
    }

    if let Ok(secs) = s.parse::<f64>() {
        if secs < 0.0 {
            return Err(invalid());
        }
        return Duration::try_from_secs_f64(secs).map_err(|_| invalid());
    }

    let caps = duration_regex().captures(s).ok_or_else(invalid)?;

    let mut total_ms: u64 = 0;
    for (unit, ms_per_unit) in UNITS {
        if let Some(m) = caps.name(unit) {
            let n: u64 = m.as_str().parse().map_err(|_| invalid())?;
            total_ms = n
                .checked_mul(ms_per_unit)
                .and_then(|v| total_ms.checked_add(v))
                .ok_or_else(invalid)?;
        }
    }

    Ok(Duration::from_millis(total_ms))
}

/// Parse a duration that must be strictly positive (query steps, intervals).
pub fn parse_positive_duration(input: &str) -> Result<Duration, InvalidDuration> {
    let d = parse_duration(input)?;
    if d.is_zero() {
        return Err(InvalidDuration(input.to_string()));
    }
    Ok(d)
}

/// Parse a duration that is compared against wall-clock timestamps.
///
/// Rejects spans a `chrono::Duration` cannot hold.
pub fn parse_time_span(input: &str) -> Result<ChronoDuration, InvalidDuration> {
    let d = parse_duration(input)?;
    ChronoDuration::from_std(d).map_err(|_| InvalidDuration(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("15d").unwrap(), Duration::from_secs(15 * 86400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s500ms").unwrap(), Duration::from_millis(90_500));
    }

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "invalid", "5x", "m5", "30m1h", "-5s", "-1", "1.5m", "NaN", "inf"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_out_of_range_is_error() {
        assert!(parse_duration("1e30").is_err());
        assert!(parse_duration("1e400").is_err());
        assert!(parse_duration("99999999999999999999y").is_err());
        // Fits a std Duration but not a timestamp offset.
        assert!(parse_duration("1e18").is_ok());
        assert!(parse_time_span("1e18").is_err());
        assert!(parse_time_span("300000000y").is_err());
        assert_eq!(parse_time_span("5m").unwrap(), ChronoDuration::minutes(5));
    }

    #[test]
    fn test_positive_duration() {
        assert!(parse_positive_duration("0s").is_err());
        assert!(parse_positive_duration("0").is_err());
        assert_eq!(parse_positive_duration("60s").unwrap(), Duration::from_secs(60));
    }
}
