use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{ExporterError, Result};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn format_amz_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn format_amz_short_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%d").to_string()
}

pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Accepts RFC 3339 as well as the offset-less form CloudWatch sometimes returns.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| ExporterError::Decode(format!("invalid timestamp {value:?}: {err}")))
}

/// Parses human durations such as `5m`, `90s` or `1h 30m`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ExporterError::InvalidDuration {
            value: value.to_string(),
            reason: "duration must not be empty".to_string(),
        });
    }

    humantime::parse_duration(trimmed).map_err(|err| ExporterError::InvalidDuration {
        value: value.to_string(),
        reason: err.to_string(),
    })
}
