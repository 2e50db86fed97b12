use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cwexporter_common::{
    error::{ExporterError, Result},
    time::parse_duration,
};

/// Sampling period and lookback, validated once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    period: Duration,
    lookback: Duration,
}

/// Aligned query bounds for one scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub period: Duration,
}

impl ScrapeWindow {
    pub fn period_seconds(&self) -> u32 {
        u32::try_from(self.period.as_secs()).unwrap_or(u32::MAX)
    }
}

impl WindowConfig {
    /// Parses human durations such as `5m` or `1h 30m`.
    pub fn parse(stat_period: &str, lookback: &str) -> Result<Self> {
        Self::new(parse_duration(stat_period)?, parse_duration(lookback)?)
    }

    pub fn new(period: Duration, lookback: Duration) -> Result<Self> {
        validate_whole_seconds("period", period)?;
        validate_whole_seconds("lookback", lookback)?;
        if period.as_secs() > u64::from(u32::MAX) {
            return Err(ExporterError::InvalidDuration {
                value: format!("{}s", period.as_secs()),
                reason: "period is too large".to_string(),
            });
        }
        // Keeps every later DateTime arithmetic in range.
        let span = period * 2 + lookback;
        TimeDelta::from_std(span).map_err(|err| ExporterError::InvalidDuration {
            value: format!("{}s", span.as_secs()),
            reason: err.to_string(),
        })?;

        Ok(Self { period, lookback })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// `now` floored to a multiple of the period, extended two periods forward
    /// and `lookback` backward. The extra period keeps the newest bucket
    /// inside the window while CloudWatch is still publishing it.
    pub fn compute(&self, now: DateTime<Utc>) -> ScrapeWindow {
        let period_secs = self.period.as_secs() as i64;
        let remainder = TimeDelta::seconds(now.timestamp().rem_euclid(period_secs))
            + TimeDelta::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
        let truncated = now - remainder;

        ScrapeWindow {
            start_time: truncated - TimeDelta::seconds(self.lookback.as_secs() as i64),
            end_time: truncated + TimeDelta::seconds(period_secs * 2),
            period: self.period,
        }
    }
}

fn validate_whole_seconds(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() || value.subsec_nanos() != 0 {
        return Err(ExporterError::InvalidDuration {
            value: format!("{value:?}"),
            reason: format!("{name} must be a positive whole number of seconds"),
        });
    }
    Ok(())
}
