use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricStat {
    pub metric: Metric,
    /// Granularity in seconds.
    pub period: u32,
    pub stat: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataQuery {
    pub id: String,
    pub label: String,
    pub metric_stat: MetricStat,
    pub return_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanBy {
    TimestampDescending,
    TimestampAscending,
}

impl ScanBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimestampDescending => "TimestampDescending",
            Self::TimestampAscending => "TimestampAscending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetMetricDataInput {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metric_data_queries: Vec<MetricDataQuery>,
    pub scan_by: ScanBy,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageData {
    pub code: Option<String>,
    pub value: String,
}

impl fmt::Display for MessageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.value),
            None => f.write_str(&self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    Complete,
    InternalError,
    PartialData,
    Forbidden,
    Other(String),
}

impl StatusCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Complete => "Complete",
            Self::InternalError => "InternalError",
            Self::PartialData => "PartialData",
            Self::Forbidden => "Forbidden",
            Self::Other(value) => value,
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<&str> for StatusCode {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Complete" => Self::Complete,
            "InternalError" => Self::InternalError,
            "PartialData" => Self::PartialData,
            "Forbidden" => Self::Forbidden,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One series per query id; `timestamps[i]` pairs with `values[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataResult {
    pub id: String,
    pub label: Option<String>,
    pub status_code: StatusCode,
    pub messages: Vec<MessageData>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetMetricDataOutput {
    pub messages: Vec<MessageData>,
    pub metric_data_results: Vec<MetricDataResult>,
    pub next_token: Option<String>,
}
