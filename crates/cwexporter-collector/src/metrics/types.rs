use std::sync::Arc;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// Identity of an exposed series: family name, help text and the labels
/// fixed when the descriptor was built.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub const_labels: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Gauge {
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    },
    Counter(f64),
}

impl MetricValue {
    pub fn value(&self) -> f64 {
        match self {
            Self::Gauge { value, .. } | Self::Counter(value) => *value,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Gauge { timestamp, .. } => *timestamp,
            Self::Counter(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub descriptor: Arc<MetricDescriptor>,
    pub value: MetricValue,
}

impl MetricSample {
    pub fn gauge(
        descriptor: Arc<MetricDescriptor>,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            descriptor,
            value: MetricValue::Gauge { value, timestamp },
        }
    }

    pub fn counter(descriptor: Arc<MetricDescriptor>, value: f64) -> Self {
        Self {
            descriptor,
            value: MetricValue::Counter(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}
