use std::sync::Arc;

use crate::metrics::{MetricDescriptor, MetricSample, MetricType};

pub const EXPORTER_NAMESPACE: &str = "aws_cloudwatch_exporter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub revision: String,
    pub branch: String,
}

impl BuildInfo {
    pub fn new(
        version: impl Into<String>,
        revision: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            revision: revision.into(),
            branch: branch.into(),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"), "unknown", "unknown")
    }
}

/// Point-in-time copy of the scrape health values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthSnapshot {
    pub up: bool,
    pub metrics_total: usize,
    pub scrapes_success: u64,
    pub scrapes_errors: u64,
    pub scrapes_messages: u64,
    pub metric_scrapes_success: u64,
    pub metric_scrapes_errors: u64,
    pub metric_scrapes_empty: u64,
    pub metric_scrapes_messages: u64,
}

struct HealthDescriptors {
    build_info: Arc<MetricDescriptor>,
    up: Arc<MetricDescriptor>,
    metrics_total: Arc<MetricDescriptor>,
    scrapes_success: Arc<MetricDescriptor>,
    scrapes_errors: Arc<MetricDescriptor>,
    scrapes_messages: Arc<MetricDescriptor>,
    metric_scrapes_success: Arc<MetricDescriptor>,
    metric_scrapes_errors: Arc<MetricDescriptor>,
    metric_scrapes_empty: Arc<MetricDescriptor>,
    metric_scrapes_messages: Arc<MetricDescriptor>,
}

/// The exporter's own scrape health. Owned by one collector and only
/// mutated while its cycle lock is held.
pub struct OwnHealthMetrics {
    descriptors: HealthDescriptors,
    state: HealthSnapshot,
}

impl OwnHealthMetrics {
    pub fn new(build: &BuildInfo) -> Self {
        let gauge = |name: &str, help: String| descriptor(name, help, MetricType::Gauge, Vec::new());
        let counter =
            |name: &str, help: String| descriptor(name, help, MetricType::Counter, Vec::new());

        Self {
            descriptors: HealthDescriptors {
                build_info: descriptor(
                    "build_info",
                    format!(
                        "A metric with a constant '1' value labeled by version, revision and branch from which {EXPORTER_NAMESPACE} was built."
                    ),
                    MetricType::Gauge,
                    vec![
                        ("version".to_string(), build.version.clone()),
                        ("revision".to_string(), build.revision.clone()),
                        ("branch".to_string(), build.branch.clone()),
                    ],
                ),
                up: gauge(
                    "up",
                    format!("Was the last scrape of {EXPORTER_NAMESPACE} successful."),
                ),
                metrics_total: gauge(
                    "metrics_total",
                    "The total number of metrics to be scraped and was defined as metrics queries files."
                        .to_string(),
                ),
                scrapes_success: counter(
                    "scrapes_success_total",
                    "The total number of times AWS CloudWatch API scraped for metrics with successful results."
                        .to_string(),
                ),
                scrapes_errors: counter(
                    "collector_scrapes_errors_total",
                    "The total number of times AWS CloudWatch API scraped for metrics with error results."
                        .to_string(),
                ),
                scrapes_messages: counter(
                    "collector_scrapes_messages_total",
                    "The total number of times AWS CloudWatch API scraped for metrics and we got some message results. (see exporter logs)"
                        .to_string(),
                ),
                metric_scrapes_success: counter(
                    "collector_metrics_scrapes_success_total",
                    "The total number of metrics AWS CloudWatch API scraped with successful results."
                        .to_string(),
                ),
                metric_scrapes_errors: counter(
                    "collector_metrics_scrapes_errors_total",
                    "The total number of metrics AWS CloudWatch API scraped with errors results."
                        .to_string(),
                ),
                metric_scrapes_empty: counter(
                    "collector_metrics_scrapes_empty_total",
                    "The total number of metrics AWS CloudWatch API scraped with empty results."
                        .to_string(),
                ),
                metric_scrapes_messages: counter(
                    "collector_metrics_scrapes_messages_total",
                    "The total number of metrics AWS CloudWatch API scraped and we got some messages results. (see exporter logs)"
                        .to_string(),
                ),
            },
            state: HealthSnapshot::default(),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.state
    }

    pub fn set_up(&mut self, up: bool) {
        self.state.up = up;
    }

    pub fn set_metrics_total(&mut self, total: usize) {
        self.state.metrics_total = total;
    }

    pub fn inc_scrapes_success(&mut self) {
        self.state.scrapes_success += 1;
    }

    pub fn inc_scrapes_errors(&mut self) {
        self.state.scrapes_errors += 1;
    }

    pub fn inc_scrapes_messages(&mut self) {
        self.state.scrapes_messages += 1;
    }

    pub fn inc_metric_scrapes_success(&mut self) {
        self.state.metric_scrapes_success += 1;
    }

    pub fn inc_metric_scrapes_errors(&mut self) {
        self.state.metric_scrapes_errors += 1;
    }

    pub fn inc_metric_scrapes_empty(&mut self) {
        self.state.metric_scrapes_empty += 1;
    }

    pub fn inc_metric_scrapes_messages(&mut self) {
        self.state.metric_scrapes_messages += 1;
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        let d = &self.descriptors;
        let s = &self.state;
        vec![
            MetricSample::gauge(d.build_info.clone(), 1.0, None),
            MetricSample::gauge(d.up.clone(), if s.up { 1.0 } else { 0.0 }, None),
            MetricSample::gauge(d.metrics_total.clone(), s.metrics_total as f64, None),
            MetricSample::counter(d.scrapes_success.clone(), s.scrapes_success as f64),
            MetricSample::counter(d.scrapes_errors.clone(), s.scrapes_errors as f64),
            MetricSample::counter(d.scrapes_messages.clone(), s.scrapes_messages as f64),
            MetricSample::counter(d.metric_scrapes_success.clone(), s.metric_scrapes_success as f64),
            MetricSample::counter(d.metric_scrapes_errors.clone(), s.metric_scrapes_errors as f64),
            MetricSample::counter(d.metric_scrapes_empty.clone(), s.metric_scrapes_empty as f64),
            MetricSample::counter(d.metric_scrapes_messages.clone(), s.metric_scrapes_messages as f64),
        ]
    }
}

fn descriptor(
    name: &str,
    help: String,
    metric_type: MetricType,
    const_labels: Vec<(String, String)>,
) -> Arc<MetricDescriptor> {
    Arc::new(MetricDescriptor {
        name: format!("{EXPORTER_NAMESPACE}_{name}"),
        help,
        metric_type,
        const_labels,
    })
}
