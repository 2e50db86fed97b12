use std::{collections::HashMap, sync::Arc};

use cwexporter_common::error::{ExporterError, Result};
use tracing::warn;

use crate::{
    config::MetricQuerySpec,
    metrics::{MetricDescriptor, MetricType},
    naming::metric_name,
};

/// Output descriptors keyed by query id, built once from the configured specs.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, Arc<MetricDescriptor>>,
}

impl DescriptorRegistry {
    /// Specs whose name normalizes to nothing are logged and left out. Two
    /// specs that would export the same name and label set are rejected,
    /// whatever their ids or periods.
    pub fn build(specs: &[MetricQuerySpec]) -> Result<Self> {
        let mut descriptors = HashMap::with_capacity(specs.len());
        let mut series_owner: HashMap<String, &str> = HashMap::with_capacity(specs.len());
        for spec in specs {
            match describe(spec) {
                Some(descriptor) => {
                    let series = series_key(&descriptor);
                    if let Some(first) = series_owner.get(series.as_str()) {
                        return Err(ExporterError::DuplicateMetricSeries {
                            series,
                            first: first.to_string(),
                            second: spec.id.clone(),
                        });
                    }
                    series_owner.insert(series, &spec.id);
                    descriptors.insert(spec.id.clone(), Arc::new(descriptor));
                }
                None => warn!(
                    id = %spec.id,
                    namespace = %spec.namespace,
                    metric = %spec.metric_name,
                    "metric name normalizes to an empty string, query skipped"
                ),
            }
        }
        Ok(Self { descriptors })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<MetricDescriptor>> {
        self.descriptors.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn describe(spec: &MetricQuerySpec) -> Option<MetricDescriptor> {
    let name = metric_name(&spec.namespace, &spec.metric_name, spec.statistic.as_str());
    if name.is_empty() {
        return None;
    }

    let mut const_labels: Vec<(String, String)> = Vec::with_capacity(spec.dimensions.len());
    let mut dimension_keys: Vec<&str> = Vec::with_capacity(spec.dimensions.len());
    for dimension in &spec.dimensions {
        let label = sanitize_label_name(&dimension.name);
        match const_labels.iter_mut().find(|(key, _)| *key == label) {
            Some((_, value)) => *value = dimension.value.clone(),
            None => const_labels.push((label, dimension.value.clone())),
        }
        if !dimension_keys.contains(&dimension.name.as_str()) {
            dimension_keys.push(&dimension.name);
        }
    }

    let unit = spec
        .unit_override
        .as_deref()
        .map(|unit| format!(", Unit: {unit}"))
        .unwrap_or_default();
    let period = spec
        .period_override
        .map(|period| format!(", Period: {period}s"))
        .unwrap_or_default();
    let help = format!(
        "{name} represent the AWS CloudWatch Metric: {} --> {}, Dimensions: [{}], Statistic: {}{unit}{period}",
        spec.namespace,
        spec.metric_name,
        dimension_keys.join(","),
        spec.statistic,
    );

    Some(MetricDescriptor {
        name,
        help,
        metric_type: MetricType::Gauge,
        const_labels,
    })
}

/// Name plus label pairs in label-name order, as Prometheus identifies a series.
fn series_key(descriptor: &MetricDescriptor) -> String {
    let mut labels = descriptor
        .const_labels
        .iter()
        .map(|(name, value)| format!("{name}={value:?}"))
        .collect::<Vec<_>>();
    labels.sort();
    format!("{}{{{}}}", descriptor.name, labels.join(","))
}

/// Label names are limited to `[a-zA-Z_][a-zA-Z0-9_]*`.
fn sanitize_label_name(name: &str) -> String {
    let mut sanitized = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect::<String>();
    if sanitized.is_empty() || sanitized.starts_with(|ch: char| ch.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}
