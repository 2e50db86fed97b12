use cwexporter_cloudwatch::{GetMetricDataInput, Metric, MetricDataQuery, MetricStat, ScanBy};

use crate::{config::MetricQuerySpec, naming::metric_name, window::ScrapeWindow};

/// Builds one batched `GetMetricData` request for the window.
///
/// Pure: equal inputs always produce an equal request. Specs without a period
/// override use the window period; results come back newest first.
pub fn compile(
    specs: &[MetricQuerySpec],
    window: &ScrapeWindow,
    next_token: Option<&str>,
) -> GetMetricDataInput {
    let global_period = window.period_seconds();

    GetMetricDataInput {
        start_time: window.start_time,
        end_time: window.end_time,
        metric_data_queries: specs
            .iter()
            .map(|spec| MetricDataQuery {
                id: spec.id.clone(),
                label: metric_name(&spec.namespace, &spec.metric_name, spec.statistic.as_str()),
                metric_stat: MetricStat {
                    metric: Metric {
                        namespace: spec.namespace.clone(),
                        metric_name: spec.metric_name.clone(),
                        dimensions: spec.dimensions.clone(),
                    },
                    period: spec.period_override.unwrap_or(global_period),
                    stat: spec.statistic.as_str().to_string(),
                    unit: spec.unit_override.clone(),
                },
                return_data: true,
            })
            .collect(),
        scan_by: ScanBy::TimestampDescending,
        next_token: next_token
            .filter(|token| !token.is_empty())
            .map(str::to_string),
    }
}
