use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use cwexporter_cloudwatch::{
    GetMetricDataOutput, MessageData, MetricDataApi, MetricDataResult, StatusCode,
};
use cwexporter_common::{
    error::{ExporterError, Result},
    time,
};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{
    compiler::compile,
    config::MetricQuerySpec,
    descriptors::DescriptorRegistry,
    health::{HealthSnapshot, OwnHealthMetrics},
    metrics::MetricSample,
    window::{ScrapeWindow, WindowConfig},
};

/// Scrape engine: one `GetMetricData` round per [`Collector::collect`] call.
pub struct Collector {
    api: Arc<dyn MetricDataApi>,
    specs: Vec<MetricQuerySpec>,
    registry: DescriptorRegistry,
    window: WindowConfig,
    max_pages: usize,
    health: Mutex<OwnHealthMetrics>,
}

impl Collector {
    /// Specs without a descriptor are dropped here so the compiled queries
    /// and the registry always cover the same ids. Specs that collide on an
    /// exported series are rejected.
    pub fn new(
        api: Arc<dyn MetricDataApi>,
        specs: Vec<MetricQuerySpec>,
        window: WindowConfig,
        health: OwnHealthMetrics,
    ) -> Result<Self> {
        let registry = DescriptorRegistry::build(&specs)?;
        let specs = specs
            .into_iter()
            .filter(|spec| registry.contains(&spec.id))
            .collect::<Vec<_>>();
        if specs.is_empty() {
            return Err(ExporterError::EmptyMetricQueries);
        }

        Ok(Self {
            api,
            specs,
            registry,
            window,
            max_pages: 1,
            health: Mutex::new(health),
        })
    }

    /// Upper bound on `GetMetricData` calls per cycle when CloudWatch keeps
    /// returning a `NextToken`. Values below one are treated as one.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn specs(&self) -> &[MetricQuerySpec] {
        &self.specs
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        self.health.lock().await.snapshot()
    }

    pub async fn collect(&self) -> Vec<MetricSample> {
        self.collect_at(time::now()).await
    }

    /// Runs the cycle on its own task so it completes even if the caller's
    /// future is dropped.
    pub async fn collect_detached(self: Arc<Self>) -> Result<Vec<MetricSample>> {
        tokio::spawn(async move { self.collect().await })
            .await
            .map_err(|err| ExporterError::InternalError(format!("scrape task failed: {err}")))
    }

    /// One full cycle for the instant `now`. Failures are absorbed into the
    /// health metrics; the returned samples always end with them.
    pub async fn collect_at(&self, now: DateTime<Utc>) -> Vec<MetricSample> {
        let mut health = self.health.lock().await;
        health.set_up(true);

        let window = self.window.compute(now);
        let mut samples = Vec::new();

        match self.fetch(&window, &mut health).await {
            Ok(outputs) => {
                health.inc_scrapes_success();
                self.interpret(outputs, &mut health, &mut samples);
            }
            Err(err) => {
                health.set_up(false);
                health.inc_scrapes_errors();
                error!(
                    code = err.code(),
                    error = %err,
                    "failed to get AWS CloudWatch metric data"
                );
            }
        }

        debug!(
            start = %window.start_time,
            end = %window.end_time,
            period_secs = window.period_seconds(),
            samples = samples.len(),
            "scrape cycle finished"
        );

        samples.extend(health.samples());
        samples
    }

    async fn fetch(
        &self,
        window: &ScrapeWindow,
        health: &mut OwnHealthMetrics,
    ) -> Result<Vec<GetMetricDataOutput>> {
        let mut outputs = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 1..=self.max_pages {
            let input = compile(&self.specs, window, next_token.as_deref());
            if page == 1 {
                health.set_metrics_total(input.metric_data_queries.len());
            }

            let output = self.api.get_metric_data(&input).await?;
            next_token = output.next_token.clone();
            outputs.push(output);

            if next_token.is_none() {
                return Ok(outputs);
            }
        }

        warn!(
            max_pages = self.max_pages,
            "GetMetricData returned more pages than allowed per scrape, remaining pages skipped"
        );
        Ok(outputs)
    }

    fn interpret(
        &self,
        outputs: Vec<GetMetricDataOutput>,
        health: &mut OwnHealthMetrics,
        samples: &mut Vec<MetricSample>,
    ) {
        let mut results: Vec<MetricDataResult> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();

        for output in outputs {
            if !output.messages.is_empty() {
                health.inc_scrapes_messages();
                warn!(
                    messages = %join_messages(&output.messages),
                    "GetMetricData response carries messages"
                );
            }

            for result in output.metric_data_results {
                match position.get(&result.id) {
                    Some(&index) => merge_page(&mut results[index], result),
                    None => {
                        position.insert(result.id.clone(), results.len());
                        results.push(result);
                    }
                }
            }
        }

        for result in results {
            self.interpret_result(result, health, samples);
        }
    }

    fn interpret_result(
        &self,
        result: MetricDataResult,
        health: &mut OwnHealthMetrics,
        samples: &mut Vec<MetricSample>,
    ) {
        let label = result.label.as_deref().unwrap_or_default();

        if result.status_code == StatusCode::InternalError {
            health.inc_metric_scrapes_errors();
            error!(
                id = %result.id,
                label = %label,
                messages = %join_messages(&result.messages),
                "CloudWatch returned InternalError for metric, check the metric queries files"
            );
            return;
        }

        if !result.messages.is_empty() {
            health.inc_metric_scrapes_messages();
            warn!(
                id = %result.id,
                messages = %join_messages(&result.messages),
                "CloudWatch returned messages for metric, check the metric queries files"
            );
        }

        // Newest datapoint first, ScanBy is TimestampDescending.
        let (Some(&value), Some(&timestamp)) = (result.values.first(), result.timestamps.first())
        else {
            health.inc_metric_scrapes_empty();
            warn!(
                id = %result.id,
                "no values returned for metric, check the metric queries files"
            );
            return;
        };

        let Some(descriptor) = self.registry.get(&result.id) else {
            error!(
                id = %result.id,
                label = %label,
                "no descriptor registered for returned metric id"
            );
            return;
        };

        samples.push(MetricSample::gauge(descriptor.clone(), value, Some(timestamp)));
        health.inc_metric_scrapes_success();
    }
}

/// Later pages hold older datapoints of the same series.
fn merge_page(merged: &mut MetricDataResult, page: MetricDataResult) {
    if page.status_code == StatusCode::InternalError {
        merged.status_code = StatusCode::InternalError;
    }
    if merged.label.is_none() {
        merged.label = page.label;
    }
    merged.messages.extend(page.messages);
    merged.timestamps.extend(page.timestamps);
    merged.values.extend(page.values);
}

fn join_messages(messages: &[MessageData]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use cwexporter_cloudwatch::{Dimension, GetMetricDataInput};

    use super::*;
    use crate::{config::Statistic, health::BuildInfo, metrics::MetricValue};

    /// Replays canned responses in order and records every request.
    struct ScriptedApi {
        responses: StdMutex<Vec<Result<GetMetricDataOutput>>>,
        requests: StdMutex<Vec<GetMetricDataInput>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<GetMetricDataOutput>>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses.into_iter().rev().collect()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<GetMetricDataInput> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricDataApi for ScriptedApi {
        async fn get_metric_data(&self, input: &GetMetricDataInput) -> Result<GetMetricDataOutput> {
            self.requests.lock().unwrap().push(input.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(GetMetricDataOutput::default()))
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 5, 10, h, m, s).unwrap()
    }

    fn spec(id: &str, metric: &str) -> MetricQuerySpec {
        MetricQuerySpec {
            id: id.to_string(),
            namespace: "AWS/EC2".to_string(),
            metric_name: metric.to_string(),
            dimensions: vec![Dimension {
                name: "AutoScalingGroupName".to_string(),
                value: "my-asg".to_string(),
            }],
            statistic: Statistic::Average,
            period_override: None,
            unit_override: None,
        }
    }

    fn result(id: &str, points: &[(DateTime<Utc>, f64)]) -> MetricDataResult {
        MetricDataResult {
            id: id.to_string(),
            label: Some(format!("label_{id}")),
            status_code: StatusCode::Complete,
            messages: Vec::new(),
            timestamps: points.iter().map(|(ts, _)| *ts).collect(),
            values: points.iter().map(|(_, value)| *value).collect(),
        }
    }

    fn output(results: Vec<MetricDataResult>) -> GetMetricDataOutput {
        GetMetricDataOutput {
            messages: Vec::new(),
            metric_data_results: results,
            next_token: None,
        }
    }

    fn collector(api: Arc<ScriptedApi>, specs: Vec<MetricQuerySpec>) -> Collector {
        Collector::new(
            api,
            specs,
            WindowConfig::parse("5m", "10m").unwrap(),
            OwnHealthMetrics::new(&BuildInfo::default()),
        )
        .unwrap()
    }

    fn cloudwatch_samples(samples: &[MetricSample]) -> Vec<&MetricSample> {
        samples
            .iter()
            .filter(|sample| !sample.name().starts_with("aws_cloudwatch_exporter_"))
            .collect()
    }

    #[tokio::test]
    async fn emits_newest_datapoint_with_its_timestamp() {
        let api = ScriptedApi::new(vec![Ok(output(vec![result(
            "m1",
            &[(at(11, 5, 0), 42.0), (at(11, 0, 0), 7.0)],
        )]))]);
        let collector = collector(api.clone(), vec![spec("m1", "CPUUtilization")]);

        let samples = collector.collect_at(at(11, 6, 25)).await;
        let emitted = cloudwatch_samples(&samples);

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].name(), "aws_ec2_cpu_utilization_average");
        assert_eq!(
            emitted[0].descriptor.const_labels,
            vec![("AutoScalingGroupName".to_string(), "my-asg".to_string())]
        );
        assert_eq!(
            emitted[0].value,
            MetricValue::Gauge {
                value: 42.0,
                timestamp: Some(at(11, 5, 0)),
            }
        );

        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start_time, at(10, 55, 0));
        assert_eq!(requests[0].end_time, at(11, 15, 0));

        let health = collector.health_snapshot().await;
        assert!(health.up);
        assert_eq!(health.metrics_total, 1);
        assert_eq!(health.scrapes_success, 1);
        assert_eq!(health.metric_scrapes_success, 1);
    }

    #[tokio::test]
    async fn internal_error_skips_only_that_metric() {
        let mut failed = result("m2", &[(at(11, 5, 0), 1.0)]);
        failed.status_code = StatusCode::InternalError;
        let api = ScriptedApi::new(vec![Ok(output(vec![
            result("m1", &[(at(11, 5, 0), 10.0)]),
            failed,
            result("m3", &[(at(11, 5, 0), 30.0)]),
        ]))]);
        let collector = collector(
            api,
            vec![
                spec("m1", "CPUUtilization"),
                spec("m2", "NetworkIn"),
                spec("m3", "NetworkOut"),
            ],
        );

        let samples = collector.collect_at(at(11, 6, 25)).await;
        let names = cloudwatch_samples(&samples)
            .iter()
            .map(|sample| sample.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["aws_ec2_cpu_utilization_average", "aws_ec2_network_out_average"]
        );

        let health = collector.health_snapshot().await;
        assert_eq!(health.metric_scrapes_errors, 1);
        assert_eq!(health.metric_scrapes_success, 2);
        assert!(health.up);
    }

    #[tokio::test]
    async fn api_failure_emits_only_health_metrics() {
        let api = ScriptedApi::new(vec![
            Err(ExporterError::Transport("connection refused".to_string())),
            Ok(output(vec![result("m1", &[(at(11, 5, 0), 5.0)])])),
        ]);
        let collector = collector(api, vec![spec("m1", "CPUUtilization")]);

        let samples = collector.collect_at(at(11, 6, 25)).await;
        assert!(cloudwatch_samples(&samples).is_empty());
        let up = samples
            .iter()
            .find(|sample| sample.name() == "aws_cloudwatch_exporter_up")
            .unwrap();
        assert_eq!(up.value.value(), 0.0);

        let health = collector.health_snapshot().await;
        assert!(!health.up);
        assert_eq!(health.scrapes_errors, 1);
        assert_eq!(health.scrapes_success, 0);

        collector.collect_at(at(11, 11, 0)).await;
        let health = collector.health_snapshot().await;
        assert!(health.up);
        assert_eq!(health.scrapes_errors, 1);
        assert_eq!(health.scrapes_success, 1);
    }

    #[tokio::test]
    async fn empty_results_and_messages_are_counted() {
        let mut noisy = result("m2", &[(at(11, 5, 0), 2.0)]);
        noisy.messages.push(MessageData {
            code: Some("ArithmeticError".to_string()),
            value: "division by zero".to_string(),
        });
        let mut response = output(vec![result("m1", &[]), noisy]);
        response.messages.push(MessageData {
            code: None,
            value: "partial data".to_string(),
        });

        let api = ScriptedApi::new(vec![Ok(response)]);
        let collector = collector(
            api,
            vec![spec("m1", "CPUUtilization"), spec("m2", "NetworkIn")],
        );

        let samples = collector.collect_at(at(11, 6, 25)).await;
        assert_eq!(cloudwatch_samples(&samples).len(), 1);

        let health = collector.health_snapshot().await;
        assert_eq!(health.metric_scrapes_empty, 1);
        assert_eq!(health.metric_scrapes_messages, 1);
        assert_eq!(health.scrapes_messages, 1);
        assert_eq!(health.metric_scrapes_success, 1);
    }

    #[tokio::test]
    async fn unknown_result_ids_are_skipped() {
        let api = ScriptedApi::new(vec![Ok(output(vec![
            result("m1", &[(at(11, 5, 0), 1.0)]),
            result("ghost", &[(at(11, 5, 0), 9.0)]),
        ]))]);
        let collector = collector(api, vec![spec("m1", "CPUUtilization")]);

        let samples = collector.collect_at(at(11, 6, 25)).await;
        assert_eq!(cloudwatch_samples(&samples).len(), 1);
        assert_eq!(collector.health_snapshot().await.metric_scrapes_success, 1);
    }

    #[tokio::test]
    async fn follows_next_token_up_to_page_limit() {
        let mut first = output(vec![result("m1", &[(at(11, 5, 0), 3.0)])]);
        first.next_token = Some("page-2".to_string());
        let mut second = output(vec![
            result("m1", &[(at(11, 0, 0), 2.0)]),
            result("m2", &[(at(11, 5, 0), 8.0)]),
        ]);
        second.next_token = Some("page-3".to_string());

        let api = ScriptedApi::new(vec![Ok(first), Ok(second)]);
        let collector = collector(
            api.clone(),
            vec![spec("m1", "CPUUtilization"), spec("m2", "NetworkIn")],
        )
        .with_max_pages(2);

        let samples = collector.collect_at(at(11, 6, 25)).await;
        let emitted = cloudwatch_samples(&samples);
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].value.value(), 3.0);
        assert_eq!(emitted[1].value.value(), 8.0);

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].next_token, None);
        assert_eq!(requests[1].next_token.as_deref(), Some("page-2"));

        let health = collector.health_snapshot().await;
        assert_eq!(health.scrapes_success, 1);
        assert_eq!(health.metric_scrapes_success, 2);
    }

    #[tokio::test]
    async fn first_page_only_by_default() {
        let mut first = output(vec![result("m1", &[(at(11, 5, 0), 3.0)])]);
        first.next_token = Some("page-2".to_string());
        let api = ScriptedApi::new(vec![Ok(first)]);
        let collector = collector(api.clone(), vec![spec("m1", "CPUUtilization")]);

        collector.collect_at(at(11, 6, 25)).await;
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn failure_on_later_page_aborts_cycle() {
        let mut first = output(vec![result("m1", &[(at(11, 5, 0), 3.0)])]);
        first.next_token = Some("page-2".to_string());
        let api = ScriptedApi::new(vec![
            Ok(first),
            Err(ExporterError::Api {
                status: 400,
                code: "InvalidNextToken".to_string(),
                message: "expired".to_string(),
            }),
        ]);
        let collector =
            collector(api, vec![spec("m1", "CPUUtilization")]).with_max_pages(5);

        let samples = collector.collect_at(at(11, 6, 25)).await;
        assert!(cloudwatch_samples(&samples).is_empty());
        let health = collector.health_snapshot().await;
        assert!(!health.up);
        assert_eq!(health.scrapes_errors, 1);
    }

    #[tokio::test]
    async fn detached_cycle_runs_to_completion() {
        let api = ScriptedApi::new(vec![Ok(output(vec![result("m1", &[(at(11, 5, 0), 1.0)])]))]);
        let collector = Arc::new(collector(api, vec![spec("m1", "CPUUtilization")]));

        let samples = collector.clone().collect_detached().await.unwrap();
        assert_eq!(cloudwatch_samples(&samples).len(), 1);
        assert_eq!(collector.health_snapshot().await.scrapes_success, 1);
    }

    #[test]
    fn rejects_empty_spec_list() {
        let result = Collector::new(
            ScriptedApi::new(Vec::new()),
            Vec::new(),
            WindowConfig::parse("5m", "10m").unwrap(),
            OwnHealthMetrics::new(&BuildInfo::default()),
        );
        assert!(matches!(result, Err(ExporterError::EmptyMetricQueries)));
    }
}
