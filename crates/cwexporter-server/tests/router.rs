use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::TimeDelta;
use cwexporter_cloudwatch::{
    Dimension, GetMetricDataInput, GetMetricDataOutput, MetricDataApi, MetricDataResult,
    StatusCode as ResultStatus,
};
use cwexporter_collector::{
    BuildInfo, Collector, MetricQuerySpec, OwnHealthMetrics, Statistic, WindowConfig,
};
use cwexporter_common::{ExporterError, Result};
use cwexporter_server::{AppState, exporter_router};
use tower::ServiceExt;

/// Fails the first `failures` calls, then returns one datapoint per query.
struct FlakyApi {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl MetricDataApi for FlakyApi {
    async fn get_metric_data(&self, input: &GetMetricDataInput) -> Result<GetMetricDataOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ExporterError::Transport("connection reset".to_string()));
        }
        Ok(GetMetricDataOutput {
            messages: Vec::new(),
            metric_data_results: input
                .metric_data_queries
                .iter()
                .map(|query| MetricDataResult {
                    id: query.id.clone(),
                    label: Some(query.label.clone()),
                    status_code: ResultStatus::Complete,
                    messages: Vec::new(),
                    timestamps: vec![input.end_time - TimeDelta::minutes(10)],
                    values: vec![37.5],
                })
                .collect(),
            next_token: None,
        })
    }
}

fn state(failures: usize) -> Arc<AppState> {
    let build = BuildInfo::new("0.1.0", "abc123", "main");
    let spec = MetricQuerySpec {
        id: "m1".to_string(),
        namespace: "AWS/EC2".to_string(),
        metric_name: "CPUUtilization".to_string(),
        dimensions: vec![Dimension {
            name: "AutoScalingGroupName".to_string(),
            value: "my-asg".to_string(),
        }],
        statistic: Statistic::Average,
        period_override: None,
        unit_override: None,
    };
    let collector = Collector::new(
        Arc::new(FlakyApi {
            failures,
            calls: AtomicUsize::new(0),
        }),
        vec![spec],
        WindowConfig::parse("5m", "10m").unwrap(),
        OwnHealthMetrics::new(&build),
    )
    .unwrap();

    Arc::new(AppState {
        collector: Arc::new(collector),
        build,
        metrics_path: "/metrics".to_string(),
        health_path: "/health".to_string(),
    })
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint_serves_exposition_document() {
    let router = exporter_router(state(0));
    let (status, content_type, body) = get(router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        content_type.as_deref(),
        Some("text/plain; version=0.0.4; charset=utf-8")
    );
    assert!(body.contains("# TYPE aws_ec2_cpu_utilization_average gauge\n"));
    assert!(body.contains("aws_ec2_cpu_utilization_average{AutoScalingGroupName=\"my-asg\"} 37.5 "));
    assert!(body.contains("aws_cloudwatch_exporter_up 1\n"));
    assert!(body.contains(
        "aws_cloudwatch_exporter_build_info{version=\"0.1.0\",revision=\"abc123\",branch=\"main\"} 1\n"
    ));
}

#[tokio::test]
async fn failed_scrape_still_answers_with_health_metrics() {
    let state = state(1);
    let router = exporter_router(Arc::clone(&state));

    let (status, _, body) = get(router.clone(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("aws_ec2_cpu_utilization_average{"));
    assert!(body.contains("aws_cloudwatch_exporter_up 0\n"));
    assert!(body.contains("aws_cloudwatch_exporter_collector_scrapes_errors_total 1\n"));

    let (_, _, body) = get(router, "/metrics").await;
    assert!(body.contains("aws_cloudwatch_exporter_up 1\n"));
    assert!(body.contains("aws_cloudwatch_exporter_scrapes_success_total 1\n"));

    let health = state.collector.health_snapshot().await;
    assert_eq!(health.scrapes_errors, 1);
    assert_eq!(health.scrapes_success, 1);
}

#[tokio::test]
async fn health_and_home_pages() {
    let router = exporter_router(state(0));

    let (status, _, body) = get(router.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let (status, content_type, body) = get(router.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/html"));
    assert!(body.contains("<a href=\"/metrics\">Metrics</a>"));
    assert!(body.contains("Version 0.1.0"));

    let (status, _, _) = get(router, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
