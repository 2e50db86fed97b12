//! Query compiler and scrape engine for the CloudWatch exporter.
//!
//! Every `/metrics` request runs one [`Collector`] cycle: compute the aligned
//! [`ScrapeWindow`], compile the configured [`MetricQuerySpec`]s into a single
//! `GetMetricData` request, call CloudWatch and turn the newest datapoint of
//! each series into a gauge sample named by the [`DescriptorRegistry`].

pub mod collector;
pub mod compiler;
pub mod config;
pub mod descriptors;
pub mod health;
pub mod metrics;
pub mod naming;
pub mod window;

pub use collector::Collector;
pub use compiler::compile;
pub use config::{MetricQuerySpec, QueryFileFormat, Statistic, load_metric_files};
pub use descriptors::DescriptorRegistry;
pub use health::{BuildInfo, HealthSnapshot, OwnHealthMetrics};
pub use metrics::{
    MetricDescriptor, MetricSample, MetricType, MetricValue, render_descriptor, render_exposition,
};
pub use naming::{metric_name, normalize};
pub use window::{ScrapeWindow, WindowConfig};
