//! Client for the CloudWatch `GetMetricData` operation.
//!
//! The request and response model lives in [`types`], the AWS Query protocol
//! encoding and XML decoding in [`wire`], and [`client::CloudWatchClient`] ties
//! them to a signed `reqwest` call behind the [`MetricDataApi`] trait.

pub mod client;
pub mod types;
pub mod wire;

pub use client::{CloudWatchClient, CloudWatchConfig, MetricDataApi};
pub use types::{
    Dimension, GetMetricDataInput, GetMetricDataOutput, MessageData, Metric, MetricDataQuery,
    MetricDataResult, MetricStat, ScanBy, StatusCode,
};
