use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use cwexporter_auth::{CredentialProvider, resolve_endpoint, signed_form_headers};
use cwexporter_common::error::{ExporterError, Result};
use http::HeaderMap;
use tracing::debug;
use url::Url;

use crate::{
    types::{GetMetricDataInput, GetMetricDataOutput},
    wire::{decode_error, decode_get_metric_data, encode_get_metric_data},
};

const SERVICE: &str = "monitoring";

#[async_trait]
pub trait MetricDataApi: Send + Sync {
    async fn get_metric_data(&self, input: &GetMetricDataInput) -> Result<GetMetricDataOutput>;
}

#[derive(Debug, Clone)]
pub struct CloudWatchConfig {
    pub region: String,
    /// Overrides `https://monitoring.{region}.amazonaws.com/`.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl CloudWatchConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct CloudWatchClient {
    endpoint: Url,
    region: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl CloudWatchClient {
    pub fn new(config: CloudWatchConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let region = config.region.trim().to_string();
        if region.is_empty() {
            return Err(ExporterError::InvalidConfig("aws region must not be empty".to_string()));
        }

        let endpoint = resolve_endpoint(SERVICE, &region, config.endpoint.as_deref())?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ExporterError::InternalError(format!("failed to build http client: {err}")))?;

        Ok(Self {
            endpoint,
            region,
            client,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn signed_headers(&self, body: &str) -> Result<HeaderMap> {
        let credentials = self.credentials.credentials().await?;
        signed_form_headers(&self.endpoint, &self.region, SERVICE, &credentials, body)
    }
}

#[async_trait]
impl MetricDataApi for CloudWatchClient {
    async fn get_metric_data(&self, input: &GetMetricDataInput) -> Result<GetMetricDataOutput> {
        let body = encode_get_metric_data(input);
        let headers = self.signed_headers(&body).await?;

        debug!(
            endpoint = %self.endpoint,
            queries = input.metric_data_queries.len(),
            paginated = input.next_token.is_some(),
            "sending GetMetricData request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                ExporterError::Transport(format!(
                    "failed to send GetMetricData request to {}: {err}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            ExporterError::Transport(format!("failed to read GetMetricData response: {err}"))
        })?;

        if !status.is_success() {
            let (code, message) = decode_error(&text)
                .unwrap_or_else(|| ("Unknown".to_string(), text.chars().take(256).collect()));
            return Err(ExporterError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        decode_get_metric_data(&text)
    }
}
