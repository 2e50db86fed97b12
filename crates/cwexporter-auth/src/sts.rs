//! Temporary credentials from STS `AssumeRole`.
//!
//! The source provider signs the `AssumeRole` call; the returned session
//! credentials are cached and reused until they come within
//! [`REFRESH_BEFORE_EXPIRY_SECS`] of their expiration.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use cwexporter_common::{
    error::{ExporterError, Result},
    time::{self, parse_iso8601},
};
use quick_xml::de::from_str as xml_from_str;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::{Url, form_urlencoded};

use crate::{
    credentials::{CredentialProvider, Credentials},
    request::{resolve_endpoint, signed_form_headers},
};

const SERVICE: &str = "sts";
const API_VERSION: &str = "2011-06-15";
pub const DEFAULT_SESSION_NAME: &str = "aws-cloudwatch-exporter";
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(3600);
pub const REFRESH_BEFORE_EXPIRY_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AssumeRoleConfig {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
    pub duration: Duration,
    pub region: String,
    /// Overrides `https://sts.{region}.amazonaws.com/`.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl AssumeRoleConfig {
    pub fn new(role_arn: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
            external_id: None,
            duration: DEFAULT_SESSION_DURATION,
            region: region.into(),
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
struct SessionCredentials {
    credentials: Credentials,
    expiration: DateTime<Utc>,
}

pub struct AssumeRoleProvider {
    config: AssumeRoleConfig,
    endpoint: Url,
    client: reqwest::Client,
    source: Arc<dyn CredentialProvider>,
    cached: Mutex<Option<SessionCredentials>>,
}

impl AssumeRoleProvider {
    pub fn new(config: AssumeRoleConfig, source: Arc<dyn CredentialProvider>) -> Result<Self> {
        if config.role_arn.trim().is_empty() {
            return Err(ExporterError::InvalidConfig("role arn must not be empty".to_string()));
        }
        if config.session_name.trim().is_empty() {
            return Err(ExporterError::InvalidConfig(
                "role session name must not be empty".to_string(),
            ));
        }
        if config.region.trim().is_empty() {
            return Err(ExporterError::InvalidConfig("aws region must not be empty".to_string()));
        }

        let endpoint = resolve_endpoint(SERVICE, config.region.trim(), config.endpoint.as_deref())?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ExporterError::InternalError(format!("failed to build http client: {err}")))?;

        Ok(Self {
            config,
            endpoint,
            client,
            source,
            cached: Mutex::new(None),
        })
    }

    pub fn role_arn(&self) -> &str {
        &self.config.role_arn
    }

    fn encode_request(&self) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("Action", "AssumeRole");
        form.append_pair("Version", API_VERSION);
        form.append_pair("RoleArn", self.config.role_arn.trim());
        form.append_pair("RoleSessionName", self.config.session_name.trim());
        form.append_pair("DurationSeconds", &self.config.duration.as_secs().to_string());
        if let Some(external_id) = self.config.external_id.as_deref().filter(|id| !id.is_empty()) {
            form.append_pair("ExternalId", external_id);
        }
        form.finish()
    }

    async fn assume_role(&self) -> Result<SessionCredentials> {
        let source = self.source.credentials().await?;
        let body = self.encode_request();
        let headers = signed_form_headers(
            &self.endpoint,
            self.config.region.trim(),
            SERVICE,
            &source,
            &body,
        )?;

        debug!(endpoint = %self.endpoint, role_arn = %self.config.role_arn, "sending AssumeRole request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                ExporterError::Credentials(format!(
                    "failed to send AssumeRole request to {}: {err}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            ExporterError::Credentials(format!("failed to read AssumeRole response: {err}"))
        })?;

        if !status.is_success() {
            let (code, message) = decode_sts_error(&text)
                .unwrap_or_else(|| ("Unknown".to_string(), text.chars().take(256).collect()));
            return Err(ExporterError::Credentials(format!(
                "AssumeRole {} failed (status {}) {code}: {message}",
                self.config.role_arn,
                status.as_u16()
            )));
        }

        decode_assume_role(&text)
    }
}

#[async_trait]
impl CredentialProvider for AssumeRoleProvider {
    async fn credentials(&self) -> Result<Credentials> {
        let mut cached = self.cached.lock().await;
        let refresh_window = TimeDelta::seconds(REFRESH_BEFORE_EXPIRY_SECS);
        if let Some(session) = cached
            .as_ref()
            .filter(|session| session.expiration - time::now() > refresh_window)
        {
            return Ok(session.credentials.clone());
        }

        let session = self.assume_role().await?;
        info!(
            role_arn = %self.config.role_arn,
            expiration = %session.expiration,
            "assumed role"
        );
        let credentials = session.credentials.clone();
        *cached = Some(session);
        Ok(credentials)
    }
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResponseXml {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResultXml,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResultXml {
    #[serde(rename = "Credentials")]
    credentials: CredentialsXml,
}

#[derive(Debug, Deserialize)]
struct CredentialsXml {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken", default)]
    session_token: Option<String>,
    #[serde(rename = "Expiration")]
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseXml {
    #[serde(rename = "Error")]
    error: ErrorXml,
}

#[derive(Debug, Deserialize)]
struct ErrorXml {
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

fn decode_assume_role(xml: &str) -> Result<SessionCredentials> {
    let response: AssumeRoleResponseXml = xml_from_str(xml).map_err(|err| {
        ExporterError::Credentials(format!("invalid AssumeRole response xml: {err}"))
    })?;
    let raw = response.result.credentials;
    let expiration = parse_iso8601(&raw.expiration)
        .map_err(|err| ExporterError::Credentials(format!("invalid AssumeRole expiration: {err}")))?;

    let credentials = Credentials::new(raw.access_key_id.trim(), raw.secret_access_key.trim());
    let credentials = match raw.session_token {
        Some(token) => credentials.with_session_token(token.trim()),
        None => credentials,
    };
    Ok(SessionCredentials {
        credentials,
        expiration,
    })
}

fn decode_sts_error(xml: &str) -> Option<(String, String)> {
    let response: ErrorResponseXml = xml_from_str(xml).ok()?;
    Some((
        response.error.code.unwrap_or_else(|| "Unknown".to_string()),
        response.error.message.unwrap_or_default(),
    ))
}
