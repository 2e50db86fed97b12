use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use cwexporter_common::error::{ExporterError, Result};
use tracing::debug;

const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";
const SHARED_CREDENTIALS_FILE_ENV: &str = "AWS_SHARED_CREDENTIALS_FILE";
const PROFILE_ENV: &str = "AWS_PROFILE";
const DEFAULT_PROFILE: &str = "default";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.session_token = if token.is_empty() { None } else { Some(token) };
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolved on every signed request; implementations cache when the lookup is costly.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;
}

#[async_trait]
impl CredentialProvider for Arc<dyn CredentialProvider> {
    async fn credentials(&self) -> Result<Credentials> {
        self.as_ref().credentials().await
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticCredentialProvider {
    root: Option<Credentials>,
}

impl StaticCredentialProvider {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        let root = if access_key.is_empty() || secret_key.is_empty() {
            None
        } else {
            Some(Credentials::new(access_key, secret_key))
        };
        Self { root }
    }

    pub fn from_credentials(credentials: Credentials) -> Self {
        Self {
            root: Some(credentials),
        }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self) -> Result<Credentials> {
        self.root
            .clone()
            .ok_or_else(|| ExporterError::Credentials("no static credentials configured".to_string()))
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
/// on every call so rotated keys are picked up.
#[derive(Clone)]
pub struct EnvCredentialProvider {
    lookup: EnvLookup,
}

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credentials(&self) -> Result<Credentials> {
        let (Some(access_key), Some(secret_key)) = (self.var(ACCESS_KEY_ENV), self.var(SECRET_KEY_ENV))
        else {
            return Err(ExporterError::Credentials(format!(
                "{ACCESS_KEY_ENV} and {SECRET_KEY_ENV} are not both set"
            )));
        };

        let credentials = Credentials::new(access_key, secret_key);
        Ok(match self.var(SESSION_TOKEN_ENV) {
            Some(token) => credentials.with_session_token(token),
            None => credentials,
        })
    }
}

/// Shared credentials file (`~/.aws/credentials` style INI) for one profile.
#[derive(Clone, Debug)]
pub struct ProfileCredentialProvider {
    path: PathBuf,
    profile: String,
}

impl ProfileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            profile: profile.into(),
        }
    }

    /// Resolves the file from `AWS_SHARED_CREDENTIALS_FILE` or `$HOME/.aws/credentials`
    /// and the profile from the argument, `AWS_PROFILE`, or `default`.
    pub fn from_env(profile: Option<String>) -> Option<Self> {
        let path = std::env::var(SHARED_CREDENTIALS_FILE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .or_else(|_| std::env::var("USERPROFILE"))
                    .ok()
                    .map(|home| Path::new(&home).join(".aws").join("credentials"))
            })?;

        let profile = profile
            .or_else(|| std::env::var(PROFILE_ENV).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        Some(Self::new(path, profile))
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

#[async_trait]
impl CredentialProvider for ProfileCredentialProvider {
    async fn credentials(&self) -> Result<Credentials> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            ExporterError::Credentials(format!(
                "failed to read shared credentials file {}: {err}",
                self.path.display()
            ))
        })?;

        parse_profile(&contents, &self.profile).ok_or_else(|| {
            ExporterError::Credentials(format!(
                "profile {} not found or incomplete in {}",
                self.profile,
                self.path.display()
            ))
        })
    }
}

fn parse_profile(contents: &str, profile: &str) -> Option<Credentials> {
    let mut in_profile = false;
    let mut access_key = None;
    let mut secret_key = None;
    let mut session_token = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let section = section.trim();
            let section = section.strip_prefix("profile ").unwrap_or(section).trim();
            in_profile = section == profile;
            continue;
        }

        if !in_profile {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "aws_access_key_id" => access_key = Some(value),
            "aws_secret_access_key" => secret_key = Some(value),
            "aws_session_token" => session_token = Some(value),
            _ => {}
        }
    }

    let credentials = Credentials::new(access_key?, secret_key?);
    Some(match session_token {
        Some(token) => credentials.with_session_token(token),
        None => credentials,
    })
}

/// Tries each provider in order and returns the first credentials found.
#[derive(Clone, Default)]
pub struct ChainCredentialProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainCredentialProvider {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Static keys (when given), then the environment, then the shared credentials file.
    pub fn default_chain(static_keys: Option<Credentials>, profile: Option<String>) -> Self {
        let mut providers: Vec<Arc<dyn CredentialProvider>> = Vec::new();
        if let Some(credentials) = static_keys {
            providers.push(Arc::new(StaticCredentialProvider::from_credentials(credentials)));
        }
        providers.push(Arc::new(EnvCredentialProvider::new()));
        if let Some(profile_provider) = ProfileCredentialProvider::from_env(profile) {
            providers.push(Arc::new(profile_provider));
        }
        Self { providers }
    }
}

#[async_trait]
impl CredentialProvider for ChainCredentialProvider {
    async fn credentials(&self) -> Result<Credentials> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.credentials().await {
                Ok(credentials) => return Ok(credentials),
                Err(err) => {
                    debug!(error = %err, "credential provider yielded nothing");
                    failures.push(err.to_string());
                }
            }
        }

        Err(ExporterError::Credentials(if failures.is_empty() {
            "no credential providers configured".to_string()
        } else {
            failures.join("; ")
        }))
    }
}
