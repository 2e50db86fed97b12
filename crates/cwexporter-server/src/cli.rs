use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use cwexporter_auth::{
    AssumeRoleConfig, AssumeRoleProvider, ChainCredentialProvider, CredentialProvider, Credentials,
};
use cwexporter_cloudwatch::CloudWatchConfig;
use cwexporter_collector::WindowConfig;
use cwexporter_common::{
    error::{ExporterError, Result},
    time::parse_duration,
};

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check the metric queries files without starting the server.
    #[command(subcommand)]
    Metrics(MetricsCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum MetricsCommand {
    /// Print the Prometheus descriptors built from the metric queries files.
    Display,
    /// Run one GetMetricData call for the metric queries files and print the response.
    Get(GetArgs),
}

#[derive(Debug, Clone, Args)]
pub struct GetArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub out_format: OutputFormat,

    /// Written instead of stdout when given.
    #[arg(long)]
    pub out_file: Option<PathBuf>,
}

/// Serves `/metrics` unless a subcommand is given.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "aws_cloudwatch_exporter",
    version,
    about = "Prometheus exporter for AWS CloudWatch metrics"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, env = "CWEXPORTER_ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    #[arg(long, env = "CWEXPORTER_PORT", default_value_t = 9690)]
    pub port: u16,

    #[arg(long, env = "CWEXPORTER_METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    #[arg(long, env = "CWEXPORTER_HEALTH_PATH", default_value = "/health")]
    pub health_path: String,

    /// YAML or JSON files with `MetricDataQueries`, merged in the order given.
    #[arg(
        long,
        global = true,
        env = "CWEXPORTER_METRICS_FILES",
        value_delimiter = ',',
        num_args = 1..,
        default_value = "metrics.yaml"
    )]
    pub metrics_files: Vec<PathBuf>,

    #[arg(long, global = true, env = "CWEXPORTER_STAT_PERIOD", default_value = "5m")]
    pub stat_period: String,

    #[arg(long, global = true, env = "CWEXPORTER_TIME_WINDOW", default_value = "10m")]
    pub time_window: String,

    /// Falls back to `AWS_REGION`, then `AWS_DEFAULT_REGION`, then us-east-1.
    #[arg(long, global = true, env = "CWEXPORTER_REGION")]
    pub region: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_PROFILE")]
    pub profile: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Role assumed through STS with the resolved credentials before calling CloudWatch.
    #[arg(long, global = true, env = "CWEXPORTER_ROLE_ARN")]
    pub role_arn: Option<String>,

    #[arg(
        long,
        global = true,
        env = "CWEXPORTER_ROLE_SESSION_NAME",
        default_value = cwexporter_auth::sts::DEFAULT_SESSION_NAME
    )]
    pub role_session_name: String,

    #[arg(long, global = true, env = "CWEXPORTER_ROLE_EXTERNAL_ID", hide_env_values = true)]
    pub role_external_id: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_STS_ENDPOINT")]
    pub sts_endpoint: Option<String>,

    #[arg(long, global = true, env = "CWEXPORTER_REQUEST_TIMEOUT", default_value = "30s")]
    pub request_timeout: String,

    #[arg(long, env = "CWEXPORTER_MAX_PAGES", default_value_t = 1)]
    pub max_pages: usize,

    #[arg(long, env = "CWEXPORTER_SHUTDOWN_TIMEOUT", default_value = "10s")]
    pub shutdown_timeout: String,

    #[arg(
        long,
        global = true,
        env = "CWEXPORTER_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        for (flag, path) in [("metrics-path", &self.metrics_path), ("health-path", &self.health_path)] {
            if !path.starts_with('/') || path == "/" {
                return Err(ExporterError::InvalidConfig(format!(
                    "--{flag} must start with '/' and must not be the root path, got {path:?}"
                )));
            }
        }
        if self.metrics_path == self.health_path {
            return Err(ExporterError::InvalidConfig(
                "--metrics-path and --health-path must differ".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ExporterError::InvalidConfig(
                "--max-pages must be at least 1".to_string(),
            ));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ExporterError::InvalidConfig(
                "--access-key-id and --secret-access-key must be given together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window_config(&self) -> Result<WindowConfig> {
        WindowConfig::parse(&self.stat_period, &self.time_window)
    }

    pub fn region(&self) -> String {
        self.resolve_region(|name| std::env::var(name).ok())
    }

    fn resolve_region(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        self.region
            .clone()
            .or_else(|| lookup("AWS_REGION"))
            .or_else(|| lookup("AWS_DEFAULT_REGION"))
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    pub fn cloudwatch_config(&self) -> Result<CloudWatchConfig> {
        let mut config = CloudWatchConfig::new(self.region());
        config.endpoint = self.endpoint.clone();
        config.timeout = parse_duration(&self.request_timeout)?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout)
    }

    pub fn static_credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                Some(Credentials::new(access_key.clone(), secret_key.clone()))
            }
            _ => None,
        }
    }

    pub fn assume_role_config(&self) -> Result<Option<AssumeRoleConfig>> {
        let Some(role_arn) = self
            .role_arn
            .as_deref()
            .map(str::trim)
            .filter(|role_arn| !role_arn.is_empty())
        else {
            return Ok(None);
        };

        let mut config = AssumeRoleConfig::new(role_arn, self.region());
        config.session_name = self.role_session_name.clone();
        config.external_id = self.role_external_id.clone();
        config.endpoint = self.sts_endpoint.clone();
        config.timeout = parse_duration(&self.request_timeout)?;
        Ok(Some(config))
    }

    /// Static keys, environment and shared credentials file, wrapped in an
    /// STS role session when `--role-arn` is set.
    pub fn credential_provider(&self) -> Result<Arc<dyn CredentialProvider>> {
        let chain: Arc<dyn CredentialProvider> = Arc::new(ChainCredentialProvider::default_chain(
            self.static_credentials(),
            self.profile.clone(),
        ));
        match self.assume_role_config()? {
            Some(config) => Ok(Arc::new(AssumeRoleProvider::new(config, chain)?)),
            None => Ok(chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["aws_cloudwatch_exporter"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn applies_defaults() {
        let cli = parse(&["--metrics-files", "ec2.json"]);
        assert_eq!(cli.listen_addr(), "0.0.0.0:9690");
        assert_eq!(cli.metrics_path, "/metrics");
        assert_eq!(cli.health_path, "/health");
        assert_eq!(cli.max_pages, 1);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.metrics_files, vec![PathBuf::from("ec2.json")]);
        assert!(cli.validate().is_ok());

        let window = cli.window_config().unwrap();
        assert_eq!(window.period(), Duration::from_secs(300));
        assert_eq!(window.lookback(), Duration::from_secs(600));
        assert_eq!(cli.shutdown_timeout().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn accepts_several_metric_files() {
        let cli = parse(&["--metrics-files", "ec2.json,sqs.json", "--metrics-files", "rds.json"]);
        assert_eq!(
            cli.metrics_files,
            vec![
                PathBuf::from("ec2.json"),
                PathBuf::from("sqs.json"),
                PathBuf::from("rds.json")
            ]
        );
    }

    #[test]
    fn metric_files_default_to_yaml() {
        let cli = Cli::try_parse_from(["aws_cloudwatch_exporter"]).unwrap();
        assert_eq!(cli.metrics_files, vec![PathBuf::from("metrics.yaml")]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_metrics_subcommands() {
        let cli = parse(&["metrics", "display", "--metrics-files", "ec2.yml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Metrics(MetricsCommand::Display))
        ));
        assert_eq!(cli.metrics_files, vec![PathBuf::from("ec2.yml")]);

        let cli = parse(&["metrics", "get", "--out-format", "json", "--out-file", "out.json"]);
        match cli.command {
            Some(Command::Metrics(MetricsCommand::Get(args))) => {
                assert_eq!(args.out_format, OutputFormat::Json);
                assert_eq!(args.out_file, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = parse(&["metrics", "get"]);
        match cli.command {
            Some(Command::Metrics(MetricsCommand::Get(args))) => {
                assert_eq!(args.out_format, OutputFormat::Yaml);
                assert_eq!(args.out_file, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn builds_assume_role_config() {
        let plain = parse(&["--metrics-files", "a.yaml"]);
        assert!(plain.assume_role_config().unwrap().is_none());

        let cli = parse(&[
            "--metrics-files",
            "a.yaml",
            "--region",
            "eu-west-1",
            "--role-arn",
            "arn:aws:iam::123456789012:role/metrics-reader",
            "--role-external-id",
            "shared",
            "--request-timeout",
            "5s",
        ]);
        let config = cli.assume_role_config().unwrap().unwrap();
        assert_eq!(config.role_arn, "arn:aws:iam::123456789012:role/metrics-reader");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.session_name, "aws-cloudwatch-exporter");
        assert_eq!(config.external_id.as_deref(), Some("shared"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(cli.credential_provider().is_ok());
    }

    #[test]
    fn region_resolution_order() {
        let cli = parse(&["--metrics-files", "a.json"]);
        assert_eq!(cli.resolve_region(|_| None), "us-east-1");
        assert_eq!(
            cli.resolve_region(|name| (name == "AWS_DEFAULT_REGION").then(|| "eu-west-1".to_string())),
            "eu-west-1"
        );
        assert_eq!(
            cli.resolve_region(|name| Some(format!("{name}-value"))),
            "AWS_REGION-value"
        );

        let explicit = parse(&["--metrics-files", "a.json", "--region", "ap-south-1"]);
        assert_eq!(explicit.resolve_region(|_| Some("eu-west-1".to_string())), "ap-south-1");
    }

    #[test]
    fn rejects_bad_settings() {
        let same_paths = parse(&["--metrics-files", "a.json", "--health-path", "/metrics"]);
        assert!(same_paths.validate().is_err());

        let root = parse(&["--metrics-files", "a.json", "--metrics-path", "/"]);
        assert!(root.validate().is_err());

        let half_keys = parse(&["--metrics-files", "a.json", "--access-key-id", "AKID"]);
        assert!(half_keys.validate().is_err());

        let bad_period = parse(&["--metrics-files", "a.json", "--stat-period", "five"]);
        assert!(matches!(
            bad_period.window_config(),
            Err(ExporterError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn parses_json_log_format_and_static_keys() {
        let cli = parse(&[
            "--metrics-files",
            "a.json",
            "--log-format",
            "json",
            "--access-key-id",
            "AKID",
            "--secret-access-key",
            "secret",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.static_credentials().unwrap().access_key, "AKID");
    }
}
