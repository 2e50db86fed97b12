use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

const DEFAULT_DIRECTIVES: &str =
    "aws_cloudwatch_exporter=info,cwexporter_server=info,cwexporter_collector=info,cwexporter_cloudwatch=info,tower_http=info";

/// `RUST_LOG` wins over the default directives when set.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
