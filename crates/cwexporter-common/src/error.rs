use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("no metric data queries were configured")]
    EmptyMetricQueries,
    #[error("duplicate metric data query id: {0}")]
    DuplicateMetricId(String),
    #[error("metric data queries {first} and {second} both export the series {series}")]
    DuplicateMetricSeries {
        series: String,
        first: String,
        second: String,
    },
    #[error("invalid statistic: {0}")]
    InvalidStatistic(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cloudwatch api error (status {status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExporterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::InvalidDuration { .. } => "InvalidDuration",
            Self::EmptyMetricQueries => "EmptyMetricQueries",
            Self::DuplicateMetricId(_) => "DuplicateMetricId",
            Self::DuplicateMetricSeries { .. } => "DuplicateMetricSeries",
            Self::InvalidStatistic(_) => "InvalidStatistic",
            Self::Credentials(_) => "Credentials",
            Self::Transport(_) => "Transport",
            Self::Api { .. } => "ApiError",
            Self::Decode(_) => "Decode",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "Io",
        }
    }

    /// Errors raised while validating configuration; these abort startup.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::InvalidDuration { .. }
                | Self::EmptyMetricQueries
                | Self::DuplicateMetricId(_)
                | Self::DuplicateMetricSeries { .. }
                | Self::InvalidStatistic(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
