//! Metric query files.
//!
//! Files follow the CloudWatch `MetricDataQueries` layout, in YAML
//! (`.yaml`, `.yml`) or JSON (`.json`):
//!
//! ```yaml
//! MetricDataQueries:
//!   - Id: m1
//!     MetricStat:
//!       Metric:
//!         Namespace: AWS/EC2
//!         MetricName: CPUUtilization
//!         Dimensions:
//!           - Name: AutoScalingGroupName
//!             Value: my-asg
//!       Stat: Average
//! ```
//!
//! ```json
//! {
//!   "MetricDataQueries": [
//!     {
//!       "Id": "m1",
//!       "MetricStat": {
//!         "Metric": {
//!           "Namespace": "AWS/EC2",
//!           "MetricName": "CPUUtilization",
//!           "Dimensions": [{ "Name": "AutoScalingGroupName", "Value": "my-asg" }]
//!         },
//!         "Stat": "Average"
//!       }
//!     }
//!   ]
//! }
//! ```

use std::{collections::HashSet, fmt, path::Path, str::FromStr};

use cwexporter_cloudwatch::Dimension;
use cwexporter_common::error::{ExporterError, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statistic {
    SampleCount,
    Average,
    Sum,
    Minimum,
    Maximum,
    /// Extended statistic such as `p99` or `p99.9`.
    Percentile(String),
}

impl Statistic {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SampleCount => "SampleCount",
            Self::Average => "Average",
            Self::Sum => "Sum",
            Self::Minimum => "Minimum",
            Self::Maximum => "Maximum",
            Self::Percentile(value) => value,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = ExporterError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "SampleCount" => Ok(Self::SampleCount),
            "Average" => Ok(Self::Average),
            "Sum" => Ok(Self::Sum),
            "Minimum" => Ok(Self::Minimum),
            "Maximum" => Ok(Self::Maximum),
            other if is_percentile(other) => Ok(Self::Percentile(other.to_string())),
            other => Err(ExporterError::InvalidStatistic(other.to_string())),
        }
    }
}

fn is_percentile(value: &str) -> bool {
    let Some(number) = value.strip_prefix('p') else {
        return false;
    };
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());

    if whole.is_empty() || whole.len() > 3 || !digits(whole) {
        return false;
    }
    if number.contains('.') && (fraction.is_empty() || fraction.len() > 2 || !digits(fraction)) {
        return false;
    }
    number.parse::<f64>().is_ok_and(|p| (0.0..=100.0).contains(&p))
}

/// One configured CloudWatch metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuerySpec {
    pub id: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub statistic: Statistic,
    pub period_override: Option<u32>,
    pub unit_override: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataQueriesConf {
    #[serde(default)]
    pub metric_data_queries: Vec<MetricDataQueryConf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataQueryConf {
    pub id: String,
    pub metric_stat: MetricStatConf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricStatConf {
    pub metric: MetricConf,
    #[serde(default)]
    pub period: Option<u32>,
    pub stat: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricConf {
    pub namespace: String,
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<DimensionConf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DimensionConf {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFileFormat {
    Yaml,
    Json,
}

impl QueryFileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(ExporterError::InvalidConfig(format!(
                "metric queries file {} must end in .yaml, .yml or .json",
                path.display()
            ))),
        }
    }
}

impl MetricDataQueriesConf {
    pub fn parse(source: &str, contents: &str, format: QueryFileFormat) -> Result<Self> {
        match format {
            QueryFileFormat::Yaml => Self::from_yaml(source, contents),
            QueryFileFormat::Json => Self::from_json(source, contents),
        }
    }

    pub fn from_yaml(source: &str, contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|err| {
            ExporterError::InvalidConfig(format!("failed to parse metric queries {source}: {err}"))
        })
    }

    pub fn from_json(source: &str, contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|err| {
            ExporterError::InvalidConfig(format!("failed to parse metric queries {source}: {err}"))
        })
    }

    pub fn extend(&mut self, other: Self) {
        self.metric_data_queries.extend(other.metric_data_queries);
    }

    /// Validates the merged queries and converts them in file order.
    pub fn into_specs(self) -> Result<Vec<MetricQuerySpec>> {
        if self.metric_data_queries.is_empty() {
            return Err(ExporterError::EmptyMetricQueries);
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.metric_data_queries.len());
        for query in self.metric_data_queries {
            let spec = query.into_spec()?;
            if !seen.insert(spec.id.clone()) {
                return Err(ExporterError::DuplicateMetricId(spec.id));
            }
            specs.push(spec);
        }
        Ok(specs)
    }
}

impl MetricDataQueryConf {
    fn into_spec(self) -> Result<MetricQuerySpec> {
        let id = self.id.trim().to_string();
        validate_id(&id)?;

        let stat = self.metric_stat;
        let namespace = stat.metric.namespace.trim().to_string();
        let metric_name = stat.metric.metric_name.trim().to_string();
        if namespace.is_empty() || metric_name.is_empty() {
            return Err(ExporterError::InvalidConfig(format!(
                "metric query {id} needs both Namespace and MetricName"
            )));
        }
        if stat.period == Some(0) {
            return Err(ExporterError::InvalidConfig(format!(
                "metric query {id} has a zero Period"
            )));
        }

        Ok(MetricQuerySpec {
            statistic: stat.stat.parse()?,
            dimensions: stat
                .metric
                .dimensions
                .into_iter()
                .map(|dimension| Dimension {
                    name: dimension.name,
                    value: dimension.value,
                })
                .collect(),
            period_override: stat.period,
            unit_override: stat.unit.filter(|unit| !unit.trim().is_empty()),
            namespace,
            metric_name,
            id,
        })
    }
}

/// CloudWatch ids start with a lowercase letter and contain only
/// alphanumerics and underscores.
fn validate_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let valid = chars.next().is_some_and(|first| first.is_ascii_lowercase())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ExporterError::InvalidConfig(format!(
            "invalid metric query id {id:?}: must start with a lowercase letter and contain only letters, digits and underscores"
        )))
    }
}

/// Reads every file in order, concatenates their queries and validates the result.
pub fn load_metric_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<MetricQuerySpec>> {
    let mut merged = MetricDataQueriesConf::default();
    for path in paths {
        let path = path.as_ref();
        let format = QueryFileFormat::from_path(path)?;
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ExporterError::InvalidConfig(format!(
                "failed to read metric queries {}: {err}",
                path.display()
            ))
        })?;
        let conf = MetricDataQueriesConf::parse(&path.display().to_string(), &contents, format)?;
        info!(
            file = %path.display(),
            queries = conf.metric_data_queries.len(),
            "loaded metric queries"
        );
        merged.extend(conf);
    }
    merged.into_specs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EC2: &str = r#"{
        "MetricDataQueries": [
            {
                "Id": "m1",
                "MetricStat": {
                    "Metric": {
                        "Namespace": "AWS/EC2",
                        "MetricName": "CPUUtilization",
                        "Dimensions": [{ "Name": "AutoScalingGroupName", "Value": "my-asg" }]
                    },
                    "Stat": "Average"
                }
            },
            {
                "Id": "m2",
                "MetricStat": {
                    "Metric": { "Namespace": "AWS/ELB", "MetricName": "Latency" },
                    "Period": 60,
                    "Stat": "p99.9",
                    "Unit": "Seconds"
                }
            }
        ]
    }"#;

    fn parse(json: &str) -> Result<Vec<MetricQuerySpec>> {
        MetricDataQueriesConf::from_json("test", json)?.into_specs()
    }

    #[test]
    fn parses_cloudwatch_layout() {
        let specs = parse(EC2).unwrap();
        assert_eq!(specs.len(), 2);

        assert_eq!(specs[0].id, "m1");
        assert_eq!(specs[0].namespace, "AWS/EC2");
        assert_eq!(specs[0].metric_name, "CPUUtilization");
        assert_eq!(specs[0].statistic, Statistic::Average);
        assert_eq!(specs[0].dimensions.len(), 1);
        assert_eq!(specs[0].dimensions[0].name, "AutoScalingGroupName");
        assert_eq!(specs[0].period_override, None);

        assert_eq!(specs[1].statistic, Statistic::Percentile("p99.9".to_string()));
        assert_eq!(specs[1].period_override, Some(60));
        assert_eq!(specs[1].unit_override.as_deref(), Some("Seconds"));
        assert!(specs[1].dimensions.is_empty());
    }

    #[test]
    fn statistics_are_validated() {
        for valid in ["SampleCount", "Average", "Sum", "Minimum", "Maximum", "p0", "p50", "p99.99", "p100"] {
            assert!(valid.parse::<Statistic>().is_ok(), "{valid}");
        }
        for invalid in ["average", "Mean", "p", "p101", "p99.", "p99.999", "p-1", "tm99"] {
            assert!(
                matches!(invalid.parse::<Statistic>(), Err(ExporterError::InvalidStatistic(_))),
                "{invalid}"
            );
        }
    }

    #[test]
    fn rejects_empty_query_list() {
        assert!(matches!(
            parse(r#"{"MetricDataQueries": []}"#),
            Err(ExporterError::EmptyMetricQueries)
        ));
        assert!(matches!(parse("{}"), Err(ExporterError::EmptyMetricQueries)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"{"MetricDataQueries": [
            {"Id": "m1", "MetricStat": {"Metric": {"Namespace": "AWS/EC2", "MetricName": "A"}, "Stat": "Sum"}},
            {"Id": "m1", "MetricStat": {"Metric": {"Namespace": "AWS/EC2", "MetricName": "B"}, "Stat": "Sum"}}
        ]}"#;
        match parse(json) {
            Err(ExporterError::DuplicateMetricId(id)) => assert_eq!(id, "m1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_queries() {
        let cases = [
            r#"{"Id": "M1", "MetricStat": {"Metric": {"Namespace": "AWS/EC2", "MetricName": "A"}, "Stat": "Sum"}}"#,
            r#"{"Id": "m-1", "MetricStat": {"Metric": {"Namespace": "AWS/EC2", "MetricName": "A"}, "Stat": "Sum"}}"#,
            r#"{"Id": "m1", "MetricStat": {"Metric": {"Namespace": "", "MetricName": "A"}, "Stat": "Sum"}}"#,
            r#"{"Id": "m1", "MetricStat": {"Metric": {"Namespace": "AWS/EC2", "MetricName": "A"}, "Period": 0, "Stat": "Sum"}}"#,
        ];
        for query in cases {
            let json = format!(r#"{{"MetricDataQueries": [{query}]}}"#);
            assert!(
                matches!(parse(&json), Err(ExporterError::InvalidConfig(_))),
                "{query}"
            );
        }
    }

    const SQS_YAML: &str = "\
MetricDataQueries:
  - Id: q1
    MetricStat:
      Metric:
        Namespace: AWS/SQS
        MetricName: ApproximateNumberOfMessagesVisible
        Dimensions:
          - Name: QueueName
            Value: jobs
      Period: 60
      Stat: Maximum
      Unit: Count
";

    #[test]
    fn parses_yaml_layout() {
        let specs = MetricDataQueriesConf::from_yaml("sqs.yaml", SQS_YAML)
            .unwrap()
            .into_specs()
            .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "q1");
        assert_eq!(specs[0].namespace, "AWS/SQS");
        assert_eq!(specs[0].statistic, Statistic::Maximum);
        assert_eq!(specs[0].period_override, Some(60));
        assert_eq!(specs[0].unit_override.as_deref(), Some("Count"));
        assert_eq!(specs[0].dimensions[0].value, "jobs");
    }

    #[test]
    fn loads_yaml_and_json_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sqs = dir.path().join("sqs.yml");
        let ec2 = dir.path().join("ec2.json");
        std::fs::write(&sqs, SQS_YAML).unwrap();
        std::fs::write(&ec2, EC2).unwrap();

        let specs = load_metric_files(&[sqs, ec2]).unwrap();
        assert_eq!(
            specs.iter().map(|spec| spec.id.as_str()).collect::<Vec<_>>(),
            vec!["q1", "m1", "m2"]
        );
    }

    #[test]
    fn file_format_follows_extension() {
        assert_eq!(
            QueryFileFormat::from_path(Path::new("metrics.yaml")).unwrap(),
            QueryFileFormat::Yaml
        );
        assert_eq!(
            QueryFileFormat::from_path(Path::new("queries/M1.YML")).unwrap(),
            QueryFileFormat::Yaml
        );
        assert_eq!(
            QueryFileFormat::from_path(Path::new("ec2.json")).unwrap(),
            QueryFileFormat::Json
        );
        assert!(matches!(
            QueryFileFormat::from_path(Path::new("metrics.toml")),
            Err(ExporterError::InvalidConfig(_))
        ));
        assert!(QueryFileFormat::from_path(Path::new("metrics")).is_err());
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        assert!(matches!(
            MetricDataQueriesConf::from_yaml("broken.yaml", "MetricDataQueries: [\n  - Id: m1\n"),
            Err(ExporterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            MetricDataQueriesConf::from_json("broken.json", "{\"MetricDataQueries\": ["),
            Err(ExporterError::InvalidConfig(_))
        ));
    }
}
