//! `metrics display` and `metrics get`: one-shot checks of the metric queries
//! files that never start the HTTP server.

use std::{io::Write, path::Path};

use anyhow::Context;
use cwexporter_cloudwatch::{GetMetricDataOutput, MetricDataApi};
use cwexporter_collector::{
    DescriptorRegistry, MetricQuerySpec, ScrapeWindow, compile, render_descriptor,
};
use cwexporter_common::error::{ExporterError, Result};
use tracing::info;

use crate::cli::OutputFormat;

/// Specs that produce a series, in file order. Fails the same way server
/// startup does on colliding or missing queries.
fn exported_specs(specs: &[MetricQuerySpec]) -> Result<(DescriptorRegistry, Vec<MetricQuerySpec>)> {
    let registry = DescriptorRegistry::build(specs)?;
    let exported = specs
        .iter()
        .filter(|spec| registry.contains(&spec.id))
        .cloned()
        .collect::<Vec<_>>();
    if exported.is_empty() {
        return Err(ExporterError::EmptyMetricQueries);
    }
    Ok((registry, exported))
}

/// Descriptor of every exported query, in file order.
pub fn display_descriptors(specs: &[MetricQuerySpec]) -> Result<String> {
    let (registry, exported) = exported_specs(specs)?;
    Ok(exported
        .iter()
        .filter_map(|spec| registry.get(&spec.id))
        .map(|descriptor| render_descriptor(descriptor))
        .collect())
}

/// First page of `GetMetricData` for all exported queries over `window`.
pub async fn get_metric_data(
    api: &dyn MetricDataApi,
    specs: &[MetricQuerySpec],
    window: &ScrapeWindow,
) -> Result<GetMetricDataOutput> {
    let (_, exported) = exported_specs(specs)?;
    let input = compile(&exported, window, None);
    info!(
        queries = input.metric_data_queries.len(),
        start = %input.start_time,
        end = %input.end_time,
        "requesting metric data"
    );
    api.get_metric_data(&input).await
}

pub fn format_output(output: &GetMetricDataOutput, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(output).context("failed to encode yaml output"),
        OutputFormat::Json => serde_json::to_string_pretty(output)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .context("failed to encode json output"),
    }
}

pub fn write_output(contents: &str, out_file: Option<&Path>) -> anyhow::Result<()> {
    match out_file {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(contents.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}
