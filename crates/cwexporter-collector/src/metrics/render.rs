use std::collections::HashMap;

use crate::metrics::types::{MetricDescriptor, MetricSample, MetricValue};

/// Renders samples in the Prometheus text format, version 0.0.4.
///
/// Samples sharing a name form one family with a single `# HELP`/`# TYPE`
/// header taken from the first sample seen; families keep first-seen order.
pub fn render_exposition(samples: &[MetricSample]) -> String {
    let mut families: Vec<Vec<&MetricSample>> = Vec::new();
    let mut index_by_name: HashMap<&str, usize> = HashMap::new();

    for sample in samples {
        match index_by_name.get(sample.name()) {
            Some(&index) => families[index].push(sample),
            None => {
                index_by_name.insert(sample.name(), families.len());
                families.push(vec![sample]);
            }
        }
    }

    let mut output = String::new();
    for family in families {
        let Some(first) = family.first() else {
            continue;
        };
        push_family_header(&mut output, &first.descriptor);

        for sample in family {
            let timestamp = match &sample.value {
                MetricValue::Gauge { timestamp, .. } => {
                    timestamp.map(|timestamp| timestamp.timestamp_millis())
                }
                MetricValue::Counter(_) => None,
            };
            output.push_str(&render_sample_line(
                &sample.descriptor.name,
                &sample.descriptor.const_labels,
                sample.value.value(),
                timestamp,
            ));
        }
    }

    output
}

/// The `# HELP`/`# TYPE` header and the labelled series name, without a value.
pub fn render_descriptor(descriptor: &MetricDescriptor) -> String {
    let mut output = String::new();
    push_family_header(&mut output, descriptor);
    output.push_str(&descriptor.name);
    push_labels(&mut output, &descriptor.const_labels);
    output.push('\n');
    output
}

fn push_family_header(output: &mut String, descriptor: &MetricDescriptor) {
    output.push_str("# HELP ");
    output.push_str(&descriptor.name);
    output.push(' ');
    output.push_str(&escape_help(&descriptor.help));
    output.push('\n');

    output.push_str("# TYPE ");
    output.push_str(&descriptor.name);
    output.push(' ');
    output.push_str(descriptor.metric_type.as_prometheus_type());
    output.push('\n');
}

fn push_labels(output: &mut String, labels: &[(String, String)]) {
    if labels.is_empty() {
        return;
    }
    output.push('{');
    for (index, (key, value)) in labels.iter().enumerate() {
        if index > 0 {
            output.push(',');
        }
        output.push_str(key);
        output.push_str("=\"");
        output.push_str(&escape_label_value(value));
        output.push('"');
    }
    output.push('}');
}

fn render_sample_line(
    name: &str,
    labels: &[(String, String)],
    value: f64,
    timestamp: Option<i64>,
) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);
    push_labels(&mut rendered, labels);

    rendered.push(' ');
    rendered.push_str(&format_metric_value(value));

    if let Some(ts) = timestamp {
        rendered.push(' ');
        rendered.push_str(&ts.to_string());
    }

    rendered.push('\n');
    rendered
}

fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value.is_sign_positive() { '+' } else { '-' };
        format!("{sign}Inf")
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
