//! AWS Query protocol encoding for `GetMetricData` and XML decoding of its
//! responses.

use chrono::{DateTime, Utc};
use cwexporter_common::{
    error::{ExporterError, Result},
    time::{format_iso8601, parse_iso8601},
};
use quick_xml::de::from_str as xml_from_str;
use serde::Deserialize;
use tracing::warn;
use url::form_urlencoded;

use crate::types::{
    GetMetricDataInput, GetMetricDataOutput, MessageData, MetricDataResult, StatusCode,
};

pub const ACTION: &str = "GetMetricData";
pub const API_VERSION: &str = "2010-08-01";
/// Message code attached to results whose datapoints could not be decoded.
pub const DECODE_ERROR_CODE: &str = "DecodeError";

/// Flattens the request into `application/x-www-form-urlencoded` pairs.
/// Field order is fixed so equal inputs encode to identical bodies.
pub fn encode_get_metric_data(input: &GetMetricDataInput) -> String {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("Action", ACTION);
    form.append_pair("Version", API_VERSION);
    form.append_pair("StartTime", &format_iso8601(&input.start_time));
    form.append_pair("EndTime", &format_iso8601(&input.end_time));
    form.append_pair("ScanBy", input.scan_by.as_str());
    if let Some(token) = input.next_token.as_deref().filter(|token| !token.is_empty()) {
        form.append_pair("NextToken", token);
    }

    for (index, query) in input.metric_data_queries.iter().enumerate() {
        let prefix = format!("MetricDataQueries.member.{}", index + 1);
        let stat = &query.metric_stat;

        form.append_pair(&format!("{prefix}.Id"), &query.id);
        form.append_pair(&format!("{prefix}.Label"), &query.label);
        form.append_pair(
            &format!("{prefix}.ReturnData"),
            if query.return_data { "true" } else { "false" },
        );
        form.append_pair(
            &format!("{prefix}.MetricStat.Metric.Namespace"),
            &stat.metric.namespace,
        );
        form.append_pair(
            &format!("{prefix}.MetricStat.Metric.MetricName"),
            &stat.metric.metric_name,
        );
        for (dim_index, dimension) in stat.metric.dimensions.iter().enumerate() {
            let dim_prefix = format!("{prefix}.MetricStat.Metric.Dimensions.member.{}", dim_index + 1);
            form.append_pair(&format!("{dim_prefix}.Name"), &dimension.name);
            form.append_pair(&format!("{dim_prefix}.Value"), &dimension.value);
        }
        form.append_pair(&format!("{prefix}.MetricStat.Period"), &stat.period.to_string());
        form.append_pair(&format!("{prefix}.MetricStat.Stat"), &stat.stat);
        if let Some(unit) = stat.unit.as_deref().filter(|unit| !unit.is_empty()) {
            form.append_pair(&format!("{prefix}.MetricStat.Unit"), unit);
        }
    }

    form.finish()
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct MemberList<T> {
    #[serde(rename = "member", default)]
    member: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GetMetricDataResponseXml {
    #[serde(rename = "GetMetricDataResult")]
    result: GetMetricDataResultXml,
}

#[derive(Debug, Deserialize)]
struct GetMetricDataResultXml {
    #[serde(rename = "MetricDataResults", default)]
    metric_data_results: Option<MemberList<MetricDataResultXml>>,
    #[serde(rename = "NextToken", default)]
    next_token: Option<String>,
    #[serde(rename = "Messages", default)]
    messages: Option<MemberList<MessageDataXml>>,
}

#[derive(Debug, Deserialize)]
struct MetricDataResultXml {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Label", default)]
    label: Option<String>,
    #[serde(rename = "StatusCode", default)]
    status_code: Option<String>,
    #[serde(rename = "Timestamps", default)]
    timestamps: Option<MemberList<String>>,
    #[serde(rename = "Values", default)]
    values: Option<MemberList<String>>,
    #[serde(rename = "Messages", default)]
    messages: Option<MemberList<MessageDataXml>>,
}

#[derive(Debug, Deserialize)]
struct MessageDataXml {
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "Value", default)]
    value: Option<String>,
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

pub fn decode_get_metric_data(xml: &str) -> Result<GetMetricDataOutput> {
    let response: GetMetricDataResponseXml = xml_from_str(xml)
        .map_err(|err| ExporterError::Decode(format!("invalid GetMetricData response xml: {err}")))?;
    let result = response.result;

    let metric_data_results = members(result.metric_data_results)
        .into_iter()
        .map(decode_result)
        .collect();

    Ok(GetMetricDataOutput {
        messages: decode_messages(result.messages),
        metric_data_results,
        next_token: result.next_token.filter(|token| !token.trim().is_empty()),
    })
}

/// Extracts `(code, message)` from an AWS `ErrorResponse` document.
pub fn decode_error(xml: &str) -> Option<(String, String)> {
    let response: ErrorResponseXml = xml_from_str(xml).ok()?;
    let code = response.error.code.unwrap_or_else(|| "Unknown".to_string());
    let message = response.error.message.unwrap_or_default();
    Some((code, message))
}

/// A series that cannot be decoded is turned into an `InternalError` result
/// so only that metric is dropped from the cycle.
fn decode_result(raw: MetricDataResultXml) -> MetricDataResult {
    let mut messages = decode_messages(raw.messages);
    let mut status_code = raw
        .status_code
        .as_deref()
        .map(StatusCode::from)
        .unwrap_or(StatusCode::Complete);

    let (timestamps, values) = match decode_series(&raw.id, raw.timestamps, raw.values) {
        Ok(series) => series,
        Err(err) => {
            warn!(id = %raw.id, error = %err, "discarding undecodable metric series");
            status_code = StatusCode::InternalError;
            messages.push(MessageData {
                code: Some(DECODE_ERROR_CODE.to_string()),
                value: err.to_string(),
            });
            (Vec::new(), Vec::new())
        }
    };

    MetricDataResult {
        id: raw.id,
        label: raw.label,
        status_code,
        messages,
        timestamps,
        values,
    }
}

fn decode_series(
    id: &str,
    timestamps: Option<MemberList<String>>,
    values: Option<MemberList<String>>,
) -> Result<(Vec<DateTime<Utc>>, Vec<f64>)> {
    let timestamps = members(timestamps)
        .iter()
        .map(|value| parse_iso8601(value))
        .collect::<Result<Vec<_>>>()?;

    let values = members(values)
        .iter()
        .map(|value| {
            value.trim().parse::<f64>().map_err(|err| {
                ExporterError::Decode(format!("invalid value {value:?} for metric id {id}: {err}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if timestamps.len() != values.len() {
        return Err(ExporterError::Decode(format!(
            "metric id {id} returned {} timestamps for {} values",
            timestamps.len(),
            values.len()
        )));
    }
    Ok((timestamps, values))
}

fn decode_messages(raw: Option<MemberList<MessageDataXml>>) -> Vec<MessageData> {
    members(raw)
        .into_iter()
        .map(|message| MessageData {
            code: message.code.filter(|code| !code.is_empty()),
            value: message.value.unwrap_or_default(),
        })
        .collect()
}

fn members<T>(list: Option<MemberList<T>>) -> Vec<T> {
    list.map(|list| list.member).unwrap_or_default()
}
