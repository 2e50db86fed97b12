use chrono::{DateTime, Utc};
use cwexporter_common::{
    error::{ExporterError, Result},
    time::{format_amz_date, format_amz_short_date},
};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName, HeaderValue, header};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE_HEADER: &str = "x-amz-date";
const SECURITY_TOKEN_HEADER: &str = "x-amz-security-token";

const AWS_URI_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

pub struct SigningParams<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// Adds `x-amz-date`, the optional session token and the `authorization`
/// header to `headers`. Every header present before the call is signed, so
/// `host` must already be set.
pub fn sign_request(
    method: &str,
    path: &str,
    query_string: &str,
    headers: &mut HeaderMap,
    payload: &[u8],
    params: &SigningParams<'_>,
) -> Result<()> {
    let date_time = format_amz_date(&params.time);
    let date = format_amz_short_date(&params.time);

    headers.insert(AMZ_DATE_HEADER, header_value(&date_time)?);
    if let Some(token) = &params.credentials.session_token {
        headers.insert(SECURITY_TOKEN_HEADER, header_value(token)?);
    }

    let mut signed_header_names = headers
        .keys()
        .map(|name| name.as_str().to_ascii_lowercase())
        .collect::<Vec<_>>();
    signed_header_names.sort();
    signed_header_names.dedup();

    let canonical_headers = canonical_headers(headers, &signed_header_names).ok_or_else(|| {
        ExporterError::InternalError("request headers are not valid for signing".to_string())
    })?;
    let signed_headers = signed_header_names.join(";");

    let canonical_request = get_canonical_request(
        method,
        &canonical_uri(path),
        &canonical_query_string(query_string),
        &canonical_headers,
        &signed_headers,
        &sha256_hex(payload),
    );

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let string_to_sign = get_string_to_sign(&canonical_request, &date_time, &scope);
    let signing_key = get_signing_key(
        &params.credentials.secret_key,
        &date,
        params.region,
        params.service,
    );
    let signature = get_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        params.credentials.access_key
    );
    headers.insert(header::AUTHORIZATION, header_value(&authorization)?);
    Ok(())
}

pub fn get_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, service.as_bytes());
    hmac_sha256(&service_key, b"aws4_request")
}

pub fn get_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{uri}\n{query_string}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

pub fn get_string_to_sign(canonical_request: &str, date_time: &str, scope: &str) -> String {
    let canonical_hash = sha256_hex(canonical_request.as_bytes());
    format!("{ALGORITHM}\n{date_time}\n{scope}\n{canonical_hash}")
}

pub fn get_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let starts_with_slash = path.starts_with('/');
    let ends_with_slash = path.ends_with('/');
    let encoded_segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(percent_encode)
        .collect::<Vec<_>>();

    let mut out = String::new();
    if starts_with_slash {
        out.push('/');
    }
    out.push_str(&encoded_segments.join("/"));
    if ends_with_slash && !out.ends_with('/') {
        out.push('/');
    }
    if out.is_empty() { "/".to_string() } else { out }
}

pub fn canonical_query_string(query_string: &str) -> String {
    let mut params = query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_encode(name), percent_encode(value))
        })
        .collect::<Vec<_>>();

    params.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    params
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_headers(headers: &HeaderMap, signed_header_names: &[String]) -> Option<String> {
    let mut out = String::new();
    for name in signed_header_names {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        let values = headers
            .get_all(&name)
            .iter()
            .map(|value| value.to_str().map(normalize_header_value))
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;
        out.push_str(name.as_str());
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }
    Some(out)
}

fn normalize_header_value(value: &str) -> String {
    let mut out = String::new();
    let mut in_whitespace = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_whitespace() {
            in_whitespace = true;
            continue;
        }
        if in_whitespace && !out.is_empty() {
            out.push(' ');
        }
        in_whitespace = false;
        out.push(ch);
    }
    out
}

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_URI_ENCODE_SET).to_string()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| ExporterError::InternalError(format!("invalid signing header value: {err}")))
}
