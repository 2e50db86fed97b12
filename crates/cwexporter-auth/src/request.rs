use cwexporter_common::{
    error::{ExporterError, Result},
    time,
};
use http::{HeaderMap, HeaderValue, header};
use url::Url;

use crate::{
    credentials::Credentials,
    signature_v4::{SigningParams, sign_request},
};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// `host[:port]` exactly as it goes on the wire and into the signature.
pub fn host_header(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Headers for a SigV4-signed AWS Query protocol POST of `body` to `endpoint`.
pub fn signed_form_headers(
    endpoint: &Url,
    region: &str,
    service: &str,
    credentials: &Credentials,
    body: &str,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::HOST,
        HeaderValue::from_str(&host_header(endpoint))
            .map_err(|err| ExporterError::InvalidConfig(format!("invalid endpoint host: {err}")))?,
    );
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));

    sign_request(
        "POST",
        endpoint.path(),
        endpoint.query().unwrap_or_default(),
        &mut headers,
        body.as_bytes(),
        &SigningParams {
            credentials,
            region,
            service,
            time: time::now(),
        },
    )?;
    Ok(headers)
}

/// Endpoint override if given, else the regional `https://{service}.{region}.amazonaws.com/`.
pub fn resolve_endpoint(service: &str, region: &str, endpoint: Option<&str>) -> Result<Url> {
    let endpoint = match endpoint.map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
        _ => format!("https://{service}.{region}.amazonaws.com/"),
    };
    let url = Url::parse(&endpoint).map_err(|err| {
        ExporterError::InvalidConfig(format!("invalid {service} endpoint {endpoint}: {err}"))
    })?;
    if url.host_str().is_none() {
        return Err(ExporterError::InvalidConfig(format!(
            "{service} endpoint {endpoint} has no host"
        )));
    }
    Ok(url)
}
