//! Anthropic Messages request -> Vertex AI `streamRawPredict` request.
//!
//! - `model` and `anthropic_version` are removed from the body; Vertex takes
//!   the model from the URL and the version is pinned to
//!   [`VERTEX_ANTHROPIC_VERSION`].
//! - The region alternates by wall-clock half-minute.
//! - Inbound headers are forwarded with the bearer token swapped in.

use crate::config::UpstreamSettings;
use crate::error::TransformError;
use crate::relay::HOP_BY_HOP_HEADERS;
use crate::token::AccessToken;
use chrono::{DateTime, Timelike, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

pub const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";
pub const UPSTREAM_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Inbound headers dropped on top of the hop-by-hop set. `anthropic-version`
/// moves into the body and `x-api-key` is the proxy's own credential.
const STRIPPED_HEADERS: &[&str] = &[
    "anthropic-version",
    "x-api-key",
    "authorization",
    "content-type",
    "host",
];

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: reqwest::Method,
    pub region: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UpstreamRequest {
    pub fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        client
            .request(self.method, self.url)
            .headers(self.headers)
            .body(self.body)
    }
}

/// First half of the minute goes to the primary region, second half to the
/// secondary one.
pub fn select_region(second: u32, settings: &UpstreamSettings) -> &str {
    if second < 30 {
        &settings.primary_region
    } else {
        &settings.secondary_region
    }
}

pub fn build_upstream_url(settings: &UpstreamSettings, region: &str) -> String {
    settings
        .endpoint_template
        .replace("{region}", region)
        .replace("{project}", &settings.project_id)
        .replace("{model}", &settings.model)
}

pub fn rewrite_body(body: &[u8]) -> Result<Vec<u8>, TransformError> {
    let mut value: Value = serde_json::from_slice(body)?;
    let object = value.as_object_mut().ok_or(TransformError::NotAnObject)?;

    object.shift_remove("anthropic_version");
    object.shift_remove("model");
    object.insert(
        "anthropic_version".to_string(),
        Value::String(VERTEX_ANTHROPIC_VERSION.to_string()),
    );

    Ok(serde_json::to_vec(&value)?)
}

pub fn rewrite_headers<'a, I>(inbound: I, token: &AccessToken) -> Result<HeaderMap, TransformError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut headers = HeaderMap::new();

    for (name, value) in inbound {
        if STRIPPED_HEADERS
            .iter()
            .chain(HOP_BY_HOP_HEADERS)
            .any(|h| h.eq_ignore_ascii_case(name))
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    let mut bearer = HeaderValue::from_str(&token.bearer_header())
        .map_err(|_| TransformError::InvalidHeader("authorization"))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(UPSTREAM_CONTENT_TYPE));

    Ok(headers)
}

pub fn build_upstream_request<'a, I>(
    method: &str,
    headers: I,
    body: &[u8],
    token: &AccessToken,
    settings: &UpstreamSettings,
    now: DateTime<Utc>,
) -> Result<UpstreamRequest, TransformError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| TransformError::InvalidMethod(method.to_string()))?;
    let region = select_region(now.second(), settings).to_string();

    Ok(UpstreamRequest {
        method,
        url: build_upstream_url(settings, &region),
        region,
        headers: rewrite_headers(headers, token)?,
        body: rewrite_body(body)?,
    })
}
