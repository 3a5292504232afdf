//! Streams the Vertex AI response back to the caller.
//!
//! Status and headers pass through, the body is forwarded chunk by chunk as it
//! arrives. Error statuses from Vertex are relayed the same way as successes.

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use futures::StreamExt;
use tracing::error;

/// Connection-scoped headers that must not cross the proxy in either
/// direction. `content-length` is included because bodies are re-streamed.
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

pub fn relay(upstream: reqwest::Response) -> HttpResponse {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);

    for (name, value) in upstream.headers() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.append_header((name, value));
        }
    }

    let body = upstream.bytes_stream().map(|chunk| {
        chunk.map_err(|e| {
            error!(error = %e, "upstream body stream failed");
            actix_web::error::ErrorBadGateway(e.to_string())
        })
    });

    builder.streaming(body)
}
