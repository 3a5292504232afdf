//! Proxy error types and their HTTP mapping.
//!
//! Every error the proxy answers with itself uses the Anthropic error
//! envelope: `{"type":"error","error":{"type":..., "message":...}}`.
//! Upstream HTTP errors are not represented here; they are relayed as-is.

use actix_web::{error::PayloadError, http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub const PERMISSION_DENIED_MESSAGE: &str =
    "Your API key does not have permission to use the specified resource.";

/// Sent to callers instead of identity-provider details, which stay in the log.
pub const REFRESH_FAILED_MESSAGE: &str = "Failed to obtain an access token for the upstream API.";
pub const UPSTREAM_FAILED_MESSAGE: &str = "The upstream API could not be reached.";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{}", PERMISSION_DENIED_MESSAGE)]
pub struct AuthorizationError;

/// Failure to obtain an access token from the identity provider.
///
/// `Clone` because a single refresh outcome is handed to every caller waiting
/// on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("token request failed: {0}")]
    Http(String),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("unsupported request method: {0}")]
    InvalidMethod(String),

    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    InvalidRequest(#[from] TransformError),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Payload(#[from] PayloadError),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ProxyError {
    fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "permission_error",
            Self::InvalidRequest(_) | Self::Payload(_) => "invalid_request_error",
            Self::BodyTooLarge { .. } => "request_too_large",
            Self::Refresh(_) | Self::Upstream(_) => "api_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Refresh(_) => REFRESH_FAILED_MESSAGE.to_string(),
            Self::Upstream(_) => UPSTREAM_FAILED_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) | Self::Payload(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Refresh(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.client_message(),
            }
        }))
    }
}
