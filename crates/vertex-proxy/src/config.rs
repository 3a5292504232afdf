//! Configuration from environment variables.
//!
//! **Required** (no defaults):
//! - `CLIENT_ID`, `CLIENT_SECRET`, `REFRESH_TOKEN`: Google OAuth2 client used to
//!   mint short-lived access tokens
//! - `PROJECT_ID`: Google Cloud project hosting the Vertex AI endpoint
//! - `API_KEY`: secret callers must present in `x-api-key`
//!
//! **Optional:**
//! - `PORT`: server port (default: 8787)
//! - `REQUEST_TIMEOUT_SECS`: upstream request timeout, including the streamed
//!   body (default: 600)
//! - `MAX_BODY_BYTES`: inbound body limit (default: 32 MiB)
//! - `MODEL`: Vertex model id (default: `claude-3-5-sonnet@20240620`)
//! - `PRIMARY_REGION` / `SECONDARY_REGION`: regions used in the first and
//!   second half of each minute (default: `europe-west1` / `us-east5`)
//! - `TOKEN_URL`: OAuth2 token endpoint
//! - `VERTEX_ENDPOINT_TEMPLATE`: upstream URL with `{region}`, `{project}` and
//!   `{model}` placeholders

use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet@20240620";
pub const DEFAULT_PRIMARY_REGION: &str = "europe-west1";
pub const DEFAULT_SECONDARY_REGION: &str = "us-east5";
pub const DEFAULT_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/anthropic/models/{model}:streamRawPredict";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// OAuth2 client credentials exchanged for access tokens.
#[derive(Debug)]
pub struct RefreshCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

/// Everything needed to address the Vertex AI endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    pub project_id: String,
    pub model: String,
    pub primary_region: String,
    pub secondary_region: String,
    pub endpoint_template: String,
}

impl UpstreamSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            model: DEFAULT_MODEL.to_string(),
            primary_region: DEFAULT_PRIMARY_REGION.to_string(),
            secondary_region: DEFAULT_SECONDARY_REGION.to_string(),
            endpoint_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ProxyConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub token_url: String,
    pub api_key: SecretString,
    pub credentials: RefreshCredentials,
    pub upstream: UpstreamSettings,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));
        let optional = |var: &str, default: &str| get(var).unwrap_or_else(|| default.to_string());

        let credentials = RefreshCredentials {
            client_id: required("CLIENT_ID")?,
            client_secret: SecretString::from(required("CLIENT_SECRET")?),
            refresh_token: SecretString::from(required("REFRESH_TOKEN")?),
        };
        let project_id = required("PROJECT_ID")?;
        let api_key = SecretString::from(required("API_KEY")?);

        Ok(Self {
            port: parsed(get("PORT"), "PORT", DEFAULT_PORT)?,
            request_timeout_secs: parsed(
                get("REQUEST_TIMEOUT_SECS"),
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            max_body_bytes: parsed(
                get("MAX_BODY_BYTES"),
                "MAX_BODY_BYTES",
                DEFAULT_MAX_BODY_BYTES,
            )?,
            token_url: optional("TOKEN_URL", DEFAULT_TOKEN_URL),
            api_key,
            credentials,
            upstream: UpstreamSettings {
                project_id,
                model: optional("MODEL", DEFAULT_MODEL),
                primary_region: optional("PRIMARY_REGION", DEFAULT_PRIMARY_REGION),
                secondary_region: optional("SECONDARY_REGION", DEFAULT_SECONDARY_REGION),
                endpoint_template: optional("VERTEX_ENDPOINT_TEMPLATE", DEFAULT_ENDPOINT_TEMPLATE),
            },
        })
    }
}

fn parsed<T: FromStr>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
