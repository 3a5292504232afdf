//! Access tokens and the identity-provider call that mints them.

use crate::config::RefreshCredentials;
use crate::error::RefreshError;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Longest token lifetime accepted from the identity provider. Google access
/// tokens live for an hour; anything past a day is treated as garbage.
pub const MAX_EXPIRES_IN_SECS: i64 = 24 * 60 * 60;

/// Short-lived bearer token for the Vertex AI endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// A freshly minted token and its lifetime in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: AccessToken,
    pub expires_in: i64,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<IssuedToken, RefreshError>;
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Exchanges a long-lived OAuth2 refresh token for an access token.
pub struct OAuthRefreshSource {
    client: reqwest::Client,
    token_url: String,
    credentials: RefreshCredentials,
}

impl OAuthRefreshSource {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        credentials: RefreshCredentials,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for OAuthRefreshSource {
    async fn fetch(&self) -> Result<IssuedToken, RefreshError> {
        let request = RefreshTokenRequest {
            client_id: &self.credentials.client_id,
            client_secret: self.credentials.client_secret.expose_secret(),
            refresh_token: self.credentials.refresh_token.expose_secret(),
            grant_type: "refresh_token",
        };

        let response = self
            .client
            .post(&self.token_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RefreshError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Status { status, body });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Http(e.to_string()))?;
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty access_token".to_string()));
        }
        if token.expires_in <= 0 || token.expires_in > MAX_EXPIRES_IN_SECS {
            return Err(RefreshError::Malformed(format!(
                "expires_in out of range: {}",
                token.expires_in
            )));
        }

        debug!(expires_in = token.expires_in, "obtained access token");

        Ok(IssuedToken {
            access_token: AccessToken::new(token.access_token),
            expires_in: token.expires_in,
        })
    }
}
