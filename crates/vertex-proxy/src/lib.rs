//! Vertex Proxy - serve Anthropic Messages API traffic from Vertex AI.
//!
//! Clients speak the Anthropic `/v1/messages` wire format and authenticate
//! with a shared `x-api-key`. The proxy swaps that for a Google OAuth2 access
//! token, rewrites the body for Vertex AI's `streamRawPredict` endpoint and
//! streams the response back untouched.
//!
//! Design goals:
//! - One access token per process, refreshed lazily with single-flight
//!   coordination ([`token_cache::TokenCache`]).
//! - No buffering of upstream responses; SSE streams pass straight through.
//! - Stateless request rewriting apart from the token cache.

pub mod clock;
pub mod config;
pub mod cors;
pub mod error;
pub mod gate;
pub mod relay;
pub mod server;
pub mod token;
pub mod token_cache;
pub mod transform;

pub use config::ProxyConfig;
pub use server::serve;
