//! Actix Web HTTP server.
//!
//! Every method and path is handled by [`handle_request`]:
//! - `OPTIONS` -> 204 preflight
//! - anything else -> access gate, read body, token, rewrite, forward to
//!   Vertex AI, relay
//!
//! The body is only read once the access gate has passed.

use crate::{
    clock::{Clock, SystemClock},
    config::{ProxyConfig, UpstreamSettings},
    cors,
    error::ProxyError,
    gate::{AccessGate, API_KEY_HEADER},
    relay,
    token::OAuthRefreshSource,
    token_cache::TokenCache,
    transform,
};
use actix_web::{
    http::Method, middleware::from_fn, web, App, HttpRequest, HttpResponse, HttpServer,
    ResponseError,
};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct AppState {
    pub gate: AccessGate,
    pub upstream: UpstreamSettings,
    pub tokens: TokenCache,
    pub client: reqwest::Client,
    pub clock: Arc<dyn Clock>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ProxyConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        let source = OAuthRefreshSource::new(client.clone(), config.token_url, config.credentials);

        Ok(Self {
            gate: AccessGate::new(config.api_key),
            upstream: config.upstream,
            tokens: TokenCache::new(Arc::new(source), Arc::clone(&clock)),
            client,
            clock,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

/// Registers shared state and the catch-all proxy route. Wrap the `App` in
/// `from_fn(cors::cors_layer)` so every response gets CORS headers.
pub fn configure_app(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(state).default_service(web::to(handle_request));
    }
}

pub async fn serve(config: ProxyConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let state = web::Data::new(AppState::from_config(config)?);

    info!(
        addr = %addr,
        project = %state.upstream.project_id,
        model = %state.upstream.model,
        "vertex-proxy listening"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(cors::cors_layer))
            .configure(configure_app(state.clone()))
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await
    .context("server error")?;

    Ok(())
}

pub async fn handle_request(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        return HttpResponse::NoContent().finish();
    }

    match forward(&state, &req, payload).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                ProxyError::Unauthorized(_) => warn!(
                    method = %req.method(),
                    path = %req.path(),
                    "rejected request with invalid API key"
                ),
                ProxyError::InvalidRequest(_)
                | ProxyError::Payload(_)
                | ProxyError::BodyTooLarge { .. } => warn!(error = %e, "invalid request"),
                _ => error!(error = %e, "proxy request failed"),
            }
            e.error_response()
        }
    }
}

async fn forward(
    state: &AppState,
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, ProxyError> {
    let supplied = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    state.gate.authorize(supplied)?;

    let body = read_body(payload, state.max_body_bytes).await?;

    let token = state.tokens.get().await?;

    let upstream = transform::build_upstream_request(
        req.method().as_str(),
        req.headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes())),
        &body,
        &token,
        &state.upstream,
        state.clock.now(),
    )?;

    debug!(
        method = %upstream.method,
        region = %upstream.region,
        "forwarding to Vertex AI"
    );

    let response = upstream.into_builder(&state.client).send().await?;

    if !response.status().is_success() {
        warn!(status = %response.status(), "Vertex AI returned an error status");
    }

    Ok(relay::relay(response))
}

/// Collects the request body, failing as soon as it grows past `limit`.
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<web::Bytes, ProxyError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await.transpose()? {
        if body.len() + chunk.len() > limit {
            return Err(ProxyError::BodyTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
