//! HTTP handlers for the downstream surface in §6's route table.
//!
//! Each dialect handler resolves its own model name, streaming flag,
//! and upstream URL (the three things that differ per dialect — Gemini
//! carries the model in the path, OpenAI/Claude in the body) and calls
//! `decide_activation` before handing off to `dispatch`, which is the
//! same for all three: passthrough when inactive, Engine-driven SSE
//! when active.

pub mod chat_completions;
pub mod gemini;
pub mod health;
pub mod messages;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{HeaderMap, Response};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::Config;
use crate::dialect::Dialect;
use crate::edge::{self, ActivationDecision};
use crate::engine::{self, EngineRequest};
use crate::error::AppError;
use crate::streamer::Streamer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub streamer: Arc<Streamer>,
}

/// Everything a dialect handler has already resolved before handing off
/// to the shared dispatch path. `body` and `upstream_url` must already
/// reflect `decision.model` (the activation prefix, if matched, is
/// stripped before this is built).
pub struct DialectRequest {
    pub dialect: Dialect,
    pub upstream_url: String,
    pub body: Value,
    pub headers: HeaderMap,
    pub decision: ActivationDecision,
    pub request_id: String,
    pub peer: SocketAddr,
}

/// Shared activation-decided passthrough-or-engine path for all three
/// dialect handlers.
pub async fn dispatch(state: &AppState, req: DialectRequest) -> Result<Response<Body>, AppError> {
    let config = state.config.load();
    let started_at = Instant::now();
    let endpoint = endpoint_label(req.dialect);

    crate::metrics::record_request(req.dialect.as_str(), endpoint);

    let authorization = req
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(crate::logging::sanitize_header_value);
    tracing::info!(
        request_id = %req.request_id,
        dialect = req.dialect.as_str(),
        endpoint,
        active = req.decision.active,
        authorization = authorization.as_deref().unwrap_or("none"),
        "dispatching request"
    );

    let upstream_headers = crate::headers::build_upstream_headers(
        &req.headers,
        req.peer.ip(),
        "https",
        upstream_host(&req.upstream_url),
        config.proxy.trust_proxy_headers,
        &config.proxy.trusted_proxy_cidrs,
    );

    if !req.decision.active {
        let upstream_response = state
            .streamer
            .passthrough(&req.upstream_url, upstream_headers, &req.body)
            .await?;

        let status = upstream_response.status();
        let content_type = upstream_response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .cloned();
        let body_stream = upstream_response
            .bytes_stream()
            .map(|item| item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));

        let mut response = Response::new(Body::from_stream(body_stream));
        *response.status_mut() = status;
        if let Some(ct) = content_type {
            response.headers_mut().insert(axum::http::header::CONTENT_TYPE, ct);
        }
        let extra_headers = if req.decision.signalled {
            edge::ignored_response_headers(&req.request_id)
        } else {
            let mut h = HeaderMap::new();
            if let Ok(v) = axum::http::HeaderValue::from_str(&req.request_id) {
                h.insert("x-request-id", v);
            }
            h
        };
        for (name, value) in extra_headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        crate::metrics::record_duration(req.dialect.as_str(), endpoint, started_at.elapsed());
        return Ok(response);
    }

    let engine_request = EngineRequest {
        dialect: req.dialect,
        url: req.upstream_url,
        headers: upstream_headers,
        original_body: req.body,
        request_id: req.request_id.clone(),
        marker: config.anti_truncation.marker.clone(),
        max_attempts: config.anti_truncation.max_attempts,
        keepalive_interval: Duration::from_secs_f64(config.anti_truncation.keepalive_interval_seconds),
        idle_timeout: Duration::from_secs_f64(config.anti_truncation.upstream_idle_timeout_seconds),
    };

    let disconnected = Arc::new(AtomicBool::new(false));
    let rx = engine::spawn(state.streamer.clone(), engine_request, disconnected);
    let stream = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);

    let mut response = Response::new(Body::from_stream(stream));
    *response.headers_mut() = edge::engine_response_headers(&req.request_id);
    crate::metrics::record_duration(req.dialect.as_str(), endpoint, started_at.elapsed());
    Ok(response)
}

fn endpoint_label(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::OpenAi => "/v1/chat/completions",
        Dialect::Gemini => "/v1/models/{model}:streamGenerateContent",
        Dialect::Claude => "/v1/messages",
    }
}

fn upstream_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
}
