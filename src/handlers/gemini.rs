//! Gemini dialect: `/v1/models/{model}:generateContent`,
//! `/v1/models/{model}:streamGenerateContent`, and the `/v1beta`
//! equivalents. The model name and the `generateContent` /
//! `streamGenerateContent` action both live in one path segment
//! (`{model}:{action}`), not in the request body.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, RawQuery, State};
use axum::http::{HeaderMap, Response};
use axum::Json;
use serde_json::Value;

use crate::dialect::Dialect;
use crate::edge;
use crate::error::AppError;
use crate::handlers::{dispatch, AppState, DialectRequest};

pub async fn v1(
    state: State<AppState>,
    peer: ConnectInfo<SocketAddr>,
    path: Path<String>,
    headers: HeaderMap,
    query: RawQuery,
    body: Json<Value>,
) -> Result<Response<Body>, AppError> {
    handle("v1", state, peer, path, headers, query, body).await
}

pub async fn v1beta(
    state: State<AppState>,
    peer: ConnectInfo<SocketAddr>,
    path: Path<String>,
    headers: HeaderMap,
    query: RawQuery,
    body: Json<Value>,
) -> Result<Response<Body>, AppError> {
    handle("v1beta", state, peer, path, headers, query, body).await
}

async fn handle(
    version: &str,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> Result<Response<Body>, AppError> {
    let config = state.config.load();

    let (model, action) = model_action.rsplit_once(':').ok_or_else(|| {
        AppError::InvalidRequest(format!(
            "expected \"{{model}}:generateContent\" or \"{{model}}:streamGenerateContent\", got \"{model_action}\""
        ))
    })?;
    let streaming = match action {
        "streamGenerateContent" => true,
        "generateContent" => false,
        other => {
            return Err(AppError::InvalidRequest(format!(
                "unsupported Gemini action \"{other}\""
            )))
        }
    };

    let query = query.unwrap_or_default();
    let decision = edge::decide_activation(
        streaming,
        model,
        &headers,
        &query,
        &config.anti_truncation.model_prefix,
    );
    let request_id = edge::assign_request_id(&headers);
    tracing::info!(
        request_id = %request_id,
        model = %decision.model,
        action,
        streaming,
        active = decision.active,
        "received gemini request"
    );

    let base_url = &config.upstreams.gemini_base_url;
    let mut upstream_url = format!("{base_url}/{version}/models/{}:{action}", decision.model);
    if !query.is_empty() {
        upstream_url.push('?');
        upstream_url.push_str(&query);
    }

    dispatch(
        &state,
        DialectRequest {
            dialect: Dialect::Gemini,
            upstream_url,
            body,
            headers,
            decision,
            request_id,
            peer,
        },
    )
    .await
}
