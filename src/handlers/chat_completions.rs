//! `POST /v1/chat/completions` — the OpenAI dialect.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{HeaderMap, Response};
use axum::Json;
use serde_json::Value;

use crate::dialect::Dialect;
use crate::edge;
use crate::error::AppError;
use crate::handlers::{dispatch, AppState, DialectRequest};

pub async fn handle(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(mut body): Json<Value>,
) -> Result<Response<Body>, AppError> {
    let config = state.config.load();

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidRequest("missing \"model\" field".to_string()))?
        .to_string();
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let query = query.unwrap_or_default();

    let decision = edge::decide_activation(
        streaming,
        &model,
        &headers,
        &query,
        &config.anti_truncation.model_prefix,
    );
    let request_id = edge::assign_request_id(&headers);
    tracing::info!(
        request_id = %request_id,
        model = %decision.model,
        streaming,
        active = decision.active,
        "received chat completions request"
    );

    if let Some(model_field) = body.get_mut("model") {
        *model_field = Value::String(decision.model.clone());
    }

    let upstream_url = format!("{}/v1/chat/completions", config.upstreams.openai_base_url);

    dispatch(
        &state,
        DialectRequest {
            dialect: Dialect::OpenAi,
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
