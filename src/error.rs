use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application error taxonomy. Maps to the categories in the error
/// handling design: invalid requests are rejected before any stream
/// begins; upstream/transport errors ride the retry loop (see
/// `retry::is_retryable`) or are surfaced in-band over SSE once a
/// stream is already open.
#[derive(Debug)]
pub enum AppError {
    /// Request body did not parse, or activation preconditions failed.
    InvalidRequest(String),
    /// Upstream responded with a non-2xx status.
    UpstreamStatus { status: StatusCode, message: String },
    /// Transport-level failure talking to upstream (reset, DNS, timeout).
    UpstreamTransport(reqwest::Error),
    /// Unexpected parser/injector/serialization failure inside the engine.
    EngineFatal(String),
    /// Anything else.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Self::UpstreamStatus { status, message } => {
                write!(f, "upstream error ({}): {}", status, message)
            }
            Self::UpstreamTransport(err) => write!(f, "upstream transport error: {}", err),
            Self::EngineFatal(msg) => write!(f, "engine error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::UpstreamStatus { status, message } => (*status, message.clone()),
            Self::UpstreamTransport(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
            Self::EngineFatal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

pub(crate) fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::InvalidRequest(_) => "invalid_request",
        AppError::UpstreamStatus { .. } => "upstream_error",
        AppError::UpstreamTransport(_) => "upstream_transport_error",
        AppError::EngineFatal(_) => "engine_error",
        AppError::Internal(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamTransport(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::EngineFatal(format!("JSON error: {}", err))
    }
}
