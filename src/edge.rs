//! Edge Adapter (C5): activation decision, model-prefix stripping,
//! request-id assignment, and the response headers an engine-handled
//! request carries. Client-disconnect is observed downstream of here,
//! in `engine::run`, as a failed send on the SSE channel.

use axum::http::{HeaderMap, HeaderValue};

/// Outcome of evaluating the three activation signals against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationDecision {
    /// Whether the Engine should actually run for this request.
    pub active: bool,
    /// Whether at least one activation signal fired, independent of the
    /// streaming flag. Used to decide whether a rejected non-streaming
    /// request should carry `X-Anti-Truncation-Ignored`.
    pub signalled: bool,
    /// The model name with the activation prefix stripped, if it matched.
    pub model: String,
}

/// Evaluates model-prefix, `X-Anti-Truncation` header, and
/// `anti_truncation=1` query signals. Activation additionally requires
/// `streaming`; a non-streaming request can still be "signalled".
pub fn decide_activation(
    streaming: bool,
    model: &str,
    headers: &HeaderMap,
    query: &str,
    activation_prefix: &str,
) -> ActivationDecision {
    let prefix_match = !activation_prefix.is_empty() && model.starts_with(activation_prefix);
    let header_match = headers
        .get("x-anti-truncation")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let query_match = query_has_anti_truncation_flag(query);
    let signalled = prefix_match || header_match || query_match;

    let model = if prefix_match {
        model[activation_prefix.len()..].to_string()
    } else {
        model.to_string()
    };

    ActivationDecision {
        active: streaming && signalled,
        signalled,
        model,
    }
}

fn query_has_anti_truncation_flag(query: &str) -> bool {
    query.split('&').any(|kv| kv == "anti_truncation=1")
}

/// Client-supplied `X-Request-Id`, or a freshly minted UUID.
pub fn assign_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Response headers for an engine-handled (activated, streaming) request.
pub fn engine_response_headers(request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("text/event-stream"));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("x-anti-truncation", HeaderValue::from_static("enabled"));
    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }
    headers
}

/// Response headers for a non-streaming request that carried an
/// activation signal anyway.
pub fn ignored_response_headers(request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-anti-truncation-ignored",
        HeaderValue::from_static("non-streaming"),
    );
    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }
    headers
}
