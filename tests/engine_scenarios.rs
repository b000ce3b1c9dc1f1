//! End-to-end attempt-loop behavior against an in-process mock upstream,
//! covering the deterministic scenarios from the testable-properties
//! list. Scenarios that require a mid-stream pause (idle-timeout-forces-
//! retry, cross-chunk marker split over a real socket) aren't reachable
//! through httpmock's whole-response mocking and stay covered at the
//! unit level (`engine::tests::test_update_tail_detects_marker_split_across_deltas`).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anti_truncation_proxy::dialect::Dialect;
use anti_truncation_proxy::engine::{self, EngineRequest};
use anti_truncation_proxy::streamer::Streamer;
use bytes::Bytes;
use httpmock::prelude::*;
use reqwest::header::HeaderMap;
use serde_json::json;
use tokio::sync::mpsc;

fn request(url: String) -> EngineRequest {
    EngineRequest {
        dialect: Dialect::OpenAi,
        url,
        headers: HeaderMap::new(),
        original_body: json!({"model": "gpt-4", "messages": [], "stream": true}),
        request_id: "test-request".to_string(),
        marker: "[done]".to_string(),
        max_attempts: 1,
        keepalive_interval: Duration::from_millis(20),
        idle_timeout: Duration::from_millis(80),
    }
}

async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_happy_path_single_attempt() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).body(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\" world[done]\"}}]}\n\n\
             data: [DONE]\n\n",
        );
    });

    let streamer = Arc::new(Streamer::new(5).unwrap());
    let mut req = request(server.url("/v1/chat/completions"));
    req.max_attempts = 3;
    let rx = engine::spawn(streamer, req, Arc::new(AtomicBool::new(false)));

    let output = drain(rx).await;
    mock.assert_hits(1);
    assert!(output.contains("Hello"));
    assert!(output.contains(" world"));
    assert!(!output.contains("[done]"));
    assert!(output.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_early_stop_on_marker_never_reopens_connection() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).body(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok[done]\"}}]}\n\n",
        );
    });

    let streamer = Arc::new(Streamer::new(5).unwrap());
    let mut req = request(server.url("/v1/chat/completions"));
    req.max_attempts = 3;
    let rx = engine::spawn(streamer, req, Arc::new(AtomicBool::new(false)));

    let output = drain(rx).await;
    mock.assert_hits(1);
    assert!(output.contains("ok"));
    assert!(!output.contains("[done]"));
    assert!(output.contains("data: [DONE]"));
}

#[tokio::test]
async fn test_slow_first_chunk_does_not_retry() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .delay(Duration::from_millis(150))
            .body("data: {\"choices\":[{\"delta\":{\"content\":\"hello[done]\"}}]}\n\n");
    });

    let streamer = Arc::new(Streamer::new(5).unwrap());
    let mut req = request(server.url("/v1/chat/completions"));
    req.max_attempts = 3;
    req.idle_timeout = Duration::from_millis(40); // shorter than the delay above
    let rx = engine::spawn(streamer, req, Arc::new(AtomicBool::new(false)));

    let output = drain(rx).await;
    mock.assert_hits(1); // the idle timer never runs before the first byte arrives
    assert!(output.contains("hello"));
    assert!(output.contains("data: [DONE]"));
}

#[tokio::test]
async fn test_upstream_fatal_status_surfaces_as_sse_error_with_no_retry() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(400).body("bad request");
    });

    let streamer = Arc::new(Streamer::new(5).unwrap());
    let mut req = request(server.url("/v1/chat/completions"));
    req.max_attempts = 3;
    let rx = engine::spawn(streamer, req, Arc::new(AtomicBool::new(false)));

    let output = drain(rx).await;
    mock.assert_hits(1);
    assert!(output.contains("\"error\""));
    assert!(output.contains("upstream_error"));
    assert!(output.contains("data: [DONE]"));
}

#[tokio::test]
async fn test_retryable_status_exhausts_after_max_attempts() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(429).body("rate limited");
    });

    let streamer = Arc::new(Streamer::new(5).unwrap());
    let mut req = request(server.url("/v1/chat/completions"));
    req.max_attempts = 1;
    let rx = engine::spawn(streamer, req, Arc::new(AtomicBool::new(false)));

    let output = drain(rx).await;
    mock.assert_hits(1);
    assert!(!output.contains("X-Anti-Truncation-Max-Attempts-Reached"));
    assert!(output.contains("\"error\""));
    assert!(output.contains("upstream_error"));
    assert!(output.contains("429"));
    assert!(output.contains("rate limited"));
    assert!(output.contains("data: [DONE]"));
}
