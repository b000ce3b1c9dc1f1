//! Anti-Truncation Engine (C4): the attempt loop that turns a possibly
//! truncated upstream SSE stream into one logically-complete stream.
//!
//! Grounded on the retry/keepalive/idle-timeout state machine of the
//! source streaming processor this proxy replaces; re-expressed here as
//! a single cooperative task per request rather than an async generator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dialect::Dialect;
use crate::error::{self, AppError};
use crate::streamer::{BoxByteStream, Streamer};

/// Everything the Engine needs for one downstream request. Built once by
/// the Edge Adapter and read-only from here on.
pub struct EngineRequest {
    pub dialect: Dialect,
    pub url: String,
    pub headers: HeaderMap,
    pub original_body: Value,
    pub request_id: String,
    pub marker: String,
    pub max_attempts: u32,
    pub keepalive_interval: Duration,
    pub idle_timeout: Duration,
}

/// Flipped by the Edge Adapter (or by a failed downstream send observed
/// in here) the moment the client goes away. Monotonic false -> true.
pub type DisconnectSignal = Arc<AtomicBool>;

/// Spawns the attempt loop and returns the receiving end of the channel
/// it writes SSE-framed bytes to. The channel closing (all senders
/// dropped) is how a caller tears the engine down early; a failed send
/// from inside the loop is how the engine notices the caller went away.
pub fn spawn(
    streamer: Arc<Streamer>,
    request: EngineRequest,
    disconnected: DisconnectSignal,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        run(streamer, request, disconnected, tx).await;
    });
    rx
}

type ReadTask = JoinHandle<(Option<reqwest::Result<Bytes>>, BoxByteStream)>;

enum WaitOutcome {
    Chunk(Option<reqwest::Result<Bytes>>, BoxByteStream),
    IdleTimeout,
    ClientGone,
}

async fn run(
    streamer: Arc<Streamer>,
    request: EngineRequest,
    disconnected: DisconnectSignal,
    tx: mpsc::Sender<Bytes>,
) {
    let mut accumulated = String::new();
    let mut tail = String::new();
    let mut marker_found = false;
    let mut attempt: u32 = 0;
    let mut last_error: Option<AppError> = None;

    loop {
        if disconnected.load(Ordering::Relaxed) {
            return;
        }

        if attempt >= request.max_attempts {
            crate::metrics::record_exhausted(request.dialect.as_str());
            match last_error {
                Some(err) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt,
                        error = %err,
                        "anti-truncation attempts exhausted after a retryable upstream failure"
                    );
                    send_error_event(&tx, &request, &err, attempt).await;
                }
                None => {
                    tracing::info!(
                        request_id = %request.request_id,
                        attempt,
                        "anti-truncation attempts exhausted without the marker"
                    );
                    let _ = tx
                        .send(Bytes::from_static(
                            b": X-Anti-Truncation-Max-Attempts-Reached\n\n",
                        ))
                        .await;
                    if request.dialect.has_done_sentinel() {
                        send_done(&tx).await;
                    }
                }
            }
            return;
        }
        attempt += 1;
        crate::metrics::record_attempt(request.dialect.as_str());
        tracing::debug!(request_id = %request.request_id, attempt, "opening anti-truncation attempt");

        let body = if attempt == 1 {
            request
                .dialect
                .inject_completion(&request.original_body, &request.marker)
        } else {
            let prompt = continuation_prompt(&accumulated, &request.marker, attempt);
            request
                .dialect
                .inject_continuation(&request.original_body, &accumulated, &prompt)
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(request_id = %request.request_id, attempt, error = %err, "request body rejected by injector");
                send_error_event(&tx, &request, &err, attempt).await;
                return;
            }
        };

        let mut stream = match streamer
            .open(&request.url, request.headers.clone(), &body)
            .await
        {
            Ok(stream) => {
                last_error = None;
                Some(stream)
            }
            Err(err) => {
                if crate::retry::is_retryable(&err) {
                    tracing::warn!(request_id = %request.request_id, attempt, error = %err, "upstream open failed, retrying");
                    crate::metrics::record_retry(request.dialect.as_str(), "open_failed");
                    last_error = Some(err);
                    continue;
                }
                tracing::warn!(request_id = %request.request_id, attempt, error = %err, "upstream open failed fatally");
                send_error_event(&tx, &request, &err, attempt).await;
                return;
            }
        };

        let mut received_any = false;
        let mut last_chunk_at = Instant::now();

        'read: loop {
            if disconnected.load(Ordering::Relaxed) {
                return;
            }

            let owned_stream = stream.take().expect("read loop owns the stream");
            let handle: ReadTask = tokio::spawn(async move {
                let mut owned_stream = owned_stream;
                let item = owned_stream.next().await;
                (item, owned_stream)
            });

            let outcome = wait_for_chunk(
                handle,
                &tx,
                request.keepalive_interval,
                request.idle_timeout,
                received_any,
                last_chunk_at,
            )
            .await;

            match outcome {
                WaitOutcome::ClientGone => {
                    tracing::debug!(request_id = %request.request_id, attempt, "client disconnected mid-stream");
                    disconnected.store(true, Ordering::Relaxed);
                    return;
                }
                WaitOutcome::IdleTimeout => {
                    // Idle too long after at least one chunk arrived: drop
                    // this attempt's connection and retry from the top.
                    tracing::warn!(request_id = %request.request_id, attempt, "upstream idle timeout, retrying");
                    crate::metrics::record_retry(request.dialect.as_str(), "idle_timeout");
                    last_error = Some(AppError::EngineFatal("upstream idle timeout".to_string()));
                    break 'read;
                }
                WaitOutcome::Chunk(item, returned_stream) => {
                    stream = Some(returned_stream);
                    match item {
                        None => break 'read, // upstream EOF, no marker seen yet
                        Some(Ok(bytes)) => {
                            received_any = true;
                            last_chunk_at = Instant::now();

                            let parsed = request.dialect.parse_chunk(&bytes);
                            // The Engine synthesizes its own terminator; upstream's
                            // own sentinel is dropped below rather than forwarded,
                            // but a chunk carrying both it and trailing content
                            // still has that content forwarded first.
                            let saw_done_sentinel =
                                request.dialect.has_done_sentinel() && parsed.is_done_sentinel;

                            if let Some(text) = parsed.text.as_deref() {
                                accumulated.push_str(text);
                                let (found, new_tail) =
                                    update_tail(&tail, text, &request.marker);
                                if found {
                                    marker_found = true;
                                } else {
                                    tail = new_tail;
                                }
                            }

                            let stripped = request.dialect.strip_marker(&bytes, &request.marker);
                            let stripped = if saw_done_sentinel {
                                request.dialect.strip_done_sentinel(&stripped)
                            } else {
                                stripped
                            };
                            if !stripped.is_empty()
                                && tx.send(Bytes::from(stripped)).await.is_err()
                            {
                                disconnected.store(true, Ordering::Relaxed);
                                return;
                            }

                            if saw_done_sentinel || marker_found {
                                tracing::debug!(
                                    request_id = %request.request_id,
                                    attempt,
                                    marker_found,
                                    saw_done_sentinel,
                                    "attempt ended"
                                );
                                break 'read;
                            }
                        }
                        Some(Err(transport_err)) => {
                            // Every transport failure mid-stream retries
                            // while attempt budget remains; exhaustion is
                            // handled uniformly at the top of the outer loop.
                            tracing::warn!(request_id = %request.request_id, attempt, error = %transport_err, "transport error mid-stream, retrying");
                            crate::metrics::record_retry(request.dialect.as_str(), "transport_error");
                            last_error = Some(AppError::from(transport_err));
                            break 'read;
                        }
                    }
                }
            }
        }

        if marker_found {
            tracing::info!(request_id = %request.request_id, attempt, "anti-truncation completed via marker");
            crate::metrics::record_marker_found(request.dialect.as_str());
            if request.dialect.has_done_sentinel() {
                send_done(&tx).await;
            }
            return;
        }
    }
}

/// Waits for the outstanding read task to finish, emitting keepalive
/// comments on the configured cadence and enforcing the idle timeout.
/// Never cancels the read task itself except when the caller decides to
/// retry (idle timeout) or give up (client gone) — the task is handed
/// back on every other path so the caller can keep polling it.
async fn wait_for_chunk(
    mut handle: ReadTask,
    tx: &mpsc::Sender<Bytes>,
    keepalive_interval: Duration,
    idle_timeout: Duration,
    received_any: bool,
    last_chunk_at: Instant,
) -> WaitOutcome {
    loop {
        let idle_deadline = (!idle_timeout.is_zero() && received_any)
            .then(|| idle_timeout.saturating_sub(last_chunk_at.elapsed()));

        let tick = match (keepalive_interval.is_zero(), idle_deadline) {
            (true, None) => None,
            (true, Some(remaining)) => Some(remaining),
            (false, None) => Some(keepalive_interval),
            (false, Some(remaining)) => Some(keepalive_interval.min(remaining)),
        };

        let Some(tick) = tick else {
            let (item, stream) = (&mut handle).await.expect("chunk-fetch task panicked");
            return WaitOutcome::Chunk(item, stream);
        };

        tokio::select! {
            res = &mut handle => {
                let (item, stream) = res.expect("chunk-fetch task panicked");
                return WaitOutcome::Chunk(item, stream);
            }
            _ = tokio::time::sleep(tick) => {
                if idle_deadline.is_some_and(|remaining| remaining <= tick) {
                    handle.abort();
                    return WaitOutcome::IdleTimeout;
                }
                if tx.send(Bytes::from_static(b": keepalive\n\n")).await.is_err() {
                    handle.abort();
                    return WaitOutcome::ClientGone;
                }
            }
        }
    }
}

/// Cross-chunk-safe marker detection. `tail` holds at most
/// `len(marker) - 1` characters carried over from the previous delta.
fn update_tail(tail: &str, delta: &str, marker: &str) -> (bool, String) {
    let combined = format!("{tail}{delta}");
    if combined.contains(marker) {
        return (true, tail.to_string());
    }
    let max_chars = marker.chars().count().saturating_sub(1);
    let total = combined.chars().count();
    let skip = total.saturating_sub(max_chars);
    (false, combined.chars().skip(skip).collect())
}

async fn send_done(tx: &mpsc::Sender<Bytes>) {
    let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;
}

async fn send_error_event(tx: &mpsc::Sender<Bytes>, request: &EngineRequest, err: &AppError, attempt: u32) {
    let status_code = match err {
        AppError::UpstreamStatus { status, .. } => Some(status.as_u16()),
        _ => None,
    };
    let payload = json!({
        "error": error::error_type_name(err),
        "message": err.to_string(),
        "status_code": status_code,
        "attempt": attempt,
        "request_id": request.request_id,
    });
    let _ = tx
        .send(Bytes::from(format!("data: {payload}\n\n")))
        .await;
    if request.dialect.has_done_sentinel() {
        send_done(tx).await;
    }
}

/// Wording for the retry turn injected before each continuation attempt.
/// References the accumulated character count and the tail of what was
/// already emitted, so the model resumes instead of repeating itself.
pub fn continuation_prompt(accumulated: &str, marker: &str, attempt: u32) -> String {
    let char_count = accumulated.chars().count();
    let tail_len = 100usize;
    let total = accumulated.chars().count();
    let skip = total.saturating_sub(tail_len);
    let tail: String = accumulated.chars().skip(skip).collect();

    format!(
        "Your previous response was cut off after {char_count} characters (attempt {attempt}). \
         It ended with: \"...{tail}\"\n\n\
         Continue your response exactly from where it left off. Do not repeat any of the \
         content above. When you have completely finished, emit {marker} alone on its own \
         line, with nothing else on that line."
    )
}
