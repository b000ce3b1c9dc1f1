//! Per-dialect SSE parsing, marker stripping, and prompt injection (C1/C2).
//!
//! Each dialect implements the same four operations against the wire shape
//! its provider actually uses; the Engine never special-cases a dialect
//! directly, it dispatches through `Dialect`.

pub mod claude;
pub mod gemini;
pub mod openai;

use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    OpenAi,
    Gemini,
    Claude,
}

/// Outcome of parsing one upstream chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Incremental text carried by this chunk, if any.
    pub text: Option<String>,
    /// True only for the OpenAI `data: [DONE]` terminator record.
    pub is_done_sentinel: bool,
}

impl Dialect {
    pub fn parse_chunk(&self, chunk: &[u8]) -> ParsedChunk {
        match self {
            Dialect::OpenAi => openai::parse_chunk(chunk),
            Dialect::Gemini => gemini::parse_chunk(chunk),
            Dialect::Claude => claude::parse_chunk(chunk),
        }
    }

    /// Removes occurrences of `marker` from the chunk's text field and
    /// re-serializes. Defensive: returns the original bytes unchanged on
    /// any parse failure or if the marker is absent.
    pub fn strip_marker(&self, chunk: &[u8], marker: &str) -> Vec<u8> {
        match self {
            Dialect::OpenAi => openai::strip_marker(chunk, marker),
            Dialect::Gemini => gemini::strip_marker(chunk, marker),
            Dialect::Claude => claude::strip_marker(chunk, marker),
        }
    }

    /// Fails with `AppError::InvalidRequest` if `body` isn't shaped the
    /// way this dialect expects (e.g. not a JSON object) — the model name
    /// and streaming flag are validated at the edge, but the rest of the
    /// body is opaque until an injector actually walks it.
    pub fn inject_completion(&self, body: &Value, marker: &str) -> Result<Value, AppError> {
        match self {
            Dialect::OpenAi => openai::inject_completion(body, marker),
            Dialect::Gemini => gemini::inject_completion(body, marker),
            Dialect::Claude => claude::inject_completion(body, marker),
        }
    }

    pub fn inject_continuation(&self, body: &Value, accumulated: &str, prompt: &str) -> Result<Value, AppError> {
        match self {
            Dialect::OpenAi => openai::inject_continuation(body, accumulated, prompt),
            Dialect::Gemini => gemini::inject_continuation(body, accumulated, prompt),
            Dialect::Claude => claude::inject_continuation(body, accumulated, prompt),
        }
    }

    /// Only OpenAI has a `data: [DONE]` end-of-stream sentinel to suppress
    /// and later synthesize.
    pub fn has_done_sentinel(&self) -> bool {
        matches!(self, Dialect::OpenAi)
    }

    /// Drops the dialect's own end-of-stream sentinel record from a chunk
    /// that also carries real content, so the Engine can forward the
    /// content and synthesize its own terminator separately. A no-op for
    /// dialects without a sentinel.
    pub fn strip_done_sentinel(&self, chunk: &[u8]) -> Vec<u8> {
        match self {
            Dialect::OpenAi => openai::strip_done_sentinel(chunk),
            Dialect::Gemini | Dialect::Claude => chunk.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Gemini => "gemini",
            Dialect::Claude => "claude",
        }
    }
}

/// Wording shared by all three dialects for the initial completion-marker
/// instruction. Phrasing is deliberately distinct from the continuation
/// prompt (see `engine::continuation_prompt`).
pub fn completion_instruction(marker: &str) -> String {
    format!(
        "When you have completely finished your response, emit {marker} alone on its own line, \
         with nothing else on that line. This marks your response as complete."
    )
}
