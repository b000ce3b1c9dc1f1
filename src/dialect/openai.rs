use serde_json::Value;

use super::ParsedChunk;
use crate::error::AppError;

/// OpenAI chat-completions SSE: `data: {json}\n\n`, terminated by a literal
/// `data: [DONE]` record. A chunk may carry more than one record.
pub fn parse_chunk(chunk: &[u8]) -> ParsedChunk {
    let text = String::from_utf8_lossy(chunk);
    let mut out = ParsedChunk::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            out.is_done_sentinel = true;
            continue;
        }
        let Ok(data) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        let Some(choices) = data.get("choices").and_then(Value::as_array) else {
            continue;
        };
        for choice in choices {
            if let Some(content) = choice.pointer("/delta/content").and_then(Value::as_str) {
                if !content.is_empty() {
                    out.text.get_or_insert_with(String::new).push_str(content);
                }
            }
        }
    }

    out
}

pub fn strip_marker(chunk: &[u8], marker: &str) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(chunk) else {
        return chunk.to_vec();
    };
    if !text.contains(marker) {
        return chunk.to_vec();
    }

    let mut rewrote_any = false;
    let mut out_lines: Vec<String> = Vec::new();

    for line in text.split('\n') {
        let trimmed = line.trim_end_matches('\r');
        if let Some(payload) = trimmed.strip_prefix("data: ") {
            let payload = payload.trim();
            if payload != "[DONE]" {
                if let Ok(mut data) = serde_json::from_str::<Value>(payload) {
                    let mut modified = false;
                    if let Some(choices) = data.get_mut("choices").and_then(Value::as_array_mut) {
                        for choice in choices.iter_mut() {
                            let content = choice
                                .pointer("/delta/content")
                                .and_then(Value::as_str)
                                .map(|s| s.to_string());
                            if let Some(content) = content {
                                if content.contains(marker) {
                                    let replaced = content.replace(marker, "");
                                    if let Some(v) = choice.pointer_mut("/delta/content") {
                                        *v = Value::String(replaced);
                                    }
                                    modified = true;
                                }
                            }
                        }
                    }
                    if modified {
                        rewrote_any = true;
                        out_lines.push(format!(
                            "data: {}",
                            serde_json::to_string(&data).unwrap_or_else(|_| payload.to_string())
                        ));
                        continue;
                    }
                }
            }
        }
        out_lines.push(line.to_string());
    }

    if rewrote_any {
        out_lines.join("\n").into_bytes()
    } else {
        chunk.to_vec()
    }
}

/// Drops the `data: [DONE]` record from a chunk, leaving any other records
/// in it untouched. Used when a chunk carries both trailing content and
/// upstream's own terminator, so the Engine can forward the content while
/// still synthesizing its own `[DONE]` at the right point. A chunk whose
/// only record was `[DONE]` strips down to nothing, not a bare newline.
pub fn strip_done_sentinel(chunk: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(chunk) else {
        return chunk.to_vec();
    };
    let out_lines: Vec<&str> = text
        .split('\n')
        .filter(|line| line.trim_end_matches('\r').trim() != "data: [DONE]")
        .collect();
    let joined = out_lines.join("\n");
    if joined.trim().is_empty() {
        Vec::new()
    } else {
        joined.into_bytes()
    }
}

fn invalid_body(what: &str) -> AppError {
    AppError::InvalidRequest(format!("request body {what}"))
}

pub fn inject_completion(body: &Value, marker: &str) -> Result<Value, AppError> {
    let mut body = body.clone();
    let instruction = super::completion_instruction(marker);
    let obj = body.as_object_mut().ok_or_else(|| invalid_body("must be a JSON object"))?;
    let messages = obj
        .entry("messages")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| invalid_body("\"messages\" must be an array"))?;

    let is_system_first = messages
        .first()
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        == Some("system");

    if is_system_first {
        let existing = messages[0]
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        messages[0]["content"] = Value::String(format!("{instruction}\n\n{existing}"));
    } else {
        messages.insert(0, serde_json::json!({"role": "system", "content": instruction}));
    }

    Ok(body)
}

pub fn inject_continuation(body: &Value, accumulated: &str, prompt: &str) -> Result<Value, AppError> {
    let mut body = body.clone();
    let obj = body.as_object_mut().ok_or_else(|| invalid_body("must be a JSON object"))?;
    let messages = obj
        .entry("messages")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| invalid_body("\"messages\" must be an array"))?;
    messages.push(serde_json::json!({"role": "assistant", "content": accumulated}));
    messages.push(serde_json::json!({"role": "user", "content": prompt}));
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_delta_content() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n";
        let parsed = parse_chunk(chunk);
        assert_eq!(parsed.text.as_deref(), Some("Hello"));
        assert!(!parsed.is_done_sentinel);
    }

    #[test]
    fn test_parse_recognizes_done_sentinel() {
        let parsed = parse_chunk(b"data: [DONE]\n\n");
        assert!(parsed.is_done_sentinel);
        assert!(parsed.text.is_none());
    }

    #[test]
    fn test_parse_malformed_json_yields_no_text() {
        let parsed = parse_chunk(b"data: not json\n\n");
        assert!(parsed.text.is_none());
        assert!(!parsed.is_done_sentinel);
    }

    #[test]
    fn test_strip_removes_marker_from_content() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\" world[done]\"}}]}\n\n";
        let stripped = strip_marker(chunk, "[done]");
        let text = String::from_utf8(stripped).unwrap();
        assert!(!text.contains("[done]"));
        assert!(text.contains(" world"));
    }

    #[test]
    fn test_strip_is_idempotent() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"ok[done]\"}}]}\n\n";
        let once = strip_marker(chunk, "[done]");
        let twice = strip_marker(&once, "[done]");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_without_marker_is_byte_identical() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"plain\"}}]}\n\n";
        assert_eq!(strip_marker(chunk, "[done]"), chunk.to_vec());
    }

    #[test]
    fn test_strip_done_sentinel_removes_only_that_record() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let stripped = strip_done_sentinel(chunk);
        let text = String::from_utf8(stripped).unwrap();
        assert!(!text.contains("[DONE]"));
        assert!(text.contains("\"content\":\"hi\""));
    }

    #[test]
    fn test_strip_done_sentinel_standalone_yields_nothing() {
        let chunk = b"data: [DONE]\n\n";
        assert!(strip_done_sentinel(chunk).is_empty());
    }

    #[test]
    fn test_inject_completion_inserts_system_message() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
        let out = inject_completion(&body, "[done]").unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_inject_completion_prepends_existing_system() {
        let body = serde_json::json!({"messages": [{"role": "system", "content": "be nice"}]});
        let out = inject_completion(&body, "[done]").unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["content"].as_str().unwrap().ends_with("be nice"));
    }

    #[test]
    fn test_inject_completion_rejects_non_object_body() {
        let body = serde_json::json!(["not", "an", "object"]);
        assert!(inject_completion(&body, "[done]").is_err());
    }

    #[test]
    fn test_inject_continuation_appends_turn_pair() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
        let out = inject_continuation(&body, "partial text", "continue please").unwrap();
        let messages = out["messages"].as_array().unwrap();
        let last_two = &messages[messages.len() - 2..];
        assert_eq!(last_two[0]["role"], "assistant");
        assert_eq!(last_two[0]["content"], "partial text");
        assert_eq!(last_two[1]["role"], "user");
        assert_eq!(last_two[1]["content"], "continue please");
    }
}
