use serde_json::Value;

use super::ParsedChunk;
use crate::error::AppError;

/// Claude messages SSE: two-line records, `event: X\ndata: {json}`. Only
/// `content_block_delta` carries text; `message_stop` is forwarded as-is.
pub fn parse_chunk(chunk: &[u8]) -> ParsedChunk {
    let text = String::from_utf8_lossy(chunk);
    let mut out = ParsedChunk::default();
    let mut event_type: Option<&str> = None;
    let mut data_payload: Option<&str> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(ev) = line.strip_prefix("event: ") {
            event_type = Some(ev.trim());
        } else if let Some(data) = line.strip_prefix("data: ") {
            data_payload = Some(data.trim());
        }
    }

    if event_type == Some("content_block_delta") {
        if let Some(payload) = data_payload {
            if let Ok(data) = serde_json::from_str::<Value>(payload) {
                if let Some(t) = data.pointer("/delta/text").and_then(Value::as_str) {
                    if !t.is_empty() {
                        out.text = Some(t.to_string());
                    }
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

    let raw_lines: Vec<&str> = text.split('\n').collect();
    let mut event_type: Option<String> = None;
    let mut data_idx: Option<usize> = None;
    for (i, line) in raw_lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(ev) = trimmed.strip_prefix("event: ") {
            event_type = Some(ev.trim().to_string());
        } else if trimmed.strip_prefix("data: ").is_some() {
            data_idx = Some(i);
        }
    }

    if event_type.as_deref() != Some("content_block_delta") {
        return chunk.to_vec();
    }
    let Some(idx) = data_idx else {
        return chunk.to_vec();
    };
    let payload = raw_lines[idx].trim().strip_prefix("data: ").unwrap_or("").trim();
    let Ok(mut data) = serde_json::from_str::<Value>(payload) else {
        return chunk.to_vec();
    };

    let content = match data.pointer("/delta/text").and_then(Value::as_str) {
        Some(s) if s.contains(marker) => s.to_string(),
        _ => return chunk.to_vec(),
    };
    let replaced = content.replace(marker, "");
    if let Some(v) = data.pointer_mut("/delta/text") {
        *v = Value::String(replaced);
    }

    let mut out_lines: Vec<String> = raw_lines.iter().map(|s| s.to_string()).collect();
    out_lines[idx] = format!(
        "data: {}",
        serde_json::to_string(&data).unwrap_or_else(|_| payload.to_string())
    );
    out_lines.join("\n").into_bytes()
}

fn invalid_body(what: &str) -> AppError {
    AppError::InvalidRequest(format!("request body {what}"))
}

pub fn inject_completion(body: &Value, marker: &str) -> Result<Value, AppError> {
    let mut body = body.clone();
    let instruction = super::completion_instruction(marker);
    let obj = body.as_object_mut().ok_or_else(|| invalid_body("must be a JSON object"))?;

    match obj.get("system").cloned() {
        Some(Value::String(existing)) if !existing.is_empty() => {
            obj.insert(
                "system".to_string(),
                Value::String(format!("{instruction}\n\n{existing}")),
            );
        }
        Some(Value::Array(mut blocks)) => {
            blocks.insert(0, serde_json::json!({"type": "text", "text": instruction}));
            obj.insert("system".to_string(), Value::Array(blocks));
        }
        _ => {
            obj.insert("system".to_string(), Value::String(instruction));
        }
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
    fn test_parse_extracts_content_block_delta_text() {
        let chunk = b"event: content_block_delta\ndata: {\"delta\":{\"text\":\"Hi\"}}\n\n";
        let parsed = parse_chunk(chunk);
        assert_eq!(parsed.text.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_parse_ignores_non_delta_events() {
        let chunk = b"event: message_stop\ndata: {}\n\n";
        let parsed = parse_chunk(chunk);
        assert!(parsed.text.is_none());
    }

    #[test]
    fn test_strip_removes_marker_from_delta_text() {
        let chunk = b"event: content_block_delta\ndata: {\"delta\":{\"text\":\"ok[done]\"}}\n\n";
        let stripped = strip_marker(chunk, "[done]");
        let text = String::from_utf8(stripped).unwrap();
        assert!(!text.contains("[done]"));
        assert!(text.contains("event: content_block_delta"));
    }

    #[test]
    fn test_strip_leaves_non_delta_events_untouched() {
        let chunk = b"event: message_stop\ndata: {}\n\n";
        assert_eq!(strip_marker(chunk, "[done]"), chunk.to_vec());
    }

    #[test]
    fn test_inject_completion_absent_system_sets_string() {
        let body = serde_json::json!({"messages": []});
        let out = inject_completion(&body, "[done]").unwrap();
        assert!(out["system"].is_string());
    }

    #[test]
    fn test_inject_completion_array_system_inserts_block() {
        let body = serde_json::json!({"system": [{"type": "text", "text": "be nice"}]});
        let out = inject_completion(&body, "[done]").unwrap();
        let blocks = out["system"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "text");
    }

    #[test]
    fn test_inject_completion_string_system_prepends() {
        let body = serde_json::json!({"system": "be nice"});
        let out = inject_completion(&body, "[done]").unwrap();
        assert!(out["system"].as_str().unwrap().ends_with("be nice"));
    }

    #[test]
    fn test_inject_completion_rejects_non_object_body() {
        let body = serde_json::json!("not an object");
        assert!(inject_completion(&body, "[done]").is_err());
    }

    #[test]
    fn test_inject_continuation_appends_turn_pair() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
        let out = inject_continuation(&body, "partial text", "continue please").unwrap();
        let messages = out["messages"].as_array().unwrap();
        let last_two = &messages[messages.len() - 2..];
        assert_eq!(last_two[0]["role"], "assistant");
        assert_eq!(last_two[1]["role"], "user");
    }
}
