use serde_json::Value;

use super::ParsedChunk;
use crate::error::AppError;

/// Gemini `generateContent`/`streamGenerateContent` SSE: `data: {json}\n\n`,
/// no sentinel terminator. End-of-stream is end-of-connection.
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
        let Ok(data) = serde_json::from_str::<Value>(payload.trim()) else {
            continue;
        };
        let Some(candidates) = data.get("candidates").and_then(Value::as_array) else {
            continue;
        };
        for candidate in candidates {
            let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) else {
                continue;
            };
            for part in parts {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    if !t.is_empty() {
                        out.text.get_or_insert_with(String::new).push_str(t);
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

    let mut rewrote_any = false;
    let mut out_lines: Vec<String> = Vec::new();

    for line in text.split('\n') {
        let trimmed = line.trim_end_matches('\r');
        if let Some(payload) = trimmed.strip_prefix("data: ") {
            if let Ok(mut data) = serde_json::from_str::<Value>(payload.trim()) {
                let mut modified = false;
                if let Some(candidates) = data.get_mut("candidates").and_then(Value::as_array_mut) {
                    for candidate in candidates.iter_mut() {
                        let Some(parts) = candidate
                            .pointer_mut("/content/parts")
                            .and_then(Value::as_array_mut)
                        else {
                            continue;
                        };
                        for part in parts.iter_mut() {
                            let text_val = part
                                .get("text")
                                .and_then(Value::as_str)
                                .map(|s| s.to_string());
                            if let Some(text_val) = text_val {
                                if text_val.contains(marker) {
                                    let replaced = text_val.replace(marker, "");
                                    part["text"] = Value::String(replaced);
                                    modified = true;
                                }
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
        out_lines.push(line.to_string());
    }

    if rewrote_any {
        out_lines.join("\n").into_bytes()
    } else {
        chunk.to_vec()
    }
}

fn invalid_body(what: &str) -> AppError {
    AppError::InvalidRequest(format!("request body {what}"))
}

pub fn inject_completion(body: &Value, marker: &str) -> Result<Value, AppError> {
    let mut body = body.clone();
    let instruction = super::completion_instruction(marker);
    let obj = body.as_object_mut().ok_or_else(|| invalid_body("must be a JSON object"))?;
    let system_instruction = obj
        .entry("systemInstruction")
        .or_insert_with(|| serde_json::json!({}));
    let si_obj = system_instruction
        .as_object_mut()
        .ok_or_else(|| invalid_body("\"systemInstruction\" must be an object"))?;
    let parts = si_obj
        .entry("parts")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| invalid_body("\"systemInstruction.parts\" must be an array"))?;
    parts.insert(0, serde_json::json!({"text": instruction}));
    Ok(body)
}

pub fn inject_continuation(body: &Value, accumulated: &str, prompt: &str) -> Result<Value, AppError> {
    let mut body = body.clone();
    let obj = body.as_object_mut().ok_or_else(|| invalid_body("must be a JSON object"))?;
    let contents = obj
        .entry("contents")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| invalid_body("\"contents\" must be an array"))?;
    contents.push(serde_json::json!({"role": "model", "parts": [{"text": accumulated}]}));
    contents.push(serde_json::json!({"role": "user", "parts": [{"text": prompt}]}));
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_candidate_text() {
        let chunk = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\n\n";
        let parsed = parse_chunk(chunk);
        assert_eq!(parsed.text.as_deref(), Some("Hi"));
        assert!(!parsed.is_done_sentinel);
    }

    #[test]
    fn test_strip_removes_marker_from_parts_text() {
        let chunk = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"done[done]\"}]}}]}\n\n";
        let stripped = strip_marker(chunk, "[done]");
        let text = String::from_utf8(stripped).unwrap();
        assert!(!text.contains("[done]"));
    }

    #[test]
    fn test_inject_completion_creates_system_instruction() {
        let body = serde_json::json!({"contents": []});
        let out = inject_completion(&body, "[done]").unwrap();
        let parts = out["systemInstruction"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_inject_completion_rejects_non_object_body() {
        let body = serde_json::json!("not an object");
        assert!(inject_completion(&body, "[done]").is_err());
    }

    #[test]
    fn test_inject_continuation_appends_model_then_user() {
        let body = serde_json::json!({"contents": []});
        let out = inject_continuation(&body, "partial", "keep going").unwrap();
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[1]["role"], "user");
    }

    #[test]
    fn test_inject_continuation_rejects_non_array_contents() {
        let body = serde_json::json!({"contents": "not an array"});
        assert!(inject_continuation(&body, "partial", "keep going").is_err());
    }
}
