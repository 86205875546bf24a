//! Tolerant text extraction from heterogeneous completion payloads.
//!
//! Backends disagree on where the generated text lives. Complete responses
//! are accepted in these shapes:
//!
//! - `{"output": "..."}` or `{"output": {"text": "..."}}`
//! - `{"choices": [{"text": "..."}]}`
//! - `{"choices": [{"message": {"content": "..."}}]}`
//! - `{"generated_text": "..."}`
//!
//! Anything else is a [`ParseError`], which callers turn into a placeholder.

use matilda_core::ParseError;
use serde_json::Value;
use tracing::{trace, warn};

/// Pull the generated text out of a complete response payload.
pub fn extract_text(payload: &Value) -> Result<String, ParseError> {
    let found = match payload.get("output") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(output) => output.get("text").and_then(Value::as_str),
        None => None,
    }
    .or_else(|| {
        let first = payload.get("choices")?.as_array()?.first()?;
        first
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| first.get("message")?.get("content")?.as_str())
    })
    .or_else(|| payload.get("generated_text").and_then(Value::as_str));

    found
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ParseError::new(top_level_keys(payload)))
}

/// [`extract_text`], degrading an unknown shape to its descriptive placeholder.
pub fn extract_text_or_placeholder(payload: &Value) -> String {
    extract_text(payload).unwrap_or_else(|e| {
        warn!(keys = ?e.keys, "Unknown response format");
        e.placeholder()
    })
}

/// Pull the text delta out of one streamed chunk.
///
/// Recognizes `output.text`, `choices[0].text`, `choices[0].delta.content`
/// and `delta.text`. Unrecognized chunks yield `None`.
pub fn extract_fragment(chunk: &Value) -> Option<String> {
    let found = chunk
        .get("output")
        .and_then(|o| o.get("text"))
        .and_then(Value::as_str)
        .or_else(|| {
            let first = chunk.get("choices")?.as_array()?.first()?;
            first
                .get("text")
                .and_then(Value::as_str)
                .or_else(|| first.get("delta")?.get("content")?.as_str())
        })
        .or_else(|| chunk.get("delta")?.get("text")?.as_str());

    if found.is_none() {
        trace!(keys = ?top_level_keys(chunk), "Unknown chunk format");
    }
    found.map(String::from)
}

fn top_level_keys(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}
