//! Tolerant extraction of a JSON object from noisy CLI output.
//!
//! Some CLIs interleave log lines with their JSON payload. Two
//! strategies are tried in order:
//!
//! 1. decode the whole (trimmed) text as a JSON object;
//! 2. decode the first brace-delimited span without nested braces that
//!    mentions the wanted key.

use serde_json::{Map, Value};

/// Returns the first JSON object in `text` that has `key` at top level.
pub fn extract_object_with_key(text: &str, key: &str) -> Option<Map<String, Value>> {
    decode_whole(text, key).or_else(|| decode_flat_span(text, key))
}

/// Returns the value of `key` from the first matching object as text.
///
/// Strings come back as-is; numbers and booleans are rendered. Null,
/// arrays and objects yield `None`.
pub fn extract_string_field(text: &str, key: &str) -> Option<String> {
    match extract_object_with_key(text, key)?.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn decode_whole(text: &str, key: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) if map.contains_key(key) => Some(map),
        _ => None,
    }
}

fn decode_flat_span(text: &str, key: &str) -> Option<Map<String, Value>> {
    let quoted_key = format!("\"{key}\"");

    for (start, _) in text.match_indices('{') {
        let rest = &text[start + 1..];
        // Smallest span: stop at the first brace of either kind
        let Some(offset) = rest.find(|c: char| c == '{' || c == '}') else {
            break;
        };
        if rest.as_bytes()[offset] != b'}' {
            continue;
        }
        let candidate = &text[start..start + 1 + offset + 1];
        if !candidate.contains(&quoted_key) {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            if map.contains_key(key) {
                return Some(map);
            }
        }
    }
    None
}
