use serde_json::{Map, Value};

/// Best-effort decode of a possibly incomplete JSON arguments buffer.
///
/// Valid JSON is returned as-is. Otherwise the trimmed buffer is wrapped in
/// the missing outer braces and retried once; anything still invalid becomes
/// an empty object.
pub fn parse_partial_json(buffer: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(buffer) {
        return value;
    }

    let trimmed = buffer.trim();
    let mut repaired = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with('{') {
        repaired.push('{');
    }
    repaired.push_str(trimmed);
    if !trimmed.ends_with('}') {
        repaired.push('}');
    }

    serde_json::from_str(&repaired).unwrap_or_else(|_| Value::Object(Map::new()))
}
