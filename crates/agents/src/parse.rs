//! Pulling structured JSON out of model replies.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::AgentError;

static FENCED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok());

/// Extracts the JSON object a reply encodes.
///
/// Looks for a fenced code block first, then falls back to the span from
/// the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Result<Map<String, Value>, AgentError> {
    let candidate = FENCED_JSON
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            (end > start).then(|| &text[start..=end])
        })
        .ok_or_else(|| AgentError::malformed(format!("no JSON object in reply: {}", preview(text))))?;

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AgentError::malformed("reply JSON is not an object")),
        Err(e) => Err(AgentError::malformed(format!("invalid JSON in reply: {e}"))),
    }
}

/// Extracts and deserializes the reply into `T`.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let map = extract_json(text)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| AgentError::malformed(format!("reply does not match schema: {e}")))
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(80) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Deserializes a list whose items may be strings or small objects.
///
/// Objects are flattened to their string fields joined by ` - `, which is
/// how models tend to write `{"action": ..., "detail": ...}` items.
pub fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().filter_map(flatten_item).collect(),
        Some(other) => flatten_item(other).into_iter().collect(),
    })
}

fn flatten_item(item: Value) -> Option<String> {
    let text = match item {
        Value::String(s) => s,
        Value::Object(map) => {
            let parts: Vec<String> = map
                .values()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                Value::Object(map).to_string()
            } else {
                parts.join(" - ")
            }
        }
        Value::Null => return None,
        other => other.to_string(),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Deserializes a number that may arrive as a numeric string or with a `%`.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}
