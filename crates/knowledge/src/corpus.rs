//! Splitting category sources into passages.
//!
//! Structured sources (`.json`) are an array of records, one passage per
//! record. Everything else is plain text with passages separated by blank
//! lines.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("source not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed source {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Reads `path` and returns its passages in source order.
pub async fn read_passages(path: &Path) -> Result<Vec<String>, CorpusError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CorpusError::Missing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(CorpusError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        split_records(&raw).map_err(|reason| CorpusError::Malformed {
            path: path.to_path_buf(),
            reason,
        })
    } else {
        Ok(split_paragraphs(&raw))
    }
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
pub fn split_paragraphs(raw: &str) -> Vec<String> {
    let normalized = raw.replace("\r\n", "\n");
    let mut passages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                passages.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        passages.push(current.join("\n"));
    }
    passages
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// One passage per array element: its `content` field when it has one,
/// otherwise the element rendered as compact JSON.
pub fn split_records(raw: &str) -> Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("records")) {
            Some(Value::Array(items)) => items,
            _ => return Err("expected a JSON array of records".to_string()),
        },
        _ => return Err("expected a JSON array of records".to_string()),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Object(ref map) => match map.get("content") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => Some(item.to_string()),
            },
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}
