//! Error types for railmind.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RailmindError {
    #[error("Reasoning call timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Knowledge error: {0}")]
    Knowledge(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RailmindError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Provider(msg) => {
                let lower = msg.to_lowercase();
                ["500", "502", "503", "504", "server error", "unavailable", "bad gateway"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RailmindError>;
