//! Failure of a single agent invocation.

use std::fmt;

use railmind_common::RailmindError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// The invocation exceeded its time budget
    Timeout,
    /// The reasoning provider refused the call for rate reasons
    RateLimited,
    /// The reply could not be parsed into the agent's output shape
    MalformedOutput,
    /// Aborted through the run's cancellation token
    Cancelled,
    Unknown,
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::MalformedOutput => "malformed_output",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::MalformedOutput, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Unknown, message)
    }
}

impl From<RailmindError> for AgentError {
    fn from(err: RailmindError) -> Self {
        let kind = match err {
            RailmindError::Timeout(_) => AgentErrorKind::Timeout,
            RailmindError::RateLimited(_) => AgentErrorKind::RateLimited,
            RailmindError::InvalidResponse(_) | RailmindError::Serialization(_) => {
                AgentErrorKind::MalformedOutput
            }
            _ => AgentErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_kinds() {
        let cases = [
            (RailmindError::Timeout("30s".into()), AgentErrorKind::Timeout),
            (RailmindError::RateLimited("429".into()), AgentErrorKind::RateLimited),
            (
                RailmindError::InvalidResponse("no choices".into()),
                AgentErrorKind::MalformedOutput,
            ),
            (RailmindError::Provider("HTTP 500".into()), AgentErrorKind::Unknown),
        ];
        for (err, kind) in cases {
            assert_eq!(AgentError::from(err).kind, kind);
        }
    }

    #[test]
    fn display_leads_with_kind() {
        let err = AgentError::malformed("missing impact_summary");
        assert_eq!(err.to_string(), "malformed_output: missing impact_summary");
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentErrorKind::RateLimited).unwrap(),
            "\"rate_limited\""
        );
    }
}
