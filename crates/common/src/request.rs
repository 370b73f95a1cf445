//! Request model for operational queries entering the orchestration graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{RailmindError, Result};

/// Priority classification assigned by the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl FromStr for Priority {
    type Err = RailmindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            other => Err(RailmindError::InvalidResponse(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Outbound notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Push];
}

impl FromStr for Channel {
    type Err = RailmindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            // Mobile app notifications were called "app" in older payloads.
            "push" | "app" => Ok(Self::Push),
            other => Err(RailmindError::InvalidRequest(format!(
                "unknown channel '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Push => "push",
        };
        f.write_str(s)
    }
}

/// Structured, domain-specific context accompanying a request.
///
/// Well-known keys are exposed through typed accessors. Unknown keys are
/// carried through untouched so agents can include them in prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext(Map<String, Value>);

impl RequestContext {
    pub const TRAIN_NUMBER: &'static str = "train_number";
    pub const DELAY_MINUTES: &'static str = "delay_minutes";
    pub const CURRENT_LOCATION: &'static str = "current_location";
    pub const AFFECTED_PASSENGERS: &'static str = "affected_passengers";
    pub const PASSENGER_ID: &'static str = "passenger_id";
    pub const ROUTE: &'static str = "route";
    pub const TIME: &'static str = "time";
    pub const RECIPIENTS: &'static str = "recipients";
    pub const CHANNELS: &'static str = "channels";
    pub const CATEGORY: &'static str = "category";

    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Inserts `value` only when `key` is absent. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: &str, value: Value) -> bool {
        if self.0.contains_key(key) {
            return false;
        }
        self.0.insert(key.to_string(), value);
        true
    }

    /// Reads a key as text, accepting numbers as well as strings.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn unsigned(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn train_number(&self) -> Option<String> {
        self.text(Self::TRAIN_NUMBER)
    }

    pub fn delay_minutes(&self) -> Option<u64> {
        self.unsigned(Self::DELAY_MINUTES)
    }

    pub fn current_location(&self) -> Option<String> {
        self.text(Self::CURRENT_LOCATION)
    }

    pub fn affected_passengers(&self) -> Option<u64> {
        self.unsigned(Self::AFFECTED_PASSENGERS)
    }

    pub fn passenger_id(&self) -> Option<String> {
        self.text(Self::PASSENGER_ID)
    }

    pub fn route(&self) -> Option<String> {
        self.text(Self::ROUTE)
    }

    pub fn time(&self) -> Option<String> {
        self.text(Self::TIME)
    }

    pub fn category(&self) -> Option<String> {
        self.text(Self::CATEGORY)
    }

    pub fn recipients(&self) -> Option<Vec<String>> {
        let items = self.0.get(Self::RECIPIENTS)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    /// Channels requested by the caller. Unknown names are skipped here;
    /// [`RequestContext::validate`] rejects them up front.
    pub fn channels(&self) -> Option<Vec<Channel>> {
        let items = self.0.get(Self::CHANNELS)?.as_array()?;
        let mut channels: Vec<Channel> = items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|s| s.parse().ok())
            .collect();
        channels.sort();
        channels.dedup();
        Some(channels)
    }

    /// Shape validation for the well-known keys.
    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.0.get(Self::TRAIN_NUMBER) {
            if !(v.is_string() || v.is_u64()) {
                return Err(invalid(Self::TRAIN_NUMBER, "a string or non-negative integer"));
            }
        }
        for key in [Self::DELAY_MINUTES, Self::AFFECTED_PASSENGERS] {
            if let Some(v) = self.0.get(key) {
                if !v.is_u64() {
                    return Err(invalid(key, "a non-negative integer"));
                }
            }
        }
        for key in [
            Self::CURRENT_LOCATION,
            Self::PASSENGER_ID,
            Self::ROUTE,
            Self::TIME,
            Self::CATEGORY,
        ] {
            if let Some(v) = self.0.get(key) {
                if !v.is_string() {
                    return Err(invalid(key, "a string"));
                }
            }
        }
        if let Some(v) = self.0.get(Self::RECIPIENTS) {
            let ok = v
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
            if !ok {
                return Err(invalid(Self::RECIPIENTS, "an array of strings"));
            }
        }
        if let Some(v) = self.0.get(Self::CHANNELS) {
            let items = v
                .as_array()
                .ok_or_else(|| invalid(Self::CHANNELS, "an array of channel names"))?;
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| invalid(Self::CHANNELS, "an array of channel names"))?;
                name.parse::<Channel>()?;
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, expected: &str) -> RailmindError {
    RailmindError::InvalidRequest(format!("context field '{key}' must be {expected}"))
}

impl From<Map<String, Value>> for RequestContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A natural-language operational request plus its structured context.
///
/// Constructed through [`Request::new`], which validates eagerly, so any
/// `Request` in hand is well-formed. Immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    text: String,
    context: RequestContext,
}

impl Request {
    pub fn new(text: impl Into<String>, context: impl Into<RequestContext>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RailmindError::InvalidRequest(
                "request text must not be empty".to_string(),
            ));
        }
        let context = context.into();
        context.validate()?;
        Ok(Self { text, context })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}
