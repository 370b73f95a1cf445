//! Crowd agent - occupancy and congestion forecasting.
//!
//! The model predicts the load. Confidence is not taken from the model: it
//! is computed from how much observed data backs the forecast and how old
//! that data is, so a guess over no data can never claim certainty.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use railmind_llm::LlmClient;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AgentError;
use crate::parse::{lenient_f64, lenient_strings, parse_reply};
use crate::reasoning::ask;
use crate::traits::{wrong_input, Agent, AgentInput, AgentName, AgentOutput, AgentSettings};

const CROWD_SYSTEM_PROMPT: &str = r#"You are a crowd management analyst for Indian Railways.

Predict the passenger load on the train and at the stations involved, taking
into account the route, the time of day and any delay (delayed trains
accumulate passengers from following services).

Respond with a single JSON object:
{
  "predicted_occupancy_pct": 0 to 200,
  "risk_level": "low" | "moderate" | "severe",
  "hotspots": ["Katpadi platform 2"],
  "recommendations": ["Deploy RPF staff at Katpadi"]
}
"#;

/// Congestion risk derived from predicted occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    Severe,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        };
        f.write_str(s)
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "minimal" | "normal" => Ok(Self::Low),
            "moderate" | "medium" | "elevated" => Ok(Self::Moderate),
            "severe" | "high" | "critical" | "extreme" => Ok(Self::Severe),
            other => Err(other.to_string()),
        }
    }
}

/// Tuning for forecast confidence and risk thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdConfidencePolicy {
    /// Observations at which the volume factor saturates
    pub full_confidence_samples: u64,
    /// Data at least this old contributes no recency
    pub stale_after_minutes: u64,
    pub floor: f64,
    pub ceiling: f64,
    pub moderate_threshold_pct: f64,
    pub severe_threshold_pct: f64,
}

impl Default for CrowdConfidencePolicy {
    fn default() -> Self {
        Self {
            full_confidence_samples: 500,
            stale_after_minutes: 120,
            floor: 0.2,
            ceiling: 0.95,
            moderate_threshold_pct: 75.0,
            severe_threshold_pct: 95.0,
        }
    }
}

impl CrowdConfidencePolicy {
    /// Confidence in `[floor, ceiling]` from data volume and recency.
    ///
    /// Either factor counts as 0.5 when its input is unknown.
    pub fn confidence(&self, sample_count: Option<u64>, data_age_minutes: Option<u64>) -> f64 {
        let volume = match sample_count {
            Some(n) if self.full_confidence_samples > 0 => {
                (n as f64 / self.full_confidence_samples as f64).min(1.0)
            }
            Some(_) => 1.0,
            None => 0.5,
        };
        let recency = match data_age_minutes {
            Some(age) if self.stale_after_minutes > 0 => {
                1.0 - (age as f64 / self.stale_after_minutes as f64).min(1.0)
            }
            Some(_) => 0.0,
            None => 0.5,
        };
        let (floor, ceiling) = if self.floor <= self.ceiling {
            (self.floor, self.ceiling)
        } else {
            (self.ceiling, self.floor)
        };
        let floor = floor.clamp(0.0, 1.0);
        let ceiling = ceiling.clamp(0.0, 1.0);
        floor + (ceiling - floor) * (0.6 * volume + 0.4 * recency)
    }

    pub fn risk_for(&self, occupancy_pct: f64) -> RiskLevel {
        if occupancy_pct >= self.severe_threshold_pct {
            RiskLevel::Severe
        } else if occupancy_pct >= self.moderate_threshold_pct {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Seat bookings for the train, when the caller has them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookingSnapshot {
    pub capacity: u64,
    pub booked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist: Option<u64>,
}

impl BookingSnapshot {
    /// `None` for a zero capacity.
    pub fn new(capacity: u64, booked: u64, waitlist: Option<u64>) -> Option<Self> {
        (capacity > 0).then_some(Self {
            capacity,
            booked,
            waitlist,
        })
    }

    /// Booked seats as a percentage of capacity; above 100 when overbooked.
    pub fn occupancy_pct(&self) -> f64 {
        self.booked as f64 / self.capacity as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrowdInput {
    pub train_number: Option<String>,
    pub route: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub affected_passengers: Option<u64>,
    pub delay_minutes: Option<u64>,
    /// Observations behind the forecast, when the caller knows
    pub sample_count: Option<u64>,
    /// Age of the newest observation
    pub data_age_minutes: Option<u64>,
    pub booking: Option<BookingSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdForecast {
    pub predicted_occupancy_pct: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hotspots: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawForecast {
    #[serde(
        default,
        alias = "capacity_utilization",
        alias = "occupancy_pct",
        alias = "predicted_occupancy",
        deserialize_with = "lenient_f64"
    )]
    predicted_occupancy_pct: Option<f64>,
    #[serde(default, alias = "overall_risk", alias = "risk")]
    risk_level: Option<String>,
    #[serde(default, alias = "congestion_points", deserialize_with = "lenient_strings")]
    hotspots: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    recommendations: Vec<String>,
}

/// Forecasts crowding for a train, route or station.
pub struct CrowdAgent {
    client: Arc<dyn LlmClient>,
    settings: AgentSettings,
    policy: CrowdConfidencePolicy,
}

impl CrowdAgent {
    pub fn new(client: Arc<dyn LlmClient>, settings: AgentSettings) -> Self {
        Self {
            client,
            settings,
            policy: CrowdConfidencePolicy::default(),
        }
    }

    pub fn with_default_settings(client: Arc<dyn LlmClient>) -> Self {
        Self::new(client, AgentSettings::for_agent(AgentName::Crowd))
    }

    pub fn with_policy(mut self, policy: CrowdConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn build_prompt(input: &CrowdInput) -> String {
        let mut lines = Vec::new();
        if let Some(ref train) = input.train_number {
            lines.push(format!("Train number: {train}"));
        }
        if let Some(ref route) = input.route {
            lines.push(format!("Route: {route}"));
        }
        if let Some(ref location) = input.location {
            lines.push(format!("Location: {location}"));
        }
        if let Some(ref time) = input.time {
            lines.push(format!("Time: {time}"));
        }
        if let Some(delay) = input.delay_minutes {
            lines.push(format!("Current delay: {delay} minutes"));
        }
        if let Some(passengers) = input.affected_passengers {
            lines.push(format!("Passengers on board or waiting: {passengers}"));
        }
        if let Some(booking) = input.booking {
            let mut line = format!(
                "Bookings: {} of {} seats ({:.0}% occupancy)",
                booking.booked,
                booking.capacity,
                booking.occupancy_pct()
            );
            if let Some(waitlist) = booking.waitlist {
                line.push_str(&format!(", {waitlist} waitlisted"));
            }
            lines.push(line);
        }
        if lines.is_empty() {
            lines.push("No train, route or station was given. Forecast for a typical service.".to_string());
        }
        lines.join("\n")
    }

    pub async fn forecast(&self, input: &CrowdInput) -> Result<CrowdForecast, AgentError> {
        let reply = ask(
            self.client.as_ref(),
            AgentName::Crowd,
            &self.settings,
            self.system_prompt(),
            Self::build_prompt(input),
        )
        .await?;

        let raw: RawForecast = parse_reply(&reply)?;
        // Without a usable prediction the booked occupancy stands in.
        let predicted_occupancy_pct = raw
            .predicted_occupancy_pct
            .filter(|p| p.is_finite() && *p >= 0.0)
            .or_else(|| input.booking.map(|b| b.occupancy_pct()))
            .ok_or_else(|| AgentError::malformed("crowd reply is missing predicted occupancy"))?;

        let risk_level = raw
            .risk_level
            .and_then(|r| r.parse().ok())
            .unwrap_or_else(|| self.policy.risk_for(predicted_occupancy_pct));
        let confidence = self
            .policy
            .confidence(input.sample_count, input.data_age_minutes);

        info!(
            agent = %AgentName::Crowd,
            occupancy_pct = predicted_occupancy_pct,
            risk = %risk_level,
            confidence,
            "Crowd forecast"
        );

        Ok(CrowdForecast {
            predicted_occupancy_pct,
            risk_level,
            confidence,
            hotspots: raw.hotspots,
            recommendations: raw.recommendations,
        })
    }
}

#[async_trait]
impl Agent for CrowdAgent {
    fn name(&self) -> AgentName {
        AgentName::Crowd
    }

    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .unwrap_or(CROWD_SYSTEM_PROMPT)
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        self.settings.timeout()
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Crowd(input) => self.forecast(&input).await.map(AgentOutput::Crowd),
            other => Err(wrong_input(AgentName::Crowd, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentErrorKind;
    use railmind_llm::ScriptedClient;

    fn agent(reply: &str) -> CrowdAgent {
        CrowdAgent::with_default_settings(Arc::new(ScriptedClient::replying(reply)))
    }

    #[test]
    fn confidence_stays_within_bounds() {
        let policy = CrowdConfidencePolicy::default();
        let best = policy.confidence(Some(10_000), Some(0));
        let worst = policy.confidence(Some(0), Some(10_000));
        assert!((best - 0.95).abs() < 1e-9);
        assert!((worst - 0.2).abs() < 1e-9);
        let unknown = policy.confidence(None, None);
        assert!(unknown > worst && unknown < best);
    }

    #[test]
    fn confidence_grows_with_data_and_freshness() {
        let policy = CrowdConfidencePolicy::default();
        assert!(policy.confidence(Some(400), Some(10)) > policy.confidence(Some(50), Some(10)));
        assert!(policy.confidence(Some(400), Some(10)) > policy.confidence(Some(400), Some(90)));
    }

    #[test]
    fn risk_thresholds() {
        let policy = CrowdConfidencePolicy::default();
        assert_eq!(policy.risk_for(40.0), RiskLevel::Low);
        assert_eq!(policy.risk_for(75.0), RiskLevel::Moderate);
        assert_eq!(policy.risk_for(120.0), RiskLevel::Severe);
    }

    #[tokio::test]
    async fn model_confidence_is_ignored() {
        let forecast = agent(r#"{"predicted_occupancy_pct": "118%", "confidence": 0.99}"#)
            .forecast(&CrowdInput {
                train_number: Some("12627".to_string()),
                sample_count: Some(0),
                data_age_minutes: Some(600),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!((forecast.predicted_occupancy_pct - 118.0).abs() < 1e-9);
        assert_eq!(forecast.risk_level, RiskLevel::Severe);
        assert!((forecast.confidence - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn accepts_aliased_fields() {
        let forecast = agent(
            r#"{"capacity_utilization": 82, "overall_risk": "HIGH",
                "congestion_points": [{"station": "Katpadi", "platform": "2"}]}"#,
        )
        .forecast(&CrowdInput::default())
        .await
        .unwrap();
        assert_eq!(forecast.risk_level, RiskLevel::Severe);
        assert_eq!(forecast.hotspots, vec!["2 - Katpadi"]);
    }

    #[tokio::test]
    async fn missing_occupancy_is_malformed() {
        let err = agent(r#"{"risk_level": "low"}"#)
            .forecast(&CrowdInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn booked_occupancy_backs_a_missing_prediction() {
        let input = CrowdInput {
            train_number: Some("12627".to_string()),
            booking: BookingSnapshot::new(1000, 920, Some(40)),
            ..Default::default()
        };
        let prompt = CrowdAgent::build_prompt(&input);
        assert!(prompt.contains("Bookings: 920 of 1000 seats (92% occupancy), 40 waitlisted"));

        let forecast = agent(r#"{"risk_level": "moderate"}"#)
            .forecast(&input)
            .await
            .unwrap();
        assert!((forecast.predicted_occupancy_pct - 92.0).abs() < 1e-9);
        assert_eq!(forecast.risk_level, RiskLevel::Moderate);
    }

    #[test]
    fn zero_capacity_is_no_snapshot() {
        assert_eq!(BookingSnapshot::new(0, 10, None), None);
        let overbooked = BookingSnapshot::new(1000, 1100, None).unwrap();
        assert!((overbooked.occupancy_pct() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn prompt_without_fields_asks_for_typical_service() {
        assert!(CrowdAgent::build_prompt(&CrowdInput::default()).contains("typical service"));
    }
}
