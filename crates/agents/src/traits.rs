//! The agent contract shared by the planner and the specialists.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::alert::{AlertInput, AlertReport};
use crate::crowd::{CrowdForecast, CrowdInput};
use crate::error::AgentError;
use crate::operations::{OperationsInput, OperationsReport};
use crate::passenger::{PassengerAnswer, PassengerInput};
use crate::planner::{PlannerInput, RoutePlan};

/// Identity of an agent in the graph.
///
/// The derived order places the specialists in the order they run when
/// dispatched sequentially: operations, crowd, passenger, alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentName {
    Planner,
    Operations,
    Crowd,
    Passenger,
    Alert,
}

impl AgentName {
    /// Agents the planner may route to.
    pub const SPECIALISTS: [AgentName; 4] = [
        AgentName::Operations,
        AgentName::Crowd,
        AgentName::Passenger,
        AgentName::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Operations => "operations",
            Self::Crowd => "crowd",
            Self::Passenger => "passenger",
            Self::Alert => "alert",
        }
    }

    pub fn is_specialist(&self) -> bool {
        !matches!(self, Self::Planner)
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentName {
    type Err = String;

    /// Accepts bare names and the `<name>_agent` spelling models tend to use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        let base = normalized.strip_suffix("_agent").unwrap_or(&normalized);
        match base {
            "planner" | "planning" => Ok(Self::Planner),
            "operations" | "operation" | "ops" => Ok(Self::Operations),
            "crowd" | "crowd_management" => Ok(Self::Crowd),
            "passenger" | "passenger_assistance" | "customer" => Ok(Self::Passenger),
            "alert" | "alerts" | "notification" | "notifications" => Ok(Self::Alert),
            _ => Err(s.trim().to_string()),
        }
    }
}

/// Reasoning-call tuning for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Replaces the built-in system prompt when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Overrides the graph-wide per-invocation timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AgentSettings {
    /// Defaults per agent. Routing tolerates some creativity; analysis and
    /// notification content should be near-deterministic.
    pub fn for_agent(name: AgentName) -> Self {
        let (temperature, max_tokens) = match name {
            AgentName::Planner => (0.7, 2048),
            AgentName::Operations => (0.3, 1500),
            AgentName::Passenger => (0.5, 1500),
            AgentName::Crowd => (0.4, 1500),
            AgentName::Alert => (0.2, 1024),
        };
        Self {
            system_prompt: None,
            temperature,
            max_tokens,
            timeout_secs: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Typed input, one variant per agent.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Planner(PlannerInput),
    Operations(OperationsInput),
    Passenger(PassengerInput),
    Crowd(CrowdInput),
    Alert(AlertInput),
}

impl AgentInput {
    pub fn target(&self) -> AgentName {
        match self {
            Self::Planner(_) => AgentName::Planner,
            Self::Operations(_) => AgentName::Operations,
            Self::Passenger(_) => AgentName::Passenger,
            Self::Crowd(_) => AgentName::Crowd,
            Self::Alert(_) => AgentName::Alert,
        }
    }
}

/// Typed output, one variant per agent. Serializes as the inner structure.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Planner(RoutePlan),
    Operations(OperationsReport),
    Passenger(PassengerAnswer),
    Crowd(CrowdForecast),
    Alert(AlertReport),
}

impl AgentOutput {
    pub fn source(&self) -> AgentName {
        match self {
            Self::Planner(_) => AgentName::Planner,
            Self::Operations(_) => AgentName::Operations,
            Self::Passenger(_) => AgentName::Passenger,
            Self::Crowd(_) => AgentName::Crowd,
            Self::Alert(_) => AgentName::Alert,
        }
    }

    /// One-line conclusion, used for summaries and to brief later agents.
    pub fn headline(&self) -> String {
        match self {
            Self::Planner(plan) => plan.reasoning.clone(),
            Self::Operations(report) => report.impact_summary.clone(),
            Self::Passenger(answer) => answer.answer.clone(),
            Self::Crowd(forecast) => format!(
                "Predicted occupancy {:.0}% ({} risk)",
                forecast.predicted_occupancy_pct, forecast.risk_level
            ),
            Self::Alert(report) => report.summary(),
        }
    }
}

/// A narrow-purpose wrapper around one reasoning call.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> AgentName;

    /// The system prompt in effect, honouring any configured override.
    fn system_prompt(&self) -> &str;

    /// Per-invocation time budget, when this agent overrides the graph default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Runs one invocation. Issues at most one reasoning call.
    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError>;

    /// Acts on a successful output after the invocation's time budget has
    /// stopped applying. Side effects that must not be cut off halfway, such
    /// as notification delivery, happen here.
    async fn settle(&self, output: AgentOutput) -> AgentOutput {
        output
    }
}

pub(crate) fn wrong_input(agent: AgentName, input: &AgentInput) -> AgentError {
    AgentError::unknown(format!(
        "{agent} agent received input meant for {}",
        input.target()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_order_follows_derived_ord() {
        let mut names = vec![
            AgentName::Alert,
            AgentName::Passenger,
            AgentName::Operations,
            AgentName::Crowd,
        ];
        names.sort();
        assert_eq!(names, AgentName::SPECIALISTS.to_vec());
    }

    #[test]
    fn names_parse_leniently() {
        assert_eq!("Operations_Agent".parse::<AgentName>(), Ok(AgentName::Operations));
        assert_eq!("crowd-management".parse::<AgentName>(), Ok(AgentName::Crowd));
        assert_eq!("notification".parse::<AgentName>(), Ok(AgentName::Alert));
        assert_eq!(
            "weather_agent".parse::<AgentName>(),
            Err("weather_agent".to_string())
        );
    }

    #[test]
    fn default_settings_per_agent() {
        assert_eq!(AgentSettings::for_agent(AgentName::Planner).temperature, 0.7);
        assert_eq!(AgentSettings::for_agent(AgentName::Planner).max_tokens, 2048);
        assert_eq!(AgentSettings::for_agent(AgentName::Operations).temperature, 0.3);
        assert_eq!(AgentSettings::for_agent(AgentName::Alert).temperature, 0.2);
        assert!(AgentSettings::for_agent(AgentName::Crowd).timeout().is_none());
    }

    #[test]
    fn name_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentName::Passenger).unwrap(),
            "\"passenger\""
        );
    }
}
