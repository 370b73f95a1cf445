//! Operations agent - delay impact analysis.
//!
//! Before the reasoning call the agent works out what it can without the
//! model: the train's timetable, trains connecting at the delay location,
//! free platforms there, and a projection of how the delay propagates. The
//! prompt carries all of it and the report keeps the computed parts.

use std::sync::Arc;

use async_trait::async_trait;
use railmind_common::Priority;
use railmind_knowledge::KnowledgeBase;
use railmind_llm::LlmClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AgentError;
use crate::parse::{lenient_strings, parse_reply};
use crate::reasoning::ask;
use crate::schedule::{Connection, ScheduleBook};
use crate::simulation::{
    simulate_cascade, simulate_delay, CascadeSummary, DelayPropagation, DelayedTrain,
};
use crate::traits::{wrong_input, Agent, AgentInput, AgentName, AgentOutput, AgentSettings};

const OPERATIONS_SYSTEM_PROMPT: &str = r#"You are a railway operations analyst for Indian Railways.

For a reported delay, assess:
1. The operational impact on the train and its route
2. Connecting and following trains that will be affected
3. Stations and platforms that need rescheduling
4. Concrete recovery recommendations for the control room

Be specific and conservative. Schedule, connection and propagation sections,
when present, are computed from the timetable; prefer them over assumptions.
Do not invent train numbers you were not given unless they are well-known
connections on the route.

Respond with a single JSON object:
{
  "impact_summary": "two or three sentences",
  "severity": "low" | "medium" | "high" | "critical",
  "affected_connections": ["12007 Shatabdi at Katpadi"],
  "affected_stations": ["Katpadi"],
  "recommendations": ["Hold 12007 for 10 minutes"],
  "estimated_recovery_minutes": 30
}
"#;

#[derive(Debug, Clone, Default)]
pub struct OperationsInput {
    pub train_number: String,
    pub delay_minutes: Option<u64>,
    pub location: Option<String>,
    pub affected_passengers: Option<u64>,
    /// The original request text, for details the structured fields miss
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationsReport {
    pub impact_summary: String,
    /// The model's severity, or the propagation risk tier when it gave none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Priority>,
    pub affected_connections: Vec<String>,
    pub affected_stations: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_recovery_minutes: Option<u64>,
    /// Trains leaving the delay location, from the timetable
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scheduled_connections: Vec<Connection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation: Option<DelayPropagation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeSummary>,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default, alias = "summary", alias = "impact")]
    impact_summary: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default, alias = "connected_trains", deserialize_with = "lenient_strings")]
    affected_connections: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    affected_stations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    recommendations: Vec<String>,
    #[serde(default)]
    estimated_recovery_minutes: Option<u64>,
}

impl RawReport {
    fn validate(self) -> Result<OperationsReport, AgentError> {
        let impact_summary = self
            .impact_summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AgentError::malformed("operations reply is missing impact_summary"))?;

        Ok(OperationsReport {
            impact_summary,
            // An unrecognised severity word is not worth failing the analysis over.
            severity: self.severity.and_then(|s| s.parse().ok()),
            affected_connections: self.affected_connections,
            affected_stations: self.affected_stations,
            recommendations: self.recommendations,
            estimated_recovery_minutes: self.estimated_recovery_minutes,
            ..Default::default()
        })
    }
}

/// What is known about a delay before asking the model.
#[derive(Debug, Default)]
struct Grounding {
    schedule: String,
    connections: Vec<Connection>,
    propagation: Option<DelayPropagation>,
    cascade: Option<CascadeSummary>,
}

impl Grounding {
    fn compute(input: &OperationsInput, book: &ScheduleBook) -> Self {
        let location = input.location.as_deref();
        let schedule = book.describe(&input.train_number, location);
        let connections = location
            .map(|station| book.connections(&input.train_number, station))
            .unwrap_or_default();
        let downstream = match (book.find(&input.train_number), location) {
            (Some(train), Some(station)) => train.stations_after(station),
            _ => Vec::new(),
        };
        let propagation = input
            .delay_minutes
            .map(|minutes| simulate_delay(minutes, &downstream));
        let cascade = input.delay_minutes.zip(input.affected_passengers).map(
            |(delay_minutes, passengers)| {
                simulate_cascade(&[DelayedTrain {
                    train_number: input.train_number.clone(),
                    delay_minutes,
                    passengers,
                }])
            },
        );
        Self {
            schedule,
            connections,
            propagation,
            cascade,
        }
    }

    fn sections(&self) -> String {
        let mut out = String::new();
        if !self.schedule.is_empty() {
            out.push_str(&self.schedule);
            out.push('\n');
        }
        if let Some(ref propagation) = self.propagation {
            out.push_str(&propagation.describe());
            out.push('\n');
        }
        if let Some(ref cascade) = self.cascade {
            out.push_str(&format!("Network stress: {}\n", cascade.stress));
            for missed in &cascade.missed_connections {
                out.push_str(&format!(
                    "About {} passengers of {} are likely to miss onward connections\n",
                    missed.passengers_affected, missed.train_number
                ));
            }
            out.push('\n');
        }
        out
    }
}

/// Analyses the operational impact of a delay.
pub struct OperationsAgent {
    client: Arc<dyn LlmClient>,
    settings: AgentSettings,
    timetables: Option<Arc<KnowledgeBase>>,
}

impl OperationsAgent {
    pub fn new(client: Arc<dyn LlmClient>, settings: AgentSettings) -> Self {
        Self {
            client,
            settings,
            timetables: None,
        }
    }

    pub fn with_default_settings(client: Arc<dyn LlmClient>) -> Self {
        Self::new(client, AgentSettings::for_agent(AgentName::Operations))
    }

    /// Looks schedules up in the knowledge base's timetables on every call,
    /// so a reload is picked up.
    pub fn with_timetables(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.timetables = Some(knowledge);
        self
    }

    fn schedule_book(&self) -> ScheduleBook {
        self.timetables
            .as_deref()
            .map(ScheduleBook::from_knowledge)
            .unwrap_or_default()
    }

    fn build_prompt(input: &OperationsInput, grounding: &Grounding) -> String {
        let unknown = || "unknown".to_string();
        format!(
            "Train number: {}\nDelay: {}\nCurrent location: {}\nAffected passengers: {}\n\n{}Report: {}",
            input.train_number,
            input
                .delay_minutes
                .map(|m| format!("{m} minutes"))
                .unwrap_or_else(unknown),
            input.location.clone().unwrap_or_else(unknown),
            input
                .affected_passengers
                .map(|p| p.to_string())
                .unwrap_or_else(unknown),
            grounding.sections(),
            input.description,
        )
    }

    pub async fn analyse(&self, input: &OperationsInput) -> Result<OperationsReport, AgentError> {
        info!(
            agent = %AgentName::Operations,
            train = %input.train_number,
            delay_minutes = ?input.delay_minutes,
            "Analysing delay impact"
        );
        let grounding = Grounding::compute(input, &self.schedule_book());
        debug!(
            train = %input.train_number,
            has_schedule = !grounding.schedule.is_empty(),
            connections = grounding.connections.len(),
            "Operations grounding computed"
        );
        let reply = ask(
            self.client.as_ref(),
            AgentName::Operations,
            &self.settings,
            self.system_prompt(),
            Self::build_prompt(input, &grounding),
        )
        .await?;

        let mut report = parse_reply::<RawReport>(&reply)?.validate()?;
        if report.severity.is_none() {
            report.severity = grounding.propagation.as_ref().map(|p| p.risk);
        }
        if report.affected_connections.is_empty() {
            report.affected_connections = grounding
                .connections
                .iter()
                .map(|c| format!("{} at {}", c.train_number, c.station))
                .collect();
        }
        report.scheduled_connections = grounding.connections;
        report.propagation = grounding.propagation;
        report.cascade = grounding.cascade;
        Ok(report)
    }
}

#[async_trait]
impl Agent for OperationsAgent {
    fn name(&self) -> AgentName {
        AgentName::Operations
    }

    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .unwrap_or(OPERATIONS_SYSTEM_PROMPT)
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        self.settings.timeout()
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Operations(input) => {
                self.analyse(&input).await.map(AgentOutput::Operations)
            }
            other => Err(wrong_input(AgentName::Operations, &other)),
        }
    }
}
