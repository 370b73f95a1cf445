//! Merging agent outputs into the final response.

use railmind_agents::{AgentName, AgentOutput};
use railmind_common::Priority;
use serde::Serialize;

use crate::state::{ErrorEntry, ExecutionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Every dispatched agent succeeded
    Complete,
    /// Some dispatched agents failed
    Degraded,
    /// Every dispatched agent failed, or none could be dispatched
    Failed,
    /// No specialist was needed; the planner answered directly
    Conversational,
}

/// One agent's contribution.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub agent: AgentName,
    pub headline: String,
    pub details: AgentOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResponse {
    pub status: ResponseStatus,
    pub priority: Priority,
    pub summary: String,
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FinalResponse {
    pub fn is_success(&self) -> bool {
        self.status != ResponseStatus::Failed
    }
}

/// Builds the final response from the settled state.
pub fn synthesize(state: &ExecutionState) -> FinalResponse {
    let routing = state.routing.as_ref();
    let priority = routing.map(|r| r.priority).unwrap_or_default();

    let mut notes = Vec::new();
    if let Some(ref reason) = state.routing_fallback {
        notes.push(format!("Routing fell back to passenger assistance: {reason}"));
    }
    if let Some(dropped) = routing.map(|r| &r.dropped).filter(|d| !d.is_empty()) {
        notes.push(format!("Ignored unknown agents: {}", dropped.join(", ")));
    }
    if state.iterations > 1 {
        notes.push(format!("Planned over {} rounds", state.iterations));
    }
    notes.extend(state.notes.iter().cloned());

    let sections: Vec<Section> = state
        .agent_outputs
        .values()
        .map(|output| Section {
            agent: output.source(),
            headline: output.headline(),
            details: output.clone(),
        })
        .collect();
    let errors = state.error_log.clone();

    let dispatched = sections.len() + errors.len();
    let status = if dispatched == 0 {
        if routing.is_some_and(|r| r.conversational) {
            ResponseStatus::Conversational
        } else {
            ResponseStatus::Failed
        }
    } else if errors.is_empty() {
        ResponseStatus::Complete
    } else if sections.is_empty() {
        ResponseStatus::Failed
    } else {
        ResponseStatus::Degraded
    };

    let summary = match status {
        ResponseStatus::Conversational => routing
            .and_then(|r| r.reply.clone())
            .unwrap_or_else(|| "No action is needed for this request.".to_string()),
        _ => summarize(status, priority, &sections, &errors),
    };

    FinalResponse {
        status,
        priority,
        summary,
        sections,
        errors,
        notes,
    }
}

fn summarize(
    status: ResponseStatus,
    priority: Priority,
    sections: &[Section],
    errors: &[ErrorEntry],
) -> String {
    let opening = match status {
        ResponseStatus::Failed if sections.is_empty() && errors.is_empty() => {
            "No agent could handle this request.".to_string()
        }
        ResponseStatus::Failed => {
            "The request could not be completed: every agent failed.".to_string()
        }
        ResponseStatus::Degraded => format!(
            "Partial result at {priority} priority: {} of {} agents responded.",
            sections.len(),
            sections.len() + errors.len()
        ),
        _ => format!("Handled at {priority} priority."),
    };

    let mut lines = vec![opening];
    for section in sections {
        lines.push(format!("- {}: {}", section.agent, section.headline));
    }
    for error in errors {
        lines.push(format!("- {}: unavailable ({})", error.agent, error.kind));
    }
    lines.join("\n")
}
