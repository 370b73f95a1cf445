//! Planner agent - routes a request to the specialists that should handle it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use railmind_common::{Priority, Request};
use railmind_llm::LlmClient;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::parse::parse_reply;
use crate::reasoning::ask;
use crate::traits::{wrong_input, Agent, AgentInput, AgentName, AgentOutput, AgentSettings};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are the planning coordinator for a railway operations control room.

Given an operational request and its context, decide which specialist agents must act:
- "operations": delay impact, connecting trains, platform and schedule recommendations
- "crowd": passenger load and congestion prediction for a train or station
- "passenger": answering passenger questions about refunds, policies, timetables and routes
- "alert": composing and sending notifications over sms, email and push

Rules:
1. Select only the agents the request actually needs.
2. Choose "sequential" when a later agent depends on an earlier one's conclusions
   (for example an alert that reports an operations analysis), otherwise "parallel".
3. If the request is small talk or needs no specialist, return an empty agent list,
   set request_type to "conversational" and answer in "reply".

Respond with a single JSON object:
{
  "request_type": "incident" | "query" | "conversational",
  "agents": ["operations", "alert"],
  "priority": "low" | "medium" | "high" | "critical",
  "execution_hint": "parallel" | "sequential",
  "reasoning": "one sentence",
  "reply": "only for conversational requests",
  "complete": true
}
"#;

/// How the selected specialists are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionHint {
    #[default]
    Parallel,
    Sequential,
}

/// Outcome of earlier rounds, given to the planner when it is asked again.
#[derive(Debug, Clone, Default)]
pub struct ReplanContext {
    pub iteration: u32,
    pub completed: Vec<(AgentName, String)>,
    pub failed: Vec<(AgentName, String)>,
}

#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub request: Request,
    /// Specialists registered in the graph
    pub available: Vec<AgentName>,
    pub previous: Option<ReplanContext>,
}

/// Validated routing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub agents: BTreeSet<AgentName>,
    /// Names the model produced that are not specialists
    pub unrecognized: Vec<String>,
    pub priority: Priority,
    pub execution_hint: ExecutionHint,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub conversational: bool,
    /// False when the planner expects another round to be useful
    pub complete: bool,
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default, alias = "agents_to_invoke", alias = "selected_agents")]
    agents: Option<Vec<String>>,
    #[serde(default)]
    subtasks: Vec<RawSubtask>,
    priority: Option<String>,
    #[serde(default, alias = "execution_mode", alias = "executionHint")]
    execution_hint: Option<String>,
    #[serde(default)]
    request_type: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default, alias = "response")]
    reply: Option<String>,
    #[serde(default)]
    complete: Option<bool>,
}

impl RawPlan {
    /// `allow_empty` accepts a plan with no agents, which on a re-planning
    /// round means nothing further is needed.
    fn validate(self, allow_empty: bool) -> Result<RoutePlan, AgentError> {
        let priority = match self.priority.as_deref() {
            Some(p) => p
                .parse::<Priority>()
                .map_err(|e| AgentError::malformed(e.to_string()))?,
            None => return Err(AgentError::malformed("plan is missing priority")),
        };

        let execution_hint = match self.execution_hint.as_deref().map(str::trim) {
            None | Some("") => ExecutionHint::default(),
            Some(h) if h.eq_ignore_ascii_case("parallel") => ExecutionHint::Parallel,
            Some(h) if h.eq_ignore_ascii_case("sequential") => ExecutionHint::Sequential,
            Some(other) => {
                return Err(AgentError::malformed(format!(
                    "unknown execution_hint '{other}'"
                )));
            }
        };

        let names: Vec<String> = match self.agents {
            Some(agents) => agents,
            None => self.subtasks.into_iter().filter_map(|s| s.agent).collect(),
        };

        let mut agents = BTreeSet::new();
        let mut unrecognized = Vec::new();
        for name in names {
            match name.parse::<AgentName>() {
                Ok(agent) if agent.is_specialist() => {
                    agents.insert(agent);
                }
                _ => unrecognized.push(name),
            }
        }

        let reply = self.reply.filter(|r| !r.trim().is_empty());
        let nothing_selected = agents.is_empty() && unrecognized.is_empty();
        let conversational = nothing_selected
            && (reply.is_some()
                || self
                    .request_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("conversational")));

        if nothing_selected && !conversational && !allow_empty {
            return Err(AgentError::malformed(
                "plan selects no agents and is not conversational",
            ));
        }

        Ok(RoutePlan {
            agents,
            unrecognized,
            priority,
            execution_hint,
            reasoning: self.reasoning.unwrap_or_default(),
            reply,
            conversational,
            complete: self.complete.unwrap_or(true),
        })
    }
}

/// Routing authority of the graph.
pub struct PlannerAgent {
    client: Arc<dyn LlmClient>,
    settings: AgentSettings,
}

impl PlannerAgent {
    pub fn new(client: Arc<dyn LlmClient>, settings: AgentSettings) -> Self {
        Self { client, settings }
    }

    pub fn with_default_settings(client: Arc<dyn LlmClient>) -> Self {
        Self::new(client, AgentSettings::for_agent(AgentName::Planner))
    }

    fn build_prompt(input: &PlannerInput) -> String {
        let available: Vec<&str> = input.available.iter().map(AgentName::as_str).collect();
        let context = serde_json::to_string_pretty(input.request.context().as_map())
            .unwrap_or_else(|_| "{}".to_string());

        let mut prompt = format!(
            "Request: {}\n\nContext:\n{}\n\nAvailable agents: {}",
            input.request.text(),
            context,
            available.join(", ")
        );

        if let Some(ref previous) = input.previous {
            prompt.push_str(&format!(
                "\n\nThis is planning round {}. Agents that already ran cannot be selected again.",
                previous.iteration + 1
            ));
            for (agent, headline) in &previous.completed {
                prompt.push_str(&format!("\n- {agent} succeeded: {headline}"));
            }
            for (agent, error) in &previous.failed {
                prompt.push_str(&format!("\n- {agent} failed: {error}"));
            }
            prompt.push_str(
                "\nSelect only additional agents still needed, or none with \"complete\": true.",
            );
        }
        prompt
    }

    /// Asks for and validates a routing decision.
    pub async fn plan(&self, input: &PlannerInput) -> Result<RoutePlan, AgentError> {
        let reply = ask(
            self.client.as_ref(),
            AgentName::Planner,
            &self.settings,
            self.system_prompt(),
            Self::build_prompt(input),
        )
        .await?;

        let plan = parse_reply::<RawPlan>(&reply)?.validate(input.previous.is_some())?;
        if !plan.unrecognized.is_empty() {
            warn!(unrecognized = ?plan.unrecognized, "Planner named unknown agents");
        }
        info!(
            agents = ?plan.agents,
            priority = %plan.priority,
            execution_hint = ?plan.execution_hint,
            conversational = plan.conversational,
            "Routing decision"
        );
        Ok(plan)
    }
}

#[async_trait]
impl Agent for PlannerAgent {
    fn name(&self) -> AgentName {
        AgentName::Planner
    }

    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .unwrap_or(PLANNER_SYSTEM_PROMPT)
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        self.settings.timeout()
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Planner(input) => self.plan(&input).await.map(AgentOutput::Planner),
            other => Err(wrong_input(AgentName::Planner, &other)),
        }
    }
}
