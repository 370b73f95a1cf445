//! The orchestration graph.
//!
//! ```text
//! Start ──▶ Planning ──▶ Dispatch ──▶ Collecting ──▶ Synthesizing ──▶ Done
//!              ▲                          │
//!              └──── re-plan (capped) ────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use railmind_agents::{
    Agent, AgentError, AgentInput, AgentName, AgentOutput, AlertAgent, CrowdAgent,
    DryRunGateway, ExecutionHint, NotificationGateway, OperationsAgent, PassengerAgent,
    PlannerAgent, PlannerInput, ReplanContext, RoutePlan,
};
use railmind_common::{RailmindError, Request, Result};
use railmind_knowledge::{KnowledgeBase, LoadReport};
use railmind_llm::{build_llm_client, LlmClient};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{AlertConfig, CoordinatorConfig, GraphConfig};
use crate::extract::{enrich_context, validate_category, InputBuilder};
use crate::routing::RoutingDecision;
use crate::state::{ErrorEntry, ExecutionState, Stage};
use crate::synthesis::{synthesize, FinalResponse};

/// Payload of a run that got past validation.
#[derive(Debug, Clone, Serialize)]
pub struct RunData {
    pub final_response: FinalResponse,
    pub agent_outputs: BTreeMap<AgentName, AgentOutput>,
    pub error_log: Vec<ErrorEntry>,
}

/// Result of [`Orchestrator::run`]. Never an `Err`: validation failures are
/// reported through `error` with no `data`.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RunData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    fn from_state(mut state: ExecutionState) -> Self {
        let final_response = match state.final_response.take() {
            Some(response) => response,
            None => synthesize_late(&state),
        };
        Self {
            success: final_response.is_success(),
            data: Some(RunData {
                final_response,
                agent_outputs: state.agent_outputs,
                error_log: state.error_log,
            }),
            error: None,
        }
    }

    fn rejected(error: RailmindError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

fn synthesize_late(state: &ExecutionState) -> FinalResponse {
    warn!(execution_id = %state.execution_id, "Execution ended without synthesis");
    synthesize(state)
}

/// Result of one guarded invocation.
struct Invocation {
    agent: AgentName,
    result: std::result::Result<AgentOutput, AgentError>,
    elapsed_ms: u64,
}

/// Runs one agent under its time budget, giving up early on cancellation.
///
/// A successful output is then settled outside the budget, so side effects
/// such as alert delivery are never cut off halfway.
async fn invoke_guarded(
    agent: Arc<dyn Agent>,
    input: AgentInput,
    budget: Duration,
    cancel: CancellationToken,
) -> Invocation {
    let name = agent.name();
    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::cancelled("execution cancelled")),
        outcome = tokio::time::timeout(budget, agent.invoke(input)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(format!(
                "no reply within {} ms",
                budget.as_millis()
            ))),
        },
    };
    let result = match result {
        Ok(output) => Ok(agent.settle(output).await),
        Err(e) => Err(e),
    };
    Invocation {
        agent: name,
        result,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Routes requests through the planner and the specialist agents.
///
/// Holds only configuration and shared agents; every execution owns its
/// own [`ExecutionState`], so one orchestrator serves concurrent runs.
pub struct Orchestrator {
    planner: Arc<dyn Agent>,
    specialists: BTreeMap<AgentName, Arc<dyn Agent>>,
    graph: GraphConfig,
    alert: AlertConfig,
}

/// Assembles an [`Orchestrator`] from individual agents.
#[derive(Default)]
pub struct OrchestratorBuilder {
    planner: Option<Arc<dyn Agent>>,
    specialists: BTreeMap<AgentName, Arc<dyn Agent>>,
    graph: GraphConfig,
    alert: AlertConfig,
}

impl OrchestratorBuilder {
    pub fn planner(mut self, planner: Arc<dyn Agent>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Registers a specialist under its own name, replacing any earlier one.
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.specialists.insert(agent.name(), agent);
        self
    }

    pub fn graph(mut self, graph: GraphConfig) -> Self {
        self.graph = graph;
        self
    }

    pub fn alert(mut self, alert: AlertConfig) -> Self {
        self.alert = alert;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.graph.validate()?;
        let planner = self
            .planner
            .ok_or_else(|| RailmindError::Config("orchestrator needs a planner".to_string()))?;
        if planner.name() != AgentName::Planner {
            return Err(RailmindError::Config(format!(
                "{} agent registered as planner",
                planner.name()
            )));
        }
        if let Some(name) = self.specialists.keys().find(|name| !name.is_specialist()) {
            return Err(RailmindError::Config(format!(
                "{name} agent registered as a specialist"
            )));
        }
        Ok(Orchestrator {
            planner,
            specialists: self.specialists,
            graph: self.graph,
            alert: self.alert,
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Builds the LLM client and the knowledge base from `config`, then
    /// wires the standard agents with a dry-run notification gateway.
    pub async fn from_config(config: &CoordinatorConfig) -> Result<(Self, LoadReport)> {
        config.validate()?;
        let client = build_llm_client(&config.llm)?;
        let (knowledge, report) = KnowledgeBase::from_config(&config.knowledge).await?;
        info!(
            passages = report.total_passages(),
            "Knowledge base loaded"
        );
        let orchestrator =
            Self::from_parts(config, client, Arc::new(knowledge), Arc::new(DryRunGateway))?;
        Ok((orchestrator, report))
    }

    /// Wires the standard agents around the given collaborators.
    pub fn from_parts(
        config: &CoordinatorConfig,
        client: Arc<dyn LlmClient>,
        knowledge: Arc<KnowledgeBase>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Result<Self> {
        let settings = |name| config.settings_for(name);
        let default_channels = config.alert.default_channels.iter().copied().collect();

        Self::builder()
            .planner(Arc::new(PlannerAgent::new(
                client.clone(),
                settings(AgentName::Planner),
            )))
            .agent(Arc::new(
                OperationsAgent::new(client.clone(), settings(AgentName::Operations))
                    .with_timetables(knowledge.clone()),
            ))
            .agent(Arc::new(
                CrowdAgent::new(client.clone(), settings(AgentName::Crowd))
                    .with_policy(config.crowd.clone()),
            ))
            .agent(Arc::new(
                PassengerAgent::new(client.clone(), knowledge, settings(AgentName::Passenger))
                    .with_retrieval(
                        config.knowledge.default_top_k,
                        config.knowledge.max_context_chars,
                    ),
            ))
            .agent(Arc::new(
                AlertAgent::new(client, gateway, settings(AgentName::Alert))
                    .with_default_channels(default_channels)
                    .with_delivery_timeout(config.alert.delivery_timeout()),
            ))
            .graph(config.graph.clone())
            .alert(config.alert.clone())
            .build()
    }

    /// Specialists available for dispatch.
    pub fn registered(&self) -> BTreeSet<AgentName> {
        self.specialists.keys().copied().collect()
    }

    fn budget_for(&self, agent: &dyn Agent) -> Duration {
        agent.timeout().unwrap_or_else(|| self.graph.agent_timeout())
    }

    /// Processes one request end to end.
    pub async fn run(&self, request: &str, context: Map<String, Value>) -> RunOutcome {
        self.run_with_cancel(request, context, CancellationToken::new())
            .await
    }

    /// [`Orchestrator::run`] with a token that aborts outstanding agent calls.
    pub async fn run_with_cancel(
        &self,
        request: &str,
        context: Map<String, Value>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        match self.execute(request, context, cancel).await {
            Ok(state) => RunOutcome::from_state(state),
            Err(e) => {
                warn!(error = %e, "Request rejected");
                RunOutcome::rejected(e)
            }
        }
    }

    /// Walks the graph for one request.
    ///
    /// Returns `Err` only when the request or its context is invalid.
    /// Agent failures of any kind end up in the returned state.
    #[instrument(skip(self, context, cancel), fields(request_len = request.len()))]
    pub async fn execute(
        &self,
        request: &str,
        context: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionState> {
        // Start
        let request = Request::new(request, context)?;
        validate_category(request.context())?;
        let context = enrich_context(&request);
        let mut state = ExecutionState::new(request, context);
        info!(
            execution_id = %state.execution_id,
            registered = ?self.registered(),
            "Execution started"
        );

        // Planning
        state.advance(Stage::Planning);
        let mut routing = match self.plan(&state, None, &cancel).await {
            Ok(plan) => RoutingDecision::from_plan(plan, &self.registered(), true),
            Err(e) => {
                warn!(
                    execution_id = %state.execution_id,
                    kind = %e.kind,
                    error = %e.message,
                    "Planner failed, using default route"
                );
                RoutingDecision::fallback(e.to_string())
            }
        };
        if let Some(ref reason) = routing.fallback {
            state.routing_fallback = Some(reason.clone());
        }
        state.routing = Some(routing.clone());

        loop {
            state.advance(Stage::Dispatch);
            let batch: Vec<AgentName> = routing
                .agents
                .iter()
                .copied()
                .filter(|agent| !state.has_run(*agent))
                .collect();
            info!(
                execution_id = %state.execution_id,
                agents = ?batch,
                mode = ?routing.execution_hint,
                priority = %routing.priority,
                "Dispatching"
            );

            state.advance(Stage::Collecting);
            match routing.execution_hint {
                ExecutionHint::Parallel => {
                    self.dispatch_parallel(&mut state, &batch, &cancel).await
                }
                ExecutionHint::Sequential => {
                    self.dispatch_sequential(&mut state, &batch, &cancel).await
                }
            }
            state.iterations += 1;

            if state.iterations >= self.graph.max_iterations
                || routing.complete
                || routing.conversational
                || state.routing_fallback.is_some()
                || cancel.is_cancelled()
            {
                break;
            }

            state.advance(Stage::Planning);
            let previous = self.replan_context(&state);
            let next = match self.plan(&state, Some(previous), &cancel).await {
                Ok(plan) => RoutingDecision::from_plan(plan, &self.registered(), false),
                Err(e) => {
                    warn!(
                        execution_id = %state.execution_id,
                        error = %e,
                        "Re-planning failed, keeping results so far"
                    );
                    state.notes.push(format!("Re-planning stopped: {e}"));
                    break;
                }
            };
            if next.agents.iter().all(|agent| state.has_run(*agent)) {
                break;
            }
            routing = merge_rounds(routing, next);
            state.routing = Some(routing.clone());
        }

        // Synthesizing
        state.advance(Stage::Synthesizing);
        let response = synthesize(&state);
        info!(
            execution_id = %state.execution_id,
            status = ?response.status,
            outputs = state.agent_outputs.len(),
            errors = state.error_log.len(),
            iterations = state.iterations,
            elapsed_ms = state.elapsed_ms(),
            "Execution finished"
        );
        state.final_response = Some(response);

        // Done
        state.advance(Stage::Done);
        Ok(state)
    }

    async fn plan(
        &self,
        state: &ExecutionState,
        previous: Option<ReplanContext>,
        cancel: &CancellationToken,
    ) -> std::result::Result<RoutePlan, AgentError> {
        let input = AgentInput::Planner(PlannerInput {
            request: state.request.clone(),
            available: self.registered().into_iter().collect(),
            previous,
        });
        let budget = self.budget_for(self.planner.as_ref());
        let invocation =
            invoke_guarded(self.planner.clone(), input, budget, cancel.clone()).await;
        match invocation.result? {
            AgentOutput::Planner(plan) => Ok(plan),
            other => Err(AgentError::malformed(format!(
                "planner returned {} output",
                other.source()
            ))),
        }
    }

    fn replan_context(&self, state: &ExecutionState) -> ReplanContext {
        ReplanContext {
            iteration: state.iterations,
            completed: state
                .agent_outputs
                .iter()
                .map(|(agent, output)| (*agent, output.headline()))
                .collect(),
            failed: state
                .error_log
                .iter()
                .map(|entry| (entry.agent, entry.kind.to_string()))
                .collect(),
        }
    }

    fn inputs<'a>(&'a self, state: &'a ExecutionState) -> InputBuilder<'a> {
        InputBuilder {
            request: &state.request,
            context: &state.context,
            priority: state.routing.as_ref().map(|r| r.priority).unwrap_or_default(),
            alert: &self.alert,
        }
    }

    /// Spawns every agent at once and waits for all of them.
    ///
    /// The tasks live in a [`JoinSet`], so dropping the run aborts them.
    /// Results are recorded in agent order whatever order they finish in.
    async fn dispatch_parallel(
        &self,
        state: &mut ExecutionState,
        batch: &[AgentName],
        cancel: &CancellationToken,
    ) {
        let findings = state.findings();
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();
        {
            let inputs = self.inputs(state);
            for &name in batch {
                let (Some(agent), Some(input)) =
                    (self.specialists.get(&name), inputs.build(name, findings.clone()))
                else {
                    continue;
                };
                let budget = self.budget_for(agent.as_ref());
                tasks.spawn(invoke_guarded(agent.clone(), input, budget, cancel.clone()));
                pending.insert(name);
            }
        }

        let mut finished = BTreeMap::new();
        let mut join_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(invocation) => {
                    pending.remove(&invocation.agent);
                    finished.insert(invocation.agent, invocation);
                }
                Err(e) => join_errors.push(e.to_string()),
            }
        }

        for invocation in finished.into_values() {
            state.record(invocation.agent, invocation.result, invocation.elapsed_ms);
        }
        // A task that never returned an invocation panicked or was aborted.
        for name in pending {
            let reason = join_errors.join("; ");
            error!(
                execution_id = %state.execution_id,
                agent = %name,
                error = %reason,
                "Agent task join error"
            );
            state.record(
                name,
                Err(AgentError::unknown(format!("agent task failed: {reason}"))),
                0,
            );
        }
    }

    /// Runs agents one at a time in agent order, briefing each on what the
    /// earlier ones concluded.
    async fn dispatch_sequential(
        &self,
        state: &mut ExecutionState,
        batch: &[AgentName],
        cancel: &CancellationToken,
    ) {
        let mut ordered = batch.to_vec();
        ordered.sort();
        for name in ordered {
            let Some(agent) = self.specialists.get(&name) else {
                continue;
            };
            let Some(input) = self.inputs(state).build(name, state.findings()) else {
                continue;
            };
            let invocation = invoke_guarded(
                agent.clone(),
                input,
                self.budget_for(agent.as_ref()),
                cancel.clone(),
            )
            .await;
            state.record(invocation.agent, invocation.result, invocation.elapsed_ms);
        }
    }
}

/// Routing after a further planning round: the union of agents, the higher
/// priority, and the new round's view of completeness.
fn merge_rounds(current: RoutingDecision, next: RoutingDecision) -> RoutingDecision {
    let mut agents = current.agents;
    agents.extend(next.agents);
    let mut dropped = current.dropped;
    dropped.extend(next.dropped);
    RoutingDecision {
        agents,
        priority: current.priority.max(next.priority),
        execution_hint: next.execution_hint,
        reasoning: next.reasoning,
        reply: current.reply,
        conversational: false,
        dropped,
        fallback: None,
        complete: next.complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railmind_common::Priority;

    fn decision(agents: &[AgentName], priority: Priority) -> RoutingDecision {
        let mut decision = RoutingDecision::fallback("x");
        decision.agents = agents.iter().copied().collect();
        decision.priority = priority;
        decision.fallback = None;
        decision
    }

    #[test]
    fn merge_keeps_union_and_highest_priority() {
        let merged = merge_rounds(
            decision(&[AgentName::Operations], Priority::High),
            decision(&[AgentName::Alert], Priority::Medium),
        );
        assert_eq!(
            merged.agents,
            BTreeSet::from([AgentName::Operations, AgentName::Alert])
        );
        assert_eq!(merged.priority, Priority::High);
    }

    #[test]
    fn builder_requires_planner() {
        assert!(matches!(
            Orchestrator::builder().build(),
            Err(RailmindError::Config(_))
        ));
    }

    #[test]
    fn builder_validates_graph() {
        let graph = GraphConfig {
            agent_timeout_secs: 30,
            max_iterations: 9,
        };
        assert!(Orchestrator::builder().graph(graph).build().is_err());
    }
}
