//! Per-execution state threaded through the graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use railmind_agents::{AgentError, AgentErrorKind, AgentName, AgentOutput};
use railmind_common::{Request, RequestContext};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::routing::RoutingDecision;
use crate::synthesis::FinalResponse;

/// Graph stages, in the order an execution passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    Planning,
    Dispatch,
    Collecting,
    Synthesizing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Planning => "planning",
            Self::Dispatch => "dispatch",
            Self::Collecting => "collecting",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// One failed invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub agent: AgentName,
    pub kind: AgentErrorKind,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Everything one execution knows. Owned by that execution alone.
#[derive(Debug)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub request: Request,
    /// Request context with fields recovered from the request text
    pub context: RequestContext,
    pub stage: Stage,
    pub stage_history: Vec<Stage>,
    pub routing: Option<RoutingDecision>,
    /// Why the planner's decision was replaced, when it was
    pub routing_fallback: Option<String>,
    pub agent_outputs: BTreeMap<AgentName, AgentOutput>,
    pub error_log: Vec<ErrorEntry>,
    /// Completed planning rounds
    pub iterations: u32,
    pub notes: Vec<String>,
    pub final_response: Option<FinalResponse>,
    started: Instant,
}

impl ExecutionState {
    pub fn new(request: Request, context: RequestContext) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            request,
            context,
            stage: Stage::Start,
            stage_history: vec![Stage::Start],
            routing: None,
            routing_fallback: None,
            agent_outputs: BTreeMap::new(),
            error_log: Vec::new(),
            iterations: 0,
            notes: Vec::new(),
            final_response: None,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, stage: Stage) {
        debug!(
            execution_id = %self.execution_id,
            from = %self.stage,
            to = %stage,
            "Stage transition"
        );
        self.stage = stage;
        self.stage_history.push(stage);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Whether `agent` has already produced an output or an error.
    pub fn has_run(&self, agent: AgentName) -> bool {
        self.agent_outputs.contains_key(&agent) || self.error_log.iter().any(|e| e.agent == agent)
    }

    /// Specialists that ran in this execution, successfully or not.
    pub fn dispatched(&self) -> BTreeSet<AgentName> {
        self.agent_outputs
            .keys()
            .copied()
            .chain(self.error_log.iter().map(|e| e.agent))
            .collect()
    }

    /// Headlines of successful outputs so far, in agent order.
    pub fn findings(&self) -> Vec<String> {
        self.agent_outputs
            .values()
            .map(|output| format!("{}: {}", output.source(), output.headline()))
            .collect()
    }

    /// Records one invocation's result. Each agent gets a single entry per
    /// execution; a second result for the same agent is discarded.
    pub fn record(
        &mut self,
        agent: AgentName,
        result: Result<AgentOutput, AgentError>,
        elapsed_ms: u64,
    ) -> bool {
        if self.has_run(agent) {
            warn!(
                execution_id = %self.execution_id,
                agent = %agent,
                "Discarding second result for agent"
            );
            return false;
        }
        match result {
            Ok(output) => {
                debug!(
                    execution_id = %self.execution_id,
                    agent = %agent,
                    elapsed_ms,
                    "Agent succeeded"
                );
                self.agent_outputs.insert(agent, output);
            }
            Err(error) => {
                warn!(
                    execution_id = %self.execution_id,
                    agent = %agent,
                    kind = %error.kind,
                    error = %error.message,
                    elapsed_ms,
                    "Agent failed"
                );
                self.error_log.push(ErrorEntry {
                    agent,
                    kind: error.kind,
                    message: error.message,
                    elapsed_ms,
                });
            }
        }
        true
    }
}
