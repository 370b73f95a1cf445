//! Routing decisions applied by the graph.

use std::collections::BTreeSet;

use railmind_agents::{AgentName, ExecutionHint, RoutePlan};
use railmind_common::Priority;
use serde::Serialize;

/// The agent used when the planner cannot be relied on.
pub const FALLBACK_AGENT: AgentName = AgentName::Passenger;

/// What the graph will dispatch after filtering the planner's choice against
/// the registered agents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub agents: BTreeSet<AgentName>,
    pub priority: Priority,
    pub execution_hint: ExecutionHint,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub conversational: bool,
    /// Names the planner produced that no registered agent answers to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
    /// Set when this decision replaced the planner's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub complete: bool,
}

impl RoutingDecision {
    /// Passenger assistance at medium priority.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            agents: BTreeSet::from([FALLBACK_AGENT]),
            priority: Priority::Medium,
            execution_hint: ExecutionHint::Parallel,
            reasoning: "default route".to_string(),
            reply: None,
            conversational: false,
            dropped: Vec::new(),
            fallback: Some(reason.into()),
            complete: true,
        }
    }

    /// Keeps only agents present in `registered`.
    ///
    /// A first-round plan that ends up with nothing to run and no
    /// conversational reply falls back to the default route.
    pub fn from_plan(plan: RoutePlan, registered: &BTreeSet<AgentName>, first_round: bool) -> Self {
        let mut dropped = plan.unrecognized;
        let mut agents = BTreeSet::new();
        for agent in plan.agents {
            if registered.contains(&agent) {
                agents.insert(agent);
            } else {
                dropped.push(agent.to_string());
            }
        }

        if first_round && agents.is_empty() && !plan.conversational {
            let mut decision = Self::fallback("planner selected no registered agents");
            decision.priority = plan.priority;
            decision.dropped = dropped;
            return decision;
        }

        Self {
            agents,
            priority: plan.priority,
            execution_hint: plan.execution_hint,
            reasoning: plan.reasoning,
            reply: plan.reply,
            conversational: plan.conversational,
            dropped,
            fallback: None,
            complete: plan.complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(agents: &[AgentName], unrecognized: &[&str]) -> RoutePlan {
        RoutePlan {
            agents: agents.iter().copied().collect(),
            unrecognized: unrecognized.iter().map(|s| s.to_string()).collect(),
            priority: Priority::High,
            execution_hint: ExecutionHint::Sequential,
            reasoning: "needs analysis".to_string(),
            reply: None,
            conversational: false,
            complete: true,
        }
    }

    fn all() -> BTreeSet<AgentName> {
        AgentName::SPECIALISTS.into_iter().collect()
    }

    #[test]
    fn fallback_is_passenger_at_medium() {
        let decision = RoutingDecision::fallback("planner timed out");
        assert_eq!(decision.agents, BTreeSet::from([AgentName::Passenger]));
        assert_eq!(decision.priority, Priority::Medium);
        assert_eq!(decision.fallback.as_deref(), Some("planner timed out"));
    }

    #[test]
    fn unregistered_agents_are_dropped() {
        let registered = BTreeSet::from([AgentName::Operations, AgentName::Passenger]);
        let decision = RoutingDecision::from_plan(
            plan(&[AgentName::Operations, AgentName::Crowd], &["weather"]),
            &registered,
            true,
        );
        assert_eq!(decision.agents, BTreeSet::from([AgentName::Operations]));
        assert_eq!(decision.dropped, vec!["weather", "crowd"]);
        assert_eq!(decision.execution_hint, ExecutionHint::Sequential);
        assert!(decision.fallback.is_none());
    }

    #[test]
    fn nothing_runnable_falls_back_on_first_round() {
        let registered = BTreeSet::from([AgentName::Passenger]);
        let decision = RoutingDecision::from_plan(plan(&[AgentName::Crowd], &[]), &registered, true);
        assert_eq!(decision.agents, BTreeSet::from([AgentName::Passenger]));
        assert_eq!(decision.priority, Priority::High);
        assert!(decision.fallback.is_some());
    }

    #[test]
    fn empty_later_round_is_kept_empty() {
        let decision = RoutingDecision::from_plan(plan(&[], &[]), &all(), false);
        assert!(decision.agents.is_empty());
        assert!(decision.fallback.is_none());
    }

    #[test]
    fn conversational_plan_dispatches_nothing() {
        let mut conversational = plan(&[], &[]);
        conversational.conversational = true;
        conversational.reply = Some("Hello".to_string());
        let decision = RoutingDecision::from_plan(conversational, &all(), true);
        assert!(decision.agents.is_empty());
        assert!(decision.conversational);
        assert_eq!(decision.reply.as_deref(), Some("Hello"));
    }
}
