//! Orchestration graph for railmind.
//!
//! The coordinator is the central brain that:
//! 1. Validates a request and recovers missing context from its text
//! 2. Asks the planner which specialists should act, at what priority
//! 3. Dispatches them in parallel or in agent order, each under a time budget
//! 4. Collects outputs and failures and synthesizes one response
//!
//! # Architecture
//!
//! ```text
//! Request + context
//!      │
//!      ▼
//! ┌─────────────────┐
//! │  Orchestrator   │  ◄── Planner (routing, priority, mode)
//! │  (this crate)   │
//! └────────┬────────┘
//!          │ tokio tasks, timeout + cancellation
//!    ┌─────┴──────┬───────────┬──────────┐
//!    ▼            ▼           ▼          ▼
//! [Operations] [Crowd]  [Passenger]   [Alert]
//!                           │            │
//!                    KnowledgeBase  NotificationGateway
//! ```

pub mod config;
pub mod extract;
pub mod graph;
pub mod routing;
pub mod state;
pub mod synthesis;

pub use config::{AgentOverrides, AlertConfig, CoordinatorConfig, GraphConfig};
pub use graph::{Orchestrator, OrchestratorBuilder, RunData, RunOutcome};
pub use routing::RoutingDecision;
pub use state::{ErrorEntry, ExecutionState, Stage};
pub use synthesis::{FinalResponse, ResponseStatus, Section};
pub use tokio_util::sync::CancellationToken;
