//! Railway incident agents.
//!
//! One planner and four specialists, each wrapping a single reasoning call:
//!
//! - **Planner**: decides which specialists handle a request, at what priority
//! - **Operations**: delay impact on connections, stations and recovery,
//!   grounded on timetable lookups ([`schedule`]) and a delay projection
//!   ([`simulation`])
//! - **Crowd**: occupancy forecasting with data-backed confidence
//! - **Passenger**: knowledge-base grounded answers to passenger questions
//! - **Alert**: per-channel notification content and delivery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AGENTS                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  AgentInput ──▶ Agent::invoke ──▶ AgentOutput | AgentError  │
//! │                      │                                      │
//! │                      ▼                                      │
//! │              LlmClient (one call)                           │
//! │                                                             │
//! │  Passenger ──▶ KnowledgeBase::retrieve                      │
//! │  Operations──▶ KnowledgeBase::documents (timetables)        │
//! │  Alert     ──▶ NotificationGateway::deliver                 │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod alert;
pub mod crowd;
pub mod error;
pub mod notify;
pub mod operations;
pub mod parse;
pub mod passenger;
pub mod planner;
mod reasoning;
pub mod schedule;
pub mod simulation;
pub mod traits;

pub use alert::{AlertAgent, AlertInput, AlertReport, ChannelStatus};
pub use crowd::{BookingSnapshot, CrowdAgent, CrowdConfidencePolicy, CrowdForecast, CrowdInput, RiskLevel};
pub use error::{AgentError, AgentErrorKind};
pub use notify::{DeliveryError, DryRunGateway, NotificationContent, NotificationGateway};
pub use operations::{OperationsAgent, OperationsInput, OperationsReport};
pub use passenger::{infer_category, PassengerAgent, PassengerAnswer, PassengerInput, SourceRef};
pub use planner::{ExecutionHint, PlannerAgent, PlannerInput, ReplanContext, RoutePlan};
pub use schedule::{Connection, ScheduleBook, Stop, TrainSchedule};
pub use simulation::{simulate_cascade, simulate_delay, CascadeSummary, DelayPropagation};
pub use traits::{Agent, AgentInput, AgentName, AgentOutput, AgentSettings};
