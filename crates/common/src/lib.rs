//! Common types shared across the railmind crates.
//!
//! This crate holds the request model that enters the orchestration graph,
//! the priority classification the planner assigns, and the error type every
//! other crate propagates.

pub mod error;
pub mod request;

pub use error::{RailmindError, Result};
pub use request::{Channel, Priority, Request, RequestContext};
