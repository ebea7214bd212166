//! Editorial decisions.
//!
//! A decision is checked against a [`DecisionContext`] by [`rules`], turned
//! into a write set by [`plan`], confirmed through [`steps`] and taken by the
//! [`DecisionService`].

mod context;
mod engine;
pub mod plan;
pub mod rules;
pub mod steps;
mod types;

pub use context::DecisionContext;
pub use engine::{DecisionOutcome, DecisionRequest, DecisionService};
pub use steps::{Step, StepAction};
pub use types::{DecisionType, Pipeline};
