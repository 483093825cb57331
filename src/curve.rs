//! Fan curve evaluation.

pub mod engine;

pub use engine::{evaluate, CurveDecision, DecisionSource};
