//! Configuration: serde types, JSON persistence, and fan curve validation.

pub mod persistence;
pub mod types;
pub mod validation;
