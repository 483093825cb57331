//! Periodic control loop and the status it publishes.

pub mod runner;
pub mod status;

pub use runner::{ControlLoop, LoopSettings};
pub use status::StatusSnapshot;
