//! Command-line surface and logging setup.

pub mod cli;
pub mod logging;
