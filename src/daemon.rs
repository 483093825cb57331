//! Daemon lifecycle: PID file, signals, and runtime control.

pub mod control;
pub mod pid;
pub mod signal;

pub const PID_FILE: &str = "/run/fanbridge/fanbridge.pid";
