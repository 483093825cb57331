//! Typed errors for configuration validation, telemetry parsing and the serial transport.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub rule: &'static str,
    pub detail: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.detail)
    }
}

/// Rejected fan curve configuration. Carries every rule that failed, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid fan curve configuration: {}", format_issues(.issues))]
pub struct ConfigValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ConfigValidationError {
    #[cfg(test)]
    pub fn has_rule(&self, rule: &str) -> bool {
        self.issues.iter().any(|i| i.rule == rule)
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-drive problem in the telemetry export. Never fatal: the drive is kept with an unknown temperature.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("section {section:?}: {reason}")]
pub struct TelemetryParseWarning {
    pub section: String,
    pub reason: String,
}

/// Errors surfaced by the serial transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no fan controller found (tried: {tried})")]
    DeviceNotFound { tried: String },

    #[error(
        "permission denied opening {port} (map the device into the container with --device={port} \
         and prefer the /dev/serial/by-id path)"
    )]
    PermissionDenied { port: String },

    #[error("timed out opening {port} after {timeout:?}")]
    OpenTimeout { port: String, timeout: Duration },

    #[error("{command} timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("transport busy: another command is in flight")]
    Busy,

    #[error("not connected: {reason}")]
    NotConnected { reason: String },

    #[error("unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: String, reply: String },

    #[error("serial I/O error: {0}")]
    Io(String),

    #[error("shutdown requested")]
    ShutdownRequested,
}

impl TransportError {
    /// Shutdown is cooperative cancellation, not a device fault.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::ShutdownRequested)
    }

    /// Errors raised while opening a port (the handle never existed).
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            TransportError::DeviceNotFound { .. }
                | TransportError::PermissionDenied { .. }
                | TransportError::OpenTimeout { .. }
        )
    }
}
