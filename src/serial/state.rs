//! Connection state machine and reconnect backoff.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Port is open but the last command failed; retried in place before a reopen.
    Degraded(String),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    OpenStarted,
    OpenSucceeded,
    OpenFailed,
    CommandOk,
    CommandFailed(String),
    /// Consecutive failures reached the configured threshold.
    ThresholdReached,
    /// A PING round-trip succeeded.
    PingOk,
    Closed,
}

/// Transition table.
pub fn next_state(current: &ConnectionState, event: &TransportEvent) -> ConnectionState {
    use ConnectionState::*;
    use TransportEvent::*;

    match (current, event) {
        (_, PingOk) => Connected,
        (_, OpenStarted) => Connecting,
        (Connecting, OpenSucceeded) => Connected,
        (_, OpenFailed) | (_, ThresholdReached) | (_, Closed) => Disconnected,
        (Connected, CommandOk) | (Degraded(_), CommandOk) => Connected,
        (Connected, CommandFailed(reason)) | (Degraded(_), CommandFailed(reason)) => Degraded(reason.clone()),
        (state, _) => state.clone(),
    }
}

/// Geometric reconnect delay: doubles per failed attempt until it reaches the cap, then holds.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial), attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait after the failures recorded so far.
    pub fn current(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow((self.attempts - 1).min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Record a failed attempt and return the delay before the next one.
    pub fn fail(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.current()
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
