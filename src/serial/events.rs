//! Discrete transport and control events, plus the sinks that consume them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::command::CommandKind;
use super::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    CommandAttempted { kind: CommandKind },
    CommandSucceeded { kind: CommandKind },
    CommandFailed { kind: CommandKind, reason: String },
    OpenFailed { port: String, reason: String },
    StateChanged { from: ConnectionState, to: ConnectionState },
    CycleCompleted { ok: bool },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ControllerEvent);
}

/// Forwards events to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &ControllerEvent) {
        match event {
            ControllerEvent::StateChanged { from, to } => info!("Serial state: {} -> {}", from, to),
            ControllerEvent::OpenFailed { port, reason } => warn!(port = %port, "Serial open failed: {}", reason),
            ControllerEvent::CommandFailed { kind, reason } => debug!("{} failed: {}", kind.as_str(), reason),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct KindCounters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Atomic tallies of everything the transport and loop report.
#[derive(Debug, Default)]
pub struct EventCounters {
    ping: KindCounters,
    version: KindCounters,
    set_pwm: KindCounters,
    raw: KindCounters,
    open_failures: AtomicU64,
    state_changes: AtomicU64,
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTally {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub ping: CommandTally,
    pub get_version: CommandTally,
    pub set_pwm: CommandTally,
    pub raw: CommandTally,
    pub open_failures: u64,
    pub state_changes: u64,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn kind(&self, kind: CommandKind) -> &KindCounters {
        match kind {
            CommandKind::Ping => &self.ping,
            CommandKind::GetVersion => &self.version,
            CommandKind::SetPwm => &self.set_pwm,
            CommandKind::Raw => &self.raw,
        }
    }

    fn tally(counters: &KindCounters) -> CommandTally {
        CommandTally {
            attempted: counters.attempted.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            ping: Self::tally(&self.ping),
            get_version: Self::tally(&self.version),
            set_pwm: Self::tally(&self.set_pwm),
            raw: Self::tally(&self.raw),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for EventCounters {
    fn emit(&self, event: &ControllerEvent) {
        let bump = |c: &AtomicU64| {
            c.fetch_add(1, Ordering::Relaxed);
        };
        match event {
            ControllerEvent::CommandAttempted { kind } => bump(&self.kind(*kind).attempted),
            ControllerEvent::CommandSucceeded { kind } => bump(&self.kind(*kind).succeeded),
            ControllerEvent::CommandFailed { kind, .. } => bump(&self.kind(*kind).failed),
            ControllerEvent::OpenFailed { .. } => bump(&self.open_failures),
            ControllerEvent::StateChanged { .. } => bump(&self.state_changes),
            ControllerEvent::CycleCompleted { ok: true } => bump(&self.cycles_ok),
            ControllerEvent::CycleCompleted { ok: false } => bump(&self.cycles_failed),
        }
    }
}

/// Fans one event out to several sinks.
pub struct MultiSink(pub Vec<std::sync::Arc<dyn EventSink>>);

impl EventSink for MultiSink {
    fn emit(&self, event: &ControllerEvent) {
        for sink in &self.0 {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_tally_by_kind() {
        let counters = EventCounters::new();
        counters.emit(&ControllerEvent::CommandAttempted { kind: CommandKind::SetPwm });
        counters.emit(&ControllerEvent::CommandSucceeded { kind: CommandKind::SetPwm });
        counters.emit(&ControllerEvent::CommandAttempted { kind: CommandKind::Ping });
        counters.emit(&ControllerEvent::CommandFailed { kind: CommandKind::Ping, reason: "timeout".into() });
        counters.emit(&ControllerEvent::OpenFailed { port: "/dev/ttyACM0".into(), reason: "gone".into() });
        counters.emit(&ControllerEvent::CycleCompleted { ok: false });

        let snap = counters.snapshot();
        assert_eq!(snap.set_pwm, CommandTally { attempted: 1, succeeded: 1, failed: 0 });
        assert_eq!(snap.ping, CommandTally { attempted: 1, succeeded: 0, failed: 1 });
        assert_eq!(snap.open_failures, 1);
        assert_eq!(snap.cycles_failed, 1);
        assert_eq!(snap.cycles_ok, 0);
    }

    #[test]
    fn multi_sink_fans_out() {
        let a = Arc::new(EventCounters::new());
        let b = Arc::new(EventCounters::new());
        let sinks: Vec<Arc<dyn EventSink>> = vec![a.clone(), b.clone(), Arc::new(LogSink)];
        let sink = MultiSink(sinks);
        sink.emit(&ControllerEvent::CycleCompleted { ok: true });
        assert_eq!(a.snapshot().cycles_ok, 1);
        assert_eq!(b.snapshot().cycles_ok, 1);
    }
}
