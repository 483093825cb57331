//! The control loop: telemetry → curve → SET_PWM, once per tick.
//!
//! The loop is the only writer of the live curve and the status snapshot. Both sit in
//! watch channels holding `Arc`s, so readers clone a pointer and updates are a single swap.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::types::{AppConfig, FanCurveConfig};
use crate::config::validation::{bounded_secs, MAX_POLL_INTERVAL_SECS};
use crate::curve::{self, CurveDecision};
use crate::daemon::signal::shutdown_signalled;
use crate::error::ConfigValidationError;
use crate::serial::events::{ControllerEvent, EventCounters, EventSink};
use crate::serial::{ControllerCommand, SerialTransport, TransportSettings};
use crate::telemetry::{self, source::DiskSource};

use super::status::{write_status_file, StatusSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub sysfs_root: PathBuf,
    pub status_file: Option<PathBuf>,
}

impl From<&AppConfig> for LoopSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: bounded_secs(config.agent.poll_interval_secs, MAX_POLL_INTERVAL_SECS)
                .max(Duration::from_millis(100)),
            sysfs_root: config.disks.sysfs_root.clone(),
            status_file: config.agent.status_file.clone(),
        }
    }
}

/// Cycle-to-cycle memory. Holding its lock is what keeps cycles from overlapping.
#[derive(Debug, Default)]
struct CycleMemory {
    cycle: u64,
    previous_curve_pwm: Option<u8>,
    last_sent_pwm: Option<u8>,
}

pub struct ControlLoop {
    curve: watch::Sender<Arc<FanCurveConfig>>,
    excludes: watch::Sender<Arc<HashSet<String>>>,
    source: watch::Sender<Arc<dyn DiskSource>>,
    settings: watch::Sender<LoopSettings>,
    status: watch::Sender<Arc<StatusSnapshot>>,
    transport: Arc<SerialTransport>,
    counters: Arc<EventCounters>,
    sink: Arc<dyn EventSink>,
    memory: Mutex<CycleMemory>,
}

impl ControlLoop {
    /// `sink` receives cycle events; `counters` is read back into every snapshot.
    pub fn new(
        curve: FanCurveConfig,
        excludes: HashSet<String>,
        source: Arc<dyn DiskSource>,
        settings: LoopSettings,
        transport: Arc<SerialTransport>,
        counters: Arc<EventCounters>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigValidationError> {
        let curve = curve.validated()?;
        let initial = StatusSnapshot::initial(transport.status(), curve.override_pwm);
        Ok(Self {
            curve: watch::channel(Arc::new(curve)).0,
            excludes: watch::channel(Arc::new(excludes)).0,
            source: watch::channel(source).0,
            settings: watch::channel(settings).0,
            status: watch::channel(Arc::new(initial)).0,
            transport,
            counters,
            sink,
            memory: Mutex::new(CycleMemory::default()),
        })
    }

    /// Latest published snapshot.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.status.borrow().clone()
    }

    pub fn curve(&self) -> Arc<FanCurveConfig> {
        self.curve.borrow().clone()
    }

    pub fn transport(&self) -> &Arc<SerialTransport> {
        &self.transport
    }

    /// Build the next curve from the live one and swap it in under the channel lock.
    /// Returns whether anything changed; an invalid result leaves the live curve untouched.
    fn swap_curve<F>(&self, build: F) -> Result<bool, ConfigValidationError>
    where
        F: FnOnce(&FanCurveConfig) -> FanCurveConfig,
    {
        let mut outcome = Ok(false);
        self.curve.send_if_modified(|live| match build(live).validated() {
            Ok(next) if next != **live => {
                *live = Arc::new(next);
                outcome = Ok(true);
                true
            }
            Ok(_) => false,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// Set or clear the manual override. Takes effect on the next cycle.
    pub fn apply_override(&self, pwm: Option<u8>) -> Result<(), ConfigValidationError> {
        if self.swap_curve(|live| live.with_override(pwm))? {
            match pwm {
                Some(v) => info!("Manual override set to {}%", v),
                None => info!("Manual override cleared"),
            }
        }
        Ok(())
    }

    /// Replace the curve shape. The live override is kept; it only changes through `apply_override`.
    pub fn update_curve(&self, curve: FanCurveConfig) -> Result<(), ConfigValidationError> {
        curve.validate()?;
        if self.swap_curve(|live| curve.with_override(live.override_pwm))? {
            info!("Fan curve updated ({} points, {:?})", curve.points.len(), curve.mode);
        }
        Ok(())
    }

    pub fn update_excludes<I: IntoIterator<Item = String>>(&self, excludes: I) {
        let set: HashSet<String> = excludes.into_iter().collect();
        if **self.excludes.borrow() != set {
            debug!("Exclude list now {:?}", set);
            self.excludes.send_replace(Arc::new(set));
        }
    }

    /// Apply a freshly loaded config. Everything except an invalid curve is applied.
    /// The stored override is the persisted `--set-override` value and replaces the live one.
    pub async fn reload(&self, config: &AppConfig) -> Result<(), ConfigValidationError> {
        self.update_excludes(config.disks.exclude.iter().cloned());
        self.source.send_replace(Arc::from(telemetry::source::from_settings(&config.disks)));
        self.settings.send_replace(LoopSettings::from(config));
        self.transport.reconfigure(TransportSettings::from(&config.serial)).await;
        self.update_curve(config.curve.clone())?;
        self.apply_override(config.curve.override_pwm)
    }

    /// One full cycle. Errors are recorded in the snapshot; nothing here aborts the loop.
    pub async fn run_cycle(&self) -> Arc<StatusSnapshot> {
        let mut memory = self.memory.lock().await;
        memory.cycle += 1;

        let curve = self.curve.borrow().clone();
        let excludes = self.excludes.borrow().clone();
        let source = self.source.borrow().clone();
        let settings = self.settings.borrow().clone();

        let mut errors: Vec<String> = Vec::new();
        let mut decision: Option<CurveDecision> = None;
        let mut drives = Vec::new();

        match telemetry::collect(source.as_ref(), &excludes, &settings.sysfs_root).await {
            Ok(records) => {
                let d = curve::evaluate(&records, &curve, memory.previous_curve_pwm);
                memory.previous_curve_pwm = d.source.is_curve_driven().then_some(d.pwm);
                decision = Some(d);
                drives = records;
            }
            Err(e) => {
                // Without fresh readings the controller keeps its last duty cycle.
                warn!("Telemetry read failed: {:#}", e);
                errors.push(format!("telemetry: {:#}", e));
            }
        }

        let mut sent_ok = false;
        if let Some(d) = &decision {
            match self.transport.set_pwm(d.pwm).await {
                Ok(reply) => {
                    if memory.last_sent_pwm != Some(d.pwm) {
                        info!(
                            "PWM {} -> {}% ({:?}, hottest {})",
                            memory.last_sent_pwm.map(|p| format!("{}%", p)).unwrap_or_else(|| "-".into()),
                            d.pwm,
                            d.source,
                            d.representative_temp.map(|t| format!("{}°C", t)).unwrap_or_else(|| "n/a".into()),
                        );
                    } else {
                        trace!("PWM {}% acknowledged: {:?}", d.pwm, reply);
                    }
                    memory.last_sent_pwm = Some(d.pwm);
                    sent_ok = true;
                }
                Err(e) if e.is_shutdown() => debug!("Cycle {} interrupted by shutdown", memory.cycle),
                Err(e) => {
                    debug!("SET_PWM {}% failed: {}", d.pwm, e);
                    errors.push(e.to_string());
                }
            }
        } else {
            // Nothing to send this cycle. Check the link only if the port is idle.
            match self.transport.try_send(ControllerCommand::Ping).await {
                Ok(_) => trace!("Link check answered"),
                Err(e) => debug!("Link check failed: {}", e),
            }
        }

        let ok = sent_ok && errors.is_empty();
        self.sink.emit(&ControllerEvent::CycleCompleted { ok });

        let snapshot = Arc::new(StatusSnapshot {
            timestamp: Local::now(),
            cycle: memory.cycle,
            representative_temp: decision.and_then(|d| d.representative_temp),
            target_pwm: decision.map(|d| d.pwm),
            last_sent_pwm: memory.last_sent_pwm,
            decision: decision.map(|d| d.source),
            override_pwm: curve.override_pwm,
            drives,
            connection: self.transport.status(),
            last_error: if errors.is_empty() { None } else { Some(errors.join("; ")) },
            counters: self.counters.snapshot(),
        });
        self.status.send_replace(snapshot.clone());
        drop(memory);

        if let Some(path) = &settings.status_file {
            if let Err(e) = write_status_file(path, &snapshot).await {
                warn!("{:#}", e);
            }
        }

        snapshot
    }

    /// Cycle on a fixed interval until shutdown. Ticks that fire during a cycle are dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut period = self.settings.borrow().poll_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Control loop started (every {:.1}s)", period.as_secs_f64());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            let started = Instant::now();
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            let elapsed = started.elapsed();
            if elapsed > period {
                let skipped = (elapsed.as_millis() / period.as_millis().max(1)) as u64;
                warn!(
                    "Cycle took {:.1}s, longer than the {:.1}s interval; skipping {} tick(s)",
                    elapsed.as_secs_f64(),
                    period.as_secs_f64(),
                    skipped
                );
            }

            let configured = self.settings.borrow().poll_interval;
            if configured != period {
                info!("Poll interval changed to {:.1}s", configured.as_secs_f64());
                period = configured;
                ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }
        }

        info!("Control loop stopped");
    }
}
