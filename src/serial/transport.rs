//! Serial transport: discovery, open, one-at-a-time command exchange, and
//! reconnect with backoff.
//!
//! All device access goes through a single async mutex, so commands queue behind each
//! other and never interleave on the wire. State is published on a watch channel for
//! readers that must not wait on the port.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::types::SerialSettings;
use crate::config::validation::{bounded_secs, MAX_BACKOFF_SECS};
use crate::daemon::signal::shutdown_signalled;
use crate::error::TransportError;

use super::command::ControllerCommand;
use super::discovery::{self, PortScanner, UsbInfo};
use super::events::{ControllerEvent, EventSink};
use super::link::{SerialLink, SerialOpener};
use super::state::{next_state, Backoff, ConnectionState, TransportEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub preferred_port: String,
    pub baud: u32,
    pub open_timeout: Duration,
    pub command_timeout: Duration,
    pub failure_threshold: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub scan_patterns: Vec<String>,
}

impl From<&SerialSettings> for TransportSettings {
    fn from(s: &SerialSettings) -> Self {
        Self {
            preferred_port: s.preferred_port.clone(),
            baud: s.baud,
            open_timeout: Duration::from_millis(s.open_timeout_ms),
            command_timeout: Duration::from_millis(s.command_timeout_ms),
            failure_threshold: s.failure_threshold.max(1),
            backoff_initial: bounded_secs(s.backoff_initial_secs, MAX_BACKOFF_SECS),
            backoff_max: bounded_secs(s.backoff_max_secs, MAX_BACKOFF_SECS),
            scan_patterns: s.scan_patterns.clone(),
        }
    }
}

/// Read-only view of the transport, published after every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportStatus {
    pub state: ConnectionState,
    pub port: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub baud: u32,
    /// Descriptor of the open port when it is a USB device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb: Option<UsbInfo>,
}

struct Inner {
    settings: TransportSettings,
    link: Option<Box<dyn SerialLink>>,
    failures: u32,
    backoff: Backoff,
    retry_at: Option<Instant>,
    last_good: Option<String>,
}

pub struct SerialTransport {
    inner: Mutex<Inner>,
    opener: Arc<dyn SerialOpener>,
    scanner: Arc<dyn PortScanner>,
    sink: Arc<dyn EventSink>,
    status: watch::Sender<TransportStatus>,
    shutdown: watch::Receiver<bool>,
}

impl SerialTransport {
    pub fn new(
        settings: TransportSettings,
        opener: Arc<dyn SerialOpener>,
        scanner: Arc<dyn PortScanner>,
        sink: Arc<dyn EventSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (status, _) = watch::channel(TransportStatus {
            state: ConnectionState::Disconnected,
            port: None,
            last_error: None,
            consecutive_failures: 0,
            baud: settings.baud,
            usb: None,
        });
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        Self {
            inner: Mutex::new(Inner {
                settings,
                link: None,
                failures: 0,
                backoff,
                retry_at: None,
                last_good: None,
            }),
            opener,
            scanner,
            sink,
            status,
            shutdown,
        }
    }

    pub fn status(&self) -> TransportStatus {
        self.status.borrow().clone()
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Send a command, waiting behind any command already in flight.
    pub async fn send(&self, command: ControllerCommand) -> Result<String, TransportError> {
        if self.shutting_down() {
            return Err(TransportError::ShutdownRequested);
        }
        let mut inner = self.inner.lock().await;
        self.exchange(&mut inner, &command, false).await
    }

    /// Send a command only if the port is idle.
    pub async fn try_send(&self, command: ControllerCommand) -> Result<String, TransportError> {
        if self.shutting_down() {
            return Err(TransportError::ShutdownRequested);
        }
        let mut inner = self.inner.try_lock().map_err(|_| TransportError::Busy)?;
        self.exchange(&mut inner, &command, false).await
    }

    pub async fn set_pwm(&self, pwm: u8) -> Result<String, TransportError> {
        self.send(ControllerCommand::SetPwm(pwm)).await
    }

    pub async fn version(&self) -> Result<String, TransportError> {
        self.send(ControllerCommand::GetVersion).await
    }

    /// Health check. Opens the port immediately even inside a backoff window and returns round-trip latency.
    pub async fn ping(&self) -> Result<Duration, TransportError> {
        if self.shutting_down() {
            return Err(TransportError::ShutdownRequested);
        }
        let mut inner = self.inner.lock().await;
        let started = Instant::now();
        self.exchange(&mut inner, &ControllerCommand::Ping, true).await?;
        Ok(started.elapsed())
    }

    /// Discovery candidates in the order the next open would try them.
    pub async fn candidates(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        discovery::candidates(
            &inner.settings.preferred_port,
            inner.last_good.as_deref(),
            self.scanner.as_ref(),
            &inner.settings.scan_patterns,
        )
    }

    /// Swap in new settings. A changed port or baud closes the current handle.
    pub async fn reconfigure(&self, settings: TransportSettings) {
        let mut inner = self.inner.lock().await;
        if inner.settings == settings {
            return;
        }
        let reopen = inner.settings.preferred_port != settings.preferred_port || inner.settings.baud != settings.baud;
        inner.backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        inner.retry_at = None;
        inner.settings = settings;
        if reopen && inner.link.is_some() {
            info!("Serial settings changed, reopening");
            self.close_locked(&mut inner);
        }
        let baud = inner.settings.baud;
        self.status.send_modify(|s| s.baud = baud);
    }

    /// Close the handle. The next command rediscovers.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.close_locked(&mut inner);
    }

    fn close_locked(&self, inner: &mut MutexGuard<'_, Inner>) {
        if let Some(link) = inner.link.take() {
            debug!("Closing serial port {}", link.port());
        }
        inner.failures = 0;
        self.transition(TransportEvent::Closed, Some(None), None);
    }

    fn transition(&self, event: TransportEvent, port: Option<Option<String>>, error: Option<Option<String>>) {
        let mut changed = None;
        self.status.send_modify(|status| {
            let next = next_state(&status.state, &event);
            if next != status.state {
                changed = Some((status.state.clone(), next.clone()));
                status.state = next;
            }
            if let Some(port) = port {
                if port.is_none() {
                    status.usb = None;
                }
                status.port = port;
            }
            if let Some(error) = error {
                status.last_error = error;
            }
        });
        if let Some((from, to)) = changed {
            self.sink.emit(&ControllerEvent::StateChanged { from, to });
        }
    }

    fn record_failures(&self, failures: u32) {
        self.status.send_modify(|s| s.consecutive_failures = failures);
    }

    async fn lookup_usb(&self, port: &str) -> Option<UsbInfo> {
        let scanner = self.scanner.clone();
        let port = port.to_string();
        tokio::task::spawn_blocking(move || scanner.usb_info(&port)).await.ok().flatten()
    }

    async fn ensure_open(&self, inner: &mut MutexGuard<'_, Inner>, force: bool) -> Result<(), TransportError> {
        if inner.link.is_some() {
            return Ok(());
        }

        if let Some(at) = inner.retry_at {
            let now = Instant::now();
            if now < at && !force {
                return Err(TransportError::NotConnected {
                    reason: format!("reconnecting in {:.1}s", (at - now).as_secs_f64()),
                });
            }
        }

        let candidates = discovery::candidates(
            &inner.settings.preferred_port,
            inner.last_good.as_deref(),
            self.scanner.as_ref(),
            &inner.settings.scan_patterns,
        );
        self.transition(TransportEvent::OpenStarted, None, None);

        let mut errors: Vec<TransportError> = Vec::new();
        let mut shutdown = self.shutdown.clone();
        for port in &candidates {
            let attempt = tokio::time::timeout(inner.settings.open_timeout, self.opener.open(port, inner.settings.baud));
            let outcome = tokio::select! {
                result = attempt => result,
                _ = shutdown_signalled(&mut shutdown) => {
                    self.transition(TransportEvent::Closed, None, None);
                    return Err(TransportError::ShutdownRequested);
                }
            };

            let err = match outcome {
                Ok(Ok(link)) => {
                    info!(port = %port, baud = inner.settings.baud, "Serial port opened");
                    inner.link = Some(link);
                    inner.last_good = Some(port.clone());
                    inner.failures = 0;
                    inner.retry_at = None;
                    self.record_failures(0);
                    self.transition(TransportEvent::OpenSucceeded, Some(Some(port.clone())), Some(None));
                    let usb = self.lookup_usb(port).await;
                    if let Some(info) = &usb {
                        let product = info.product.as_deref().unwrap_or("-");
                        debug!(port = %port, "USB {:04x}:{:04x} {}", info.vid, info.pid, product);
                    }
                    self.status.send_modify(|s| s.usb = usb);
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::OpenTimeout {
                    port: port.clone(),
                    timeout: inner.settings.open_timeout,
                },
            };
            trace!("Candidate {} failed: {}", port, err);
            self.sink.emit(&ControllerEvent::OpenFailed {
                port: port.clone(),
                reason: err.to_string(),
            });
            errors.push(err);
        }

        let err = summarize_open_errors(&candidates, errors);
        let delay = inner.backoff.fail();
        inner.retry_at = Some(Instant::now() + delay);
        warn!(
            "Serial not connected: {} (retry {} in {:.1}s)",
            err,
            inner.backoff.attempts(),
            delay.as_secs_f64()
        );
        self.transition(TransportEvent::OpenFailed, Some(None), Some(Some(err.to_string())));
        Err(err)
    }

    async fn exchange(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        command: &ControllerCommand,
        force_open: bool,
    ) -> Result<String, TransportError> {
        self.ensure_open(inner, force_open).await?;

        let kind = command.kind();
        let label = command.label();
        let timeout = inner.settings.command_timeout;
        self.sink.emit(&ControllerEvent::CommandAttempted { kind });

        let mut shutdown = self.shutdown.clone();
        let Some(link) = inner.link.as_mut() else {
            return Err(TransportError::NotConnected { reason: "port closed".into() });
        };
        let round_trip = async {
            link.clear_input()?;
            link.write_line(&command.encode()).await?;
            link.read_line().await
        };

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, round_trip) => match outcome {
                Ok(Ok(reply)) if command.accepts(&reply) => Ok(reply),
                Ok(Ok(reply)) => Err(TransportError::UnexpectedReply { command: label.clone(), reply }),
                Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
                Err(_) => Err(TransportError::CommandTimeout { command: label.clone(), timeout }),
            },
            _ = shutdown_signalled(&mut shutdown) => Err(TransportError::ShutdownRequested),
        };

        match result {
            Ok(reply) => {
                trace!("{} -> {:?}", label, reply);
                inner.failures = 0;
                inner.backoff.reset();
                inner.retry_at = None;
                self.record_failures(0);
                let event = if matches!(command, ControllerCommand::Ping) {
                    TransportEvent::PingOk
                } else {
                    TransportEvent::CommandOk
                };
                self.transition(event, None, Some(None));
                self.sink.emit(&ControllerEvent::CommandSucceeded { kind });
                Ok(reply)
            }
            Err(TransportError::ShutdownRequested) => {
                debug!("Shutdown during {}, closing port", label);
                self.close_locked(inner);
                Err(TransportError::ShutdownRequested)
            }
            Err(err) => {
                inner.failures += 1;
                let failures = inner.failures;
                self.record_failures(failures);
                self.sink.emit(&ControllerEvent::CommandFailed { kind, reason: err.to_string() });

                if failures >= inner.settings.failure_threshold {
                    let delay = inner.backoff.fail();
                    inner.retry_at = Some(Instant::now() + delay);
                    warn!(
                        "{} consecutive serial failures (last: {}), closing port and rediscovering in {:.1}s",
                        failures,
                        err,
                        delay.as_secs_f64()
                    );
                    inner.link = None;
                    inner.failures = 0;
                    self.record_failures(0);
                    self.transition(TransportEvent::ThresholdReached, Some(None), Some(Some(err.to_string())));
                } else {
                    debug!("{} failed ({}/{}): {}", label, failures, inner.settings.failure_threshold, err);
                    self.transition(TransportEvent::CommandFailed(err.to_string()), None, Some(Some(err.to_string())));
                }
                Err(err)
            }
        }
    }
}

/// Pick the most actionable error from a failed discovery pass.
fn summarize_open_errors(candidates: &[String], errors: Vec<TransportError>) -> TransportError {
    if candidates.is_empty() {
        return TransportError::DeviceNotFound { tried: "no serial ports detected".into() };
    }
    if let Some(denied) = errors.iter().find(|e| matches!(e, TransportError::PermissionDenied { .. })) {
        return denied.clone();
    }
    if errors.iter().all(|e| matches!(e, TransportError::DeviceNotFound { .. })) {
        return TransportError::DeviceNotFound { tried: candidates.join(", ") };
    }
    errors
        .into_iter()
        .find(|e| !matches!(e, TransportError::DeviceNotFound { .. }))
        .unwrap_or(TransportError::DeviceNotFound { tried: candidates.join(", ") })
}
