//! Fanbridge entry point: CLI dispatch, signal handlers, async runtime.

mod app;
mod config;
mod control;
mod curve;
mod daemon;
mod error;
mod serial;
mod telemetry;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use app::cli::{Args, HELP_TEXT};
use app::logging::{init_tracing, reload_level, resolve_filter, LOG_LEVEL_ENV};
use config::persistence::{load_config, resolve_config_path};
use config::types::AppConfig;
use control::{ControlLoop, LoopSettings};
use daemon::pid::{release_pid, running_pid, save_pid};
use daemon::PID_FILE;
use serial::discovery::GlobScanner;
use serial::events::{EventCounters, EventSink, LogSink, MultiSink};
use serial::link::TtyOpener;
use serial::{ControllerCommand, SerialTransport, TransportSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments with custom error handling
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if err.kind() == clap::error::ErrorKind::DisplayHelp {
                print!("{}", HELP_TEXT);
                std::process::exit(0);
            }
            if err.kind() == clap::error::ErrorKind::DisplayVersion {
                println!("fanbridge {} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH);
                std::process::exit(0);
            }

            eprintln!("{}", err);
            eprintln!();
            print!("{}", HELP_TEXT);
            eprintln!("\nFor more information, try '--help'.");
            std::process::exit(2);
        }
    };

    let pid_file = PathBuf::from(PID_FILE);
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();

    // Persisting an override only edits the file and pokes the daemon
    if let Some(value) = args.set_override {
        init_tracing(resolve_filter(args.log_level.as_deref(), env_level.as_deref(), Some("warn"))?);
        return daemon::control::set_override(args.config.as_deref(), &pid_file, value.as_option()).await;
    }
    if args.reset_curve {
        init_tracing(resolve_filter(args.log_level.as_deref(), env_level.as_deref(), Some("warn"))?);
        return daemon::control::reset_curve(args.config.as_deref(), &pid_file).await;
    }

    // Priority: 1. --log-level flag, 2. LOG_LEVEL env, 3. config file, 4. default (info)
    let config = match load_config(args.config.as_deref()).await {
        Ok(config) => {
            init_tracing(resolve_filter(
                args.log_level.as_deref(),
                env_level.as_deref(),
                Some(&config.agent.log_level),
            )?);
            config
        }
        Err(e) => {
            init_tracing(resolve_filter(args.log_level.as_deref(), env_level.as_deref(), None)?);
            error!("{:#}", e);
            return Err(e);
        }
    };

    if args.check_config {
        let path = resolve_config_path(args.config.as_deref())?;
        println!("Configuration OK: {:?}", path);
        println!(
            "  curve: {} points ({:?}), pwm {}..={}, hysteresis {}°C, override {}",
            config.curve.points.len(),
            config.curve.mode,
            config.curve.min_pwm,
            config.curve.max_pwm,
            config.curve.hysteresis_c,
            config.curve.override_pwm.map(|v| format!("{}%", v)).unwrap_or_else(|| "off".into()),
        );
        return Ok(());
    }

    if args.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let counters = Arc::new(EventCounters::new());
    let sinks: Vec<Arc<dyn EventSink>> = vec![counters.clone(), Arc::new(LogSink)];
    let sink: Arc<dyn EventSink> = Arc::new(MultiSink(sinks));
    let transport = Arc::new(SerialTransport::new(
        TransportSettings::from(&config.serial),
        Arc::new(TtyOpener),
        Arc::new(GlobScanner),
        sink.clone(),
        shutdown_rx.clone(),
    ));

    if args.is_serial_command() {
        return run_serial_command(&args, &transport).await;
    }

    let control = Arc::new(
        ControlLoop::new(
            config.curve.clone(),
            config.disks.exclude.iter().cloned().collect::<HashSet<_>>(),
            Arc::from(telemetry::source::from_settings(&config.disks)),
            LoopSettings::from(&config),
            transport.clone(),
            counters,
            sink,
        )
        .context("Fan curve rejected")?,
    );

    if args.once {
        let snapshot = control.run_cycle().await;
        transport.close().await;
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        if !snapshot.is_healthy() {
            std::process::exit(1);
        }
        return Ok(());
    }

    debug_assert!(!args.is_one_shot());
    run_daemon(&args, &config, &pid_file, control, shutdown_tx, shutdown_rx).await
}

async fn run_serial_command(args: &Args, transport: &SerialTransport) -> Result<()> {
    if args.ports {
        let candidates = transport.candidates().await;
        if candidates.is_empty() {
            println!("No serial ports detected");
        }
        for port in candidates {
            println!("{}", port);
        }
        return Ok(());
    }

    let outcome = if args.ping {
        transport.ping().await.map(|latency| {
            let status = transport.status();
            let mut line = format!(
                "PONG from {} in {:.1} ms",
                status.port.unwrap_or_default(),
                latency.as_secs_f64() * 1000.0
            );
            if let Some(usb) = status.usb {
                line.push_str(&format!(
                    " (USB {:04x}:{:04x} {})",
                    usb.vid,
                    usb.pid,
                    usb.product.as_deref().unwrap_or("")
                ));
            }
            line
        })
    } else if args.fw_version {
        transport.version().await.map(|version| format!("Firmware: {}", version))
    } else if let Some(line) = &args.send {
        transport
            .send(ControllerCommand::Raw(line.clone()))
            .await
            .map(|reply| if reply.is_empty() { "(no reply)".to_string() } else { reply })
    } else if let Some(pwm) = args.pwm {
        transport.set_pwm(pwm).await.map(|reply| format!("SET_PWM {}% -> {}", pwm, reply))
    } else {
        return Ok(());
    };
    transport.close().await;

    match outcome {
        Ok(line) => {
            println!("{}", line);
            Ok(())
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            if e.is_open_failure() {
                eprintln!("Run with --ports to list the candidates that were tried.");
            }
            std::process::exit(1);
        }
    }
}

async fn run_daemon(
    args: &Args,
    config: &AppConfig,
    pid_file: &Path,
    control: Arc<ControlLoop>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    if let Some(pid) = running_pid(pid_file) {
        anyhow::bail!("fanbridge is already running (PID: {})", pid);
    }
    if let Err(e) = save_pid(pid_file, std::process::id()) {
        warn!("Could not write PID file, --set-override will not reach this process: {:#}", e);
    }

    info!(
        "Fanbridge v{} starting (poll {:.1}s, disks: {:?}, baud {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.poll_interval_secs,
        config.disks.mode,
        config.serial.baud
    );

    // SIGHUP: reload config, log level, curve and excludes
    #[cfg(unix)]
    {
        let mut hangup = daemon::signal::hangup()?;
        let control = control.clone();
        let config_path = args.config.clone();
        let level_flag = args.log_level.clone();

        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                let new_config = match load_config(config_path.as_deref()).await {
                    Ok(c) => c,
                    Err(e) => {
                        error!("Failed to reload config, keeping current settings: {:#}", e);
                        continue;
                    }
                };

                if level_flag.is_none() {
                    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
                    match resolve_filter(None, env_level.as_deref(), Some(&new_config.agent.log_level))
                        .and_then(reload_level)
                    {
                        Ok(level) => info!("Log level reloaded: {}", level.to_uppercase()),
                        Err(e) => error!("{:#}", e),
                    }
                }

                if let Err(e) = control.reload(&new_config).await {
                    error!("Rejected fan curve, keeping the current one: {}", e);
                }
            }
        });
    }

    let curve = control.curve();
    info!(
        "Fan curve: {} points ({:?}), hysteresis {}°C, override {}",
        curve.points.len(),
        curve.mode,
        curve.hysteresis_c,
        curve.override_pwm.map(|v| format!("{}%", v)).unwrap_or_else(|| "off".into())
    );

    let runner = {
        let control = control.clone();
        tokio::spawn(async move { control.run(shutdown_rx).await })
    };

    let result = daemon::signal::termination().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = runner.await {
        error!("Control loop task failed: {}", e);
    }
    control.transport().close().await;
    release_pid(pid_file);

    let last = control.status();
    info!(
        "Stopped after {} cycle(s), last PWM {}",
        last.cycle,
        last.last_sent_pwm.map(|p| format!("{}%", p)).unwrap_or_else(|| "never sent".into())
    );

    info!("Fanbridge shutdown complete");
    result
}
