//! Runtime control of a running daemon from a second invocation.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::persistence::{load_stored_config, resolve_config_path, save_config};
use crate::config::types::FanCurveConfig;
use crate::daemon::pid::running_pid;

/// Persist a manual override (or clear it) in the stored config. Env overrides are not written back.
pub async fn persist_override(config_path: &Path, value: Option<u8>) -> Result<Option<u8>> {
    let mut config = load_stored_config(config_path).await?;
    let old = config.curve.override_pwm;
    config.curve = config
        .curve
        .with_override(value)
        .validated()
        .context("Override rejected")?;
    save_config(&config, config_path).await?;
    Ok(old)
}

/// Replace the stored curve (and any override) with the defaults.
pub async fn persist_default_curve(config_path: &Path) -> Result<()> {
    let mut config = load_stored_config(config_path).await?;
    config.curve = FanCurveConfig::default();
    save_config(&config, config_path).await
}

#[cfg(target_os = "linux")]
fn send_hangup(pid: u32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as i32, libc::SIGHUP) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context(format!("Failed to signal PID {}", pid));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_hangup(_pid: u32) -> Result<()> {
    anyhow::bail!("Signalling the daemon is only supported on Linux")
}

/// Ask a running daemon to reload its config. Returns the PID signalled, if any.
pub fn notify_reload(pid_file: &Path) -> Result<Option<u32>> {
    match running_pid(pid_file) {
        Some(pid) => {
            send_hangup(pid)?;
            Ok(Some(pid))
        }
        None => Ok(None),
    }
}

/// `--set-override`: save, then SIGHUP the daemon so it applies on its next cycle.
pub async fn set_override(config: Option<&Path>, pid_file: &Path, value: Option<u8>) -> Result<()> {
    let config_path = resolve_config_path(config)?;
    let old = persist_override(&config_path, value).await?;

    let show = |v: Option<u8>| v.map(|p| format!("{}%", p)).unwrap_or_else(|| "off".to_string());
    println!("Manual override: {} → {}", show(old), show(value));
    println!("Configuration saved to: {:?}", config_path);

    report_reload(notify_reload(pid_file)?);
    Ok(())
}

/// `--reset-curve`: save the default curve, then SIGHUP the daemon.
pub async fn reset_curve(config: Option<&Path>, pid_file: &Path) -> Result<()> {
    let config_path = resolve_config_path(config)?;
    persist_default_curve(&config_path).await?;
    println!("Fan curve reset to defaults in: {:?}", config_path);
    report_reload(notify_reload(pid_file)?);
    Ok(())
}

fn report_reload(pid: Option<u32>) {
    match pid {
        Some(pid) => println!("Sent reload signal to fanbridge (PID: {})", pid),
        None => println!("fanbridge is not running; the change applies on next start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::persistence::parse_config;

    #[tokio::test]
    async fn override_is_persisted_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert_eq!(persist_override(&path, Some(65)).await.unwrap(), None);
        let stored = parse_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.curve.override_pwm, Some(65));

        assert_eq!(persist_override(&path, None).await.unwrap(), Some(65));
        let stored = parse_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.curve.override_pwm, None);
    }

    #[tokio::test]
    async fn out_of_range_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(persist_override(&path, Some(150)).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn default_curve_replaces_stored_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        persist_override(&path, Some(55)).await.unwrap();

        persist_default_curve(&path).await.unwrap();
        let stored = parse_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.curve, FanCurveConfig::default());
    }

    #[test]
    fn no_daemon_no_signal() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(notify_reload(&dir.path().join("none.pid")).unwrap(), None);
    }
}
