//! Config file load, save, and migration logic.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::types::AppConfig;

pub const CONFIG_ENV: &str = "FANBRIDGE_CONFIG";
pub const SERIAL_PORT_ENV: &str = "FANBRIDGE_SERIAL_PORT";
pub const BAUD_ENV: &str = "FANBRIDGE_BAUD";

/// Emergency limits the legacy layout applied when its keys were absent.
const LEGACY_HDD_EMERGENCY_C: i64 = 45;
const LEGACY_SSD_EMERGENCY_C: i64 = 60;

/// Resolve the config path: explicit flag, then FANBRIDGE_CONFIG, then config.json next to the binary.
pub fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = path {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join("config.json"))
}

/// Rewrite legacy flat keys into the current layout and fill missing sections with defaults.
pub(crate) fn migrate_value(json: &mut serde_json::Value) -> Result<bool> {
    let root = json
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Config root must be a JSON object"))?;
    let mut migrated = false;

    // === LEGACY CURVE KEYS ===
    if let (Some(thresholds), Some(pwms)) = (root.remove("hdd_thresholds"), root.remove("hdd_pwm")) {
        let thresholds: Vec<i64> = serde_json::from_value(thresholds).context("Invalid hdd_thresholds")?;
        let pwms: Vec<i64> = serde_json::from_value(pwms).context("Invalid hdd_pwm")?;
        if thresholds.len() != pwms.len() {
            anyhow::bail!(
                "Legacy hdd_thresholds has {} entries but hdd_pwm has {}",
                thresholds.len(),
                pwms.len()
            );
        }
        let points: Vec<serde_json::Value> = thresholds
            .iter()
            .zip(pwms.iter())
            .map(|(t, p)| serde_json::json!({ "temp_c": t, "pwm": p }))
            .collect();

        let min_pwm = root
            .remove("fallback_pwm")
            .and_then(|v| v.as_u64())
            .or_else(|| pwms.iter().copied().min().map(|p| p.max(0) as u64))
            .unwrap_or(10);

        let hdd_limit = root
            .remove("single_override_hdd_c")
            .and_then(|v| v.as_i64())
            .unwrap_or(LEGACY_HDD_EMERGENCY_C);
        let ssd_limit = root
            .remove("single_override_ssd_c")
            .and_then(|v| v.as_i64())
            .unwrap_or(LEGACY_SSD_EMERGENCY_C);

        let mut curve = serde_json::json!({
            "points": points,
            "mode": "step",
            "hysteresis_c": 2,
            "min_pwm": min_pwm,
            "max_pwm": 100,
            "emergency_temp_c": hdd_limit,
            "emergency_ssd_temp_c": ssd_limit,
        });
        if let Some(pwm) = root.remove("override_pwm") {
            curve["emergency_pwm"] = pwm;
        }

        if !root.contains_key("curve") {
            root.insert("curve".to_string(), curve);
        }
        info!("Migrated: legacy hdd_thresholds/hdd_pwm converted to 'curve'");
        migrated = true;
    }

    // All drives share one curve now; only the SSD emergency limit survives.
    for legacy in ["ssd_thresholds", "ssd_pwm"] {
        if root.remove(legacy).is_some() {
            warn!(
                "Migrated: dropped '{}', SSDs now follow the shared curve (emergency limit: curve.emergency_ssd_temp_c)",
                legacy
            );
            migrated = true;
        }
    }

    for legacy in ["single_override_ssd_c", "mode", "sim"] {
        if root.remove(legacy).is_some() {
            info!("Migrated: removed '{}'", legacy);
            migrated = true;
        }
    }

    // === ADDITIONS ===
    let defaults = serde_json::to_value(AppConfig::default())?;
    if let Some(default_root) = defaults.as_object() {
        for (section, value) in default_root {
            if !root.contains_key(section) {
                root.insert(section.clone(), value.clone());
                info!("Migrated: added '{}' section with defaults", section);
                migrated = true;
            }
        }
    }

    Ok(migrated)
}

/// Migrate config to the current layout in place on disk.
pub(crate) fn migrate_config(config_path: &Path) -> Result<bool> {
    if !config_path.exists() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(config_path)?;
    let mut json: serde_json::Value = serde_json::from_str(&content)?;
    let migrated = migrate_value(&mut json)?;

    if migrated {
        std::fs::write(config_path, serde_json::to_string_pretty(&json)?)?;
        info!("Config migrated to latest version: {:?}", config_path);
    }

    Ok(migrated)
}

/// Environment overrides from the container surface.
pub(crate) fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(port) = std::env::var(SERIAL_PORT_ENV) {
        if !port.trim().is_empty() {
            config.serial.preferred_port = port.trim().to_string();
        }
    }
    if let Ok(baud) = std::env::var(BAUD_ENV) {
        match baud.trim().parse::<u32>() {
            Ok(b) if b > 0 => config.serial.baud = b,
            _ => warn!("Ignoring invalid {}={:?}", BAUD_ENV, baud),
        }
    }
}

/// Parse and validate config text. The curve must pass validation or the whole file is rejected.
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content).context("Failed to parse config JSON")?;
    config.curve.validate()?;
    config.validate_timing()?;
    Ok(config)
}

/// Config as stored on disk: migrated and validated, without environment overrides.
pub async fn load_stored_config(config_path: &Path) -> Result<AppConfig> {
    // Migrate config first (handles old configs automatically)
    if let Err(e) = migrate_config(config_path) {
        warn!("Config migration check failed: {}", e);
    }

    if config_path.exists() {
        let content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read config: {:?}", config_path))?;
        let config = parse_config(&content).with_context(|| format!("Rejected config: {:?}", config_path))?;
        info!("Loaded configuration from: {:?}", config_path);
        Ok(config)
    } else {
        info!("Config file {:?} not found, using defaults", config_path);
        Ok(AppConfig::default())
    }
}

pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config_path = resolve_config_path(path)?;
    let mut config = load_stored_config(&config_path).await?;
    apply_env_overrides(&mut config);
    Ok(config)
}

pub async fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    config.curve.validate()?;
    config.validate_timing()?;
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write config: {:?}", path))?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}
