//! Configuration structs and defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub agent: AgentSettings,
    pub serial: SerialSettings,
    pub disks: DiskSettings,
    pub curve: FanCurveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub poll_interval_secs: f64,
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Preferred device path, tried before anything the scan finds. Empty = scan only.
    #[serde(default)]
    pub preferred_port: String,
    pub baud: u32,
    pub open_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Consecutive command failures before the port is closed and rediscovered.
    pub failure_threshold: u32,
    pub backoff_initial_secs: f64,
    pub backoff_max_secs: f64,
    #[serde(default = "default_scan_patterns")]
    pub scan_patterns: Vec<String>,
}

pub fn default_scan_patterns() -> Vec<String> {
    vec![
        "/dev/serial/by-id/*".to_string(),
        "/dev/ttyACM*".to_string(),
        "/dev/ttyUSB*".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskMode {
    /// Read the host's disks.ini export and enrich it from sysfs.
    Host,
    /// Render the drives listed in `simulated` instead of touching the host.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSettings {
    pub mode: DiskMode,
    pub disks_ini: PathBuf,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Device ids (e.g. "sdb") shown but ignored by the fan curve.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub simulated: Vec<SimulatedDrive>,
}

pub fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDrive {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<i32>,
    #[serde(default)]
    pub spundown: bool,
}

/// Interpolation between curve points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveMode {
    /// Straight line between neighbouring points.
    #[default]
    Linear,
    /// Hold the pwm of the highest threshold at or below the temperature.
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanCurvePoint {
    pub temp_c: i32,
    pub pwm: u8,
}

/// Temperature → PWM control law. Only ever used after `validate()` succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanCurveConfig {
    pub points: Vec<FanCurvePoint>,
    #[serde(default)]
    pub mode: CurveMode,
    pub hysteresis_c: i32,
    pub min_pwm: u8,
    pub max_pwm: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_pwm: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_temp_c: Option<i32>,
    /// Separate limit for solid-state drives. Unset means SSDs use `emergency_temp_c`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_ssd_temp_c: Option<i32>,
    #[serde(default = "default_emergency_pwm")]
    pub emergency_pwm: u8,
}

pub fn default_emergency_pwm() -> u8 { 100 }

impl FanCurveConfig {
    /// Copy with a different manual override. The result still has to be validated.
    pub fn with_override(&self, override_pwm: Option<u8>) -> Self {
        Self { override_pwm, ..self.clone() }
    }
}

impl Default for FanCurveConfig {
    fn default() -> Self {
        Self {
            points: vec![
                FanCurvePoint { temp_c: 30, pwm: 20 },
                FanCurvePoint { temp_c: 35, pwm: 35 },
                FanCurvePoint { temp_c: 40, pwm: 55 },
                FanCurvePoint { temp_c: 45, pwm: 80 },
                FanCurvePoint { temp_c: 50, pwm: 100 },
            ],
            mode: CurveMode::Linear,
            hysteresis_c: 2,
            min_pwm: 10,
            max_pwm: 100,
            override_pwm: None,
            emergency_temp_c: Some(55),
            emergency_ssd_temp_c: Some(70),
            emergency_pwm: 100,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentSettings {
                poll_interval_secs: 5.0,
                log_level: "INFO".to_string(),
                status_file: None,
            },
            serial: SerialSettings {
                preferred_port: String::new(),
                baud: 115_200,
                open_timeout_ms: 1000,
                command_timeout_ms: 1000,
                failure_threshold: 3,
                backoff_initial_secs: 1.0,
                backoff_max_secs: 30.0,
                scan_patterns: default_scan_patterns(),
            },
            disks: DiskSettings {
                mode: DiskMode::Host,
                disks_ini: PathBuf::from("/var/local/emhttp/disks.ini"),
                sysfs_root: default_sysfs_root(),
                exclude: Vec::new(),
                simulated: Vec::new(),
            },
            curve: FanCurveConfig::default(),
        }
    }
}
