//! Status snapshot published after every control cycle.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::curve::DecisionSource;
use crate::serial::events::CountersSnapshot;
use crate::serial::TransportStatus;
use crate::telemetry::types::DriveRecord;

/// Everything an external reader may see. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Local>,
    pub cycle: u64,
    pub representative_temp: Option<i32>,
    /// PWM the curve asked for this cycle.
    pub target_pwm: Option<u8>,
    /// Last PWM the controller acknowledged.
    pub last_sent_pwm: Option<u8>,
    pub decision: Option<DecisionSource>,
    pub override_pwm: Option<u8>,
    pub drives: Vec<DriveRecord>,
    pub connection: TransportStatus,
    pub last_error: Option<String>,
    pub counters: CountersSnapshot,
}

impl StatusSnapshot {
    /// Snapshot before the first cycle has run.
    pub fn initial(connection: TransportStatus, override_pwm: Option<u8>) -> Self {
        Self {
            timestamp: Local::now(),
            cycle: 0,
            representative_temp: None,
            target_pwm: None,
            last_sent_pwm: None,
            decision: None,
            override_pwm,
            drives: Vec::new(),
            connection,
            last_error: None,
            counters: CountersSnapshot::default(),
        }
    }

    /// No error this cycle and the controller link is open.
    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none() && self.connection.state.is_open()
    }
}

/// Write the snapshot as pretty JSON. Readers never see a half-written file.
pub async fn write_status_file(path: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize status")?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create status directory: {:?}", dir))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write status file: {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move status file into place: {:?}", path))?;
    Ok(())
}
