//! Disk snapshot sources: where the raw disks.ini text comes from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::trace;

use crate::config::types::{DiskMode, DiskSettings, SimulatedDrive};

#[async_trait]
pub trait DiskSource: Send + Sync {
    /// Current drive-state export as text. Missing data is an empty string, not an error.
    async fn read_text(&self) -> Result<String>;

    /// Whether records from this source should be enriched from the host's sysfs.
    fn is_host(&self) -> bool {
        false
    }
}

/// Reads the host's disks.ini export.
pub struct IniFileSource {
    path: PathBuf,
}

impl IniFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DiskSource for IniFileSource {
    async fn read_text(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                trace!("Read {} bytes from {:?}", text.len(), self.path);
                Ok(text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).context(format!("Failed to read disk state: {:?}", self.path)),
        }
    }

    fn is_host(&self) -> bool {
        true
    }
}

/// Renders drives listed in config as disks.ini text.
pub struct SimulatedSource {
    drives: Vec<SimulatedDrive>,
}

impl SimulatedSource {
    pub fn new(drives: Vec<SimulatedDrive>) -> Self {
        Self { drives }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, drive) in self.drives.iter().enumerate() {
            let name = drive.name.clone().unwrap_or_else(|| format!("disk{}", i + 1));
            let temp = drive.temp.map(|t| t.to_string()).unwrap_or_else(|| "*".to_string());
            out.push_str(&format!(
                "[\"{name}\"]\nname=\"{name}\"\ndevice=\"{}\"\ntemp=\"{temp}\"\nspundown=\"{}\"\n",
                drive.device,
                if drive.spundown { 1 } else { 0 },
            ));
        }
        out
    }
}

#[async_trait]
impl DiskSource for SimulatedSource {
    async fn read_text(&self) -> Result<String> {
        Ok(self.render())
    }
}

pub fn from_settings(settings: &DiskSettings) -> Box<dyn DiskSource> {
    match settings.mode {
        DiskMode::Host => Box::new(IniFileSource::new(settings.disks_ini.clone())),
        DiskMode::Simulated => Box::new(SimulatedSource::new(settings.simulated.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::reader;
    use std::collections::HashSet;

    #[tokio::test]
    async fn missing_ini_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = IniFileSource::new(dir.path().join("disks.ini"));
        assert_eq!(source.read_text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn reads_existing_ini() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disks.ini");
        std::fs::write(&path, "[\"disk1\"]\ndevice=\"sdb\"\ntemp=\"30\"\n").unwrap();
        let text = IniFileSource::new(&path).read_text().await.unwrap();
        assert_eq!(reader::read(&text, &HashSet::new())[0].temperature, Some(30));
    }

    #[tokio::test]
    async fn simulated_drives_round_trip_through_reader() {
        let source = SimulatedSource::new(vec![
            SimulatedDrive { device: "sdb".into(), name: None, temp: Some(38), spundown: false },
            SimulatedDrive { device: "sdc".into(), name: Some("parity".into()), temp: None, spundown: true },
        ]);
        let drives = reader::read(&source.read_text().await.unwrap(), &HashSet::new());
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0].slot.as_deref(), Some("disk1"));
        assert_eq!(drives[0].temperature, Some(38));
        assert!(drives[1].power_state.is_spun_down());
        assert!(!source.is_host());
    }
}
