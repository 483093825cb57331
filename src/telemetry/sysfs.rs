//! Host enrichment from sysfs: spin state, NVMe temperatures, rotational flag.
//! Only ever fills gaps or marks drives as spun down; it never raises a temperature
//! for a drive the export already reported.

use std::path::{Path, PathBuf};

use tracing::trace;

use super::reader::{MAX_VALID_TEMP_C, MIN_VALID_TEMP_C};
use super::types::{DriveKind, DriveRecord, PowerState};

async fn read_trimmed(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok().map(|s| s.trim().to_string())
}

fn block_dir(root: &Path, dev: &str) -> PathBuf {
    root.join("block").join(dev)
}

/// Spin state reported by the kernel, if it says anything useful.
pub async fn spin_state(root: &Path, dev: &str) -> Option<PowerState> {
    if let Some(state) = read_trimmed(&block_dir(root, dev).join("device/state")).await {
        let s = state.to_lowercase();
        if s.contains("running") || s.contains("active") {
            return Some(PowerState::Active);
        }
        if s.contains("standby") {
            return Some(PowerState::Standby);
        }
        if s.contains("offline") || s.contains("suspended") {
            return Some(PowerState::Sleeping);
        }
    }

    if let Some(status) = read_trimmed(&block_dir(root, dev).join("power/runtime_status")).await {
        let s = status.to_lowercase();
        if s.contains("active") {
            return Some(PowerState::Active);
        }
        if s.contains("suspend") {
            return Some(PowerState::Sleeping);
        }
    }

    None
}

/// "nvme0n1" -> "nvme0"
fn nvme_controller(dev: &str) -> Option<String> {
    let rest = dev.strip_prefix("nvme")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("nvme{}", digits))
    }
}

/// First plausible hwmon temperature for an NVMe namespace.
pub async fn nvme_temperature(root: &Path, dev: &str) -> Option<i32> {
    let ctrl = nvme_controller(dev)?;
    let pattern = root
        .join("class/nvme")
        .join(&ctrl)
        .join("device/hwmon/hwmon*/temp*_input");
    let mut inputs: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .ok()?
        .filter_map(Result::ok)
        .collect();
    inputs.sort();

    for input in inputs {
        let Some(raw) = read_trimmed(&input).await else { continue };
        let Ok(mut value) = raw.parse::<i32>() else { continue };
        if value > 1000 {
            value /= 1000;
        }
        if (MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&value) {
            trace!("NVMe {} temperature {}°C from {:?}", dev, value, input);
            return Some(value);
        }
    }
    None
}

pub async fn drive_kind(root: &Path, dev: &str) -> DriveKind {
    if dev.starts_with("nvme") {
        return DriveKind::Ssd;
    }
    match read_trimmed(&block_dir(root, dev).join("queue/rotational")).await.as_deref() {
        Some("1") => DriveKind::Hdd,
        Some("0") => DriveKind::Ssd,
        _ => DriveKind::Unknown,
    }
}

/// Fill in what the export left out. Records with parse warnings are passed through untouched.
pub async fn enrich(records: Vec<DriveRecord>, root: &Path) -> Vec<DriveRecord> {
    let mut out = Vec::with_capacity(records.len());

    for mut record in records {
        if record.warning.is_some() {
            out.push(record);
            continue;
        }
        let dev = record.id.clone();

        if !record.power_state.is_spun_down() {
            match spin_state(root, &dev).await {
                Some(state) if state.is_spun_down() => record.power_state = state,
                Some(PowerState::Active) if record.power_state == PowerState::Unknown => {
                    record.power_state = PowerState::Active;
                }
                _ => {}
            }
        }

        if record.temperature.is_none() && !record.power_state.is_spun_down() && dev.starts_with("nvme") {
            record.temperature = nvme_temperature(root, &dev).await;
        }

        if record.kind == DriveKind::Unknown {
            record.kind = drive_kind(root, &dev).await;
        }

        out.push(record);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::reader;
    use std::collections::HashSet;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn controller_name_strips_namespace() {
        assert_eq!(nvme_controller("nvme0n1").as_deref(), Some("nvme0"));
        assert_eq!(nvme_controller("nvme12n3").as_deref(), Some("nvme12"));
        assert_eq!(nvme_controller("sda"), None);
    }

    #[tokio::test]
    async fn suspended_drive_is_marked_sleeping() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "block/sdb/device/state", "suspended\n");
        let records = reader::read("[d]\ndevice=sdb\ntemp=40\nspundown=0\n", &HashSet::new());

        let enriched = enrich(records, root.path()).await;
        assert_eq!(enriched[0].power_state, PowerState::Sleeping);
        assert!(!enriched[0].is_eligible());
    }

    #[tokio::test]
    async fn nvme_temperature_fills_gap() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "class/nvme/nvme0/device/hwmon/hwmon3/temp1_input", "43850\n");
        let records = reader::read("[cache]\ndevice=nvme0n1\ntemp=*\n", &HashSet::new());

        let enriched = enrich(records, root.path()).await;
        assert_eq!(enriched[0].temperature, Some(43));
        assert_eq!(enriched[0].kind, DriveKind::Ssd);
    }

    #[tokio::test]
    async fn rotational_flag_sets_kind() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "block/sdc/queue/rotational", "0\n");
        write(root.path(), "block/sdc/power/runtime_status", "active\n");
        let records = reader::read("[d]\ndevice=sdc\ntemp=31\n", &HashSet::new());

        let enriched = enrich(records, root.path()).await;
        assert_eq!(enriched[0].kind, DriveKind::Ssd);
        assert_eq!(enriched[0].power_state, PowerState::Active);
        assert_eq!(enriched[0].temperature, Some(31));
    }

    #[tokio::test]
    async fn missing_sysfs_changes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let records = reader::read("[d]\ndevice=sdd\ntemp=35\nspundown=0\nrotational=1\n", &HashSet::new());
        let enriched = enrich(records.clone(), root.path()).await;
        assert_eq!(enriched, records);
    }
}
