//! disks.ini parser.
//! Converts the host's drive-state export into DriveRecords without ever failing:
//! a broken section becomes a record with an unknown temperature.
//!
//! Input:
//! ```text
//! ["disk1"]
//! name="disk1"
//! device="sdb"
//! id="WDC_WD80EFAX_VAGX1234"
//! temp="34"
//! spundown="0"
//! rotational="1"
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::TelemetryParseWarning;

use super::types::{DriveKind, DriveRecord, PowerState};

/// Readings outside this range are sensor garbage, not temperatures.
pub const MIN_VALID_TEMP_C: i32 = 0;
pub const MAX_VALID_TEMP_C: i32 = 120;

#[derive(Debug, Default)]
struct RawSection {
    name: String,
    keys: HashMap<String, String>,
    bad_lines: Vec<usize>,
}

/// Strip one level of matching single or double quotes.
pub(crate) fn unquote(value: &str) -> &str {
    let v = value.trim();
    let bytes = v.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return v[1..v.len() - 1].trim();
        }
    }
    v
}

fn split_sections(text: &str) -> Vec<RawSection> {
    let mut sections: Vec<RawSection> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(RawSection {
                name: unquote(header).to_string(),
                ..RawSection::default()
            });
            continue;
        }

        let Some(current) = sections.last_mut() else {
            debug!("disks.ini line {} outside any section, ignored", idx + 1);
            continue;
        };

        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                current.keys.insert(key.trim().to_lowercase(), unquote(value).to_string());
            }
            _ => current.bad_lines.push(idx + 1),
        }
    }

    sections
}

fn parse_temperature(raw: Option<&str>) -> Result<Option<i32>, String> {
    match raw.map(str::trim) {
        None | Some("") | Some("*") => Ok(None),
        Some(value) => match value.parse::<i32>() {
            Ok(t) if (MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&t) => Ok(Some(t)),
            Ok(t) => Err(format!("temperature {} outside {}..={}", t, MIN_VALID_TEMP_C, MAX_VALID_TEMP_C)),
            Err(_) => Err(format!("unreadable temperature {:?}", value)),
        },
    }
}

fn parse_power_state(raw: Option<&str>) -> PowerState {
    match raw.map(str::trim) {
        Some("1") => PowerState::Standby,
        Some("0") => PowerState::Active,
        _ => PowerState::Unknown,
    }
}

fn parse_kind(rotational: Option<&str>, device: &str) -> DriveKind {
    match rotational.map(str::trim) {
        Some("1") => DriveKind::Hdd,
        Some("0") => DriveKind::Ssd,
        _ if device.starts_with("nvme") => DriveKind::Ssd,
        _ => DriveKind::Unknown,
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn resolve_section(section: RawSection, exclude: &HashSet<String>) -> DriveRecord {
    let device = non_empty(section.keys.get("device"));
    let slot = non_empty(section.keys.get("name"));
    let serial = non_empty(section.keys.get("id"));

    let id = device
        .clone()
        .or_else(|| serial.clone())
        .unwrap_or_else(|| section.name.clone());

    let mut reasons = Vec::new();
    if !section.bad_lines.is_empty() {
        reasons.push(format!("unparseable lines {:?}", section.bad_lines));
    }
    if device.is_none() {
        reasons.push("missing device".to_string());
    }

    let temperature = match parse_temperature(section.keys.get("temp").map(String::as_str)) {
        Ok(t) => t,
        Err(reason) => {
            reasons.push(reason);
            None
        }
    };

    // A section we could not fully trust never reports a temperature.
    let temperature = if reasons.is_empty() { temperature } else { None };

    let warning = if reasons.is_empty() {
        None
    } else {
        let warning = TelemetryParseWarning {
            section: section.name.clone(),
            reason: reasons.join(", "),
        };
        debug!("Telemetry parse warning: {}", warning);
        Some(warning)
    };

    let excluded = [Some(&id), slot.as_ref(), serial.as_ref()]
        .into_iter()
        .flatten()
        .any(|key| exclude.contains(key));

    DriveRecord {
        kind: parse_kind(section.keys.get("rotational").map(String::as_str), &id),
        power_state: parse_power_state(section.keys.get("spundown").map(String::as_str)),
        id,
        slot,
        serial,
        temperature,
        excluded,
        warning,
    }
}

/// Parse a disks.ini export. Records come back in file order; excluded drives are kept and flagged.
pub fn read(source_text: &str, exclude: &HashSet<String>) -> Vec<DriveRecord> {
    split_sections(source_text)
        .into_iter()
        .map(|section| resolve_section(section, exclude))
        .collect()
}
