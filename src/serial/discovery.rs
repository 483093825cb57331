//! Serial port discovery: candidate ordering over preferred, last-good, and scanned paths.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// USB descriptor of the device behind a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbInfo {
    /// Resolved tty node (by-id symlinks are followed).
    pub device: String,
    pub vid: u16,
    pub pid: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

/// Lists device paths matching a set of glob patterns.
pub trait PortScanner: Send + Sync {
    fn scan(&self, patterns: &[String]) -> Vec<String>;

    /// USB descriptor for `port`; `None` for non-USB or unknown ports.
    fn usb_info(&self, _port: &str) -> Option<UsbInfo> {
        None
    }
}

/// Filesystem scanner backed by `glob`.
pub struct GlobScanner;

impl PortScanner for GlobScanner {
    fn scan(&self, patterns: &[String]) -> Vec<String> {
        let mut found = Vec::new();
        for pattern in patterns {
            let Ok(paths) = glob::glob(pattern) else {
                trace!("Skipping invalid scan pattern {:?}", pattern);
                continue;
            };
            let mut matched: Vec<String> = paths
                .filter_map(Result::ok)
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            matched.sort();
            found.extend(matched);
        }
        found
    }

    fn usb_info(&self, port: &str) -> Option<UsbInfo> {
        let device = std::fs::canonicalize(port)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| port.to_string());
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                trace!("Port enumeration failed: {}", e);
                return None;
            }
        };
        let info = ports.into_iter().find(|p| p.port_name == device || p.port_name == port)?;
        match info.port_type {
            tokio_serial::SerialPortType::UsbPort(usb) => Some(UsbInfo {
                device,
                vid: usb.vid,
                pid: usb.pid,
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            }),
            _ => None,
        }
    }
}

/// On-board UARTs, never a USB CDC fan controller.
pub fn is_ignored_port(path: &str) -> bool {
    path.starts_with("/dev/ttyS")
}

/// Ordered, de-duplicated candidates: preferred, then last-good, then the scan
/// (lexical within each pattern, patterns in configured order).
pub fn candidates(
    preferred: &str,
    last_good: Option<&str>,
    scanner: &dyn PortScanner,
    patterns: &[String],
) -> Vec<String> {
    let preferred = preferred.trim();
    let scanned = scanner.scan(patterns);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let ordered = std::iter::once(preferred)
        .chain(last_good)
        .chain(scanned.iter().map(String::as_str));

    for path in ordered {
        if path.is_empty() || is_ignored_port(path) {
            continue;
        }
        if seen.insert(path.to_string()) {
            out.push(path.to_string());
        }
    }
    out
}
