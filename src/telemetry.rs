//! Drive telemetry: disks.ini parsing, snapshot sources, and sysfs enrichment.

pub mod reader;
pub mod source;
pub mod sysfs;
pub mod types;

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;

use source::DiskSource;
use types::DriveRecord;

/// Read the source, parse it, and enrich host records from sysfs.
pub async fn collect(
    source: &dyn DiskSource,
    exclude: &HashSet<String>,
    sysfs_root: &Path,
) -> Result<Vec<DriveRecord>> {
    let text = source.read_text().await?;
    let records = reader::read(&text, exclude);
    if source.is_host() {
        Ok(sysfs::enrich(records, sysfs_root).await)
    } else {
        Ok(records)
    }
}
