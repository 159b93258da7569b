//! Atomic JSON report writing.
//!
//! Reports are serialized through a temp file in the destination
//! directory and renamed over the final path, so readers observe either
//! the previous contents or the new contents in full.

use mc_common::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Serialize `report` as pretty JSON and atomically replace `path`.
pub fn write_report_atomic<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp_")
        .suffix(".json")
        .tempfile_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, report)
        .map_err(|e| mc_common::Error::Internal(format!("report serialization: {e}")))?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| mc_common::Error::Io(e.error))?;
    Ok(())
}
