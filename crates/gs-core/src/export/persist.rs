//! Local persistence of accepted exports.

use gs_common::EventId;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Target file for an event's export: `<id>.csv`, or
/// `export-<unix_millis>.csv` when the id yields no usable file name.
pub fn export_path(output_dir: &Path, event_id: &EventId) -> PathBuf {
    let name = match event_id.file_stem() {
        Some(stem) => format!("{}.csv", stem),
        None => format!("export-{}.csv", chrono::Utc::now().timestamp_millis()),
    };
    output_dir.join(name)
}

/// Write the export atomically and return its path.
pub fn persist_export(
    output_dir: &Path,
    event_id: &EventId,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = export_path(output_dir, event_id);
    write_atomic(&path, bytes)?;
    Ok(path)
}

/// Temp file next to the target, then rename over it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("export.csv");
    // Workers share a pid; the counter keeps their temp names apart.
    let tmp_path = path.with_file_name(format!(
        "{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        if let Err(e) = file.write_all(bytes) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        let _ = file.sync_all();
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
