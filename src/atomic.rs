//! Atomic file replacement.
//!
//! Every write that lands in the archive goes through a temporary file in the
//! destination directory and is renamed into place, so readers never observe
//! a half-written asset and an interrupted run leaves the previous file intact.

use std::io::{self, Write};
use std::path::Path;

/// Write `bytes` to `path` through a sibling temporary file and an atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)?;

    temp_file.write_all(bytes)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(path).map_err(|e| e.error)?;

    // Fsync parent directory so the rename survives a crash
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Whether a directory entry is an in-flight temporary file from [`write_atomic`].
pub fn is_partial_file(name: &str) -> bool {
    name.starts_with(".partial-")
}
