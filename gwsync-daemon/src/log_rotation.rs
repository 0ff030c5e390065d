//! Size-based rotation of the debug log.
//!
//! The live file is rotated once it exceeds 10 MiB; at most 5 rotated copies
//! are kept (`debug.log` → `debug.log.1` → … → `debug.log.5`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated copies to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size exceeds `max_bytes`.
///
/// The oldest copy is dropped, every `<name>.<n>` moves to `<name>.<n+1>`,
/// the live file becomes `<name>.1` and a fresh empty file takes its place.
///
/// Returns `false` when the file is under the threshold or does not exist.
pub fn rotate_if_needed(
    log_path: &Path,
    max_bytes: u64,
    max_files: usize,
) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        let dst = numbered_path(log_path, n + 1);
        if src.exists() {
            fs::rename(&src, &dst)?;
        }
    }

    fs::rename(log_path, numbered_path(log_path, 1))?;

    fs::File::create(log_path)?;

    Ok(true)
}

/// Rotate the debug log if needed. Failures are logged, never returned.
pub fn rotate_debug_log(log_path: &Path) {
    match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "debug log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "debug log rotation failed")
        }
    }
}

/// Path of the `n`-th rotated copy of `base` (e.g. `debug.log.2`).
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("debug.log");
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: u64 = 16;

    fn write(path: &Path, bytes: usize) {
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn small_or_missing_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("debug.log");
        assert!(!rotate_if_needed(&log, SMALL, 3).unwrap());

        write(&log, 8);
        assert!(!rotate_if_needed(&log, SMALL, 3).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_file_moves_to_first_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("debug.log");
        write(&log, 32);

        assert!(rotate_if_needed(&log, SMALL, 3).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), 32);
    }

    #[test]
    fn copies_shift_and_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("debug.log");
        for round in 1..=4u8 {
            fs::write(&log, vec![b'0' + round; 32]).unwrap();
            rotate_if_needed(&log, SMALL, 3).unwrap();
        }

        assert!(!numbered_path(&log, 4).exists());
        // Newest content sits in .1, the first round has been dropped.
        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap()[0], b'4');
        assert_eq!(fs::read(numbered_path(&log, 3)).unwrap()[0], b'2');
    }

    #[test]
    fn defaults_match_documented_limits() {
        assert_eq!(MAX_LOG_BYTES, 10 * 1024 * 1024);
        assert_eq!(MAX_ROTATED_FILES, 5);
    }
}
