//! Atomic file writes
//!
//! Writes go to `{name}.tmp`, are fsynced, then renamed over the final name.
//! A crash at any point leaves either the old file, the new file, or an
//! orphaned `.tmp` that startup cleanup removes; never a torn final file.
//!
//! File creation can fail transiently when the platform still holds a handle
//! from a just-closed writer. Creation is retried a bounded number of times
//! with backoff before the failure is surfaced as lock contention.

use crate::dir::StoreDir;
use cleanslate_core::{CoreError, Result};
use std::fs;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for transient creation failures
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_millis(200),
];

fn is_transient(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
    )
}

fn create_with_retry(dir: &StoreDir, name: &str) -> Result<fs::File> {
    let path = dir.file_path(name);
    let mut attempt = 0u32;
    loop {
        match fs::File::create(&path) {
            Ok(file) => return Ok(file),
            Err(e) if is_transient(e.kind()) && (attempt as usize) < RETRY_BACKOFF.len() => {
                warn!(
                    file = name,
                    attempt,
                    error = %e,
                    "transient create failure, backing off"
                );
                std::thread::sleep(RETRY_BACKOFF[attempt as usize]);
                attempt += 1;
            }
            Err(e) if is_transient(e.kind()) => {
                return Err(CoreError::lock_contention(name, attempt));
            }
            Err(e) => return Err(CoreError::Io(e)),
        }
    }
}

/// Write `bytes` to `final_name` atomically: temp file, fsync, rename
///
/// On any failure the temp file is removed; the previous content of
/// `final_name` (if any) is untouched.
pub fn write_atomic(dir: &StoreDir, final_name: &str, bytes: &[u8]) -> Result<()> {
    let tmp_name = format!("{final_name}.tmp");

    // Stale temp from a previous failed attempt
    if dir.exists(&tmp_name) {
        warn!(file = %tmp_name, "removing stale temp file");
        let _ = dir.delete_if_exists(&tmp_name);
    }

    let result = (|| -> Result<()> {
        let mut file = create_with_retry(dir, &tmp_name)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(dir.file_path(&tmp_name), dir.file_path(final_name))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            debug!(file = final_name, bytes = bytes.len(), "atomic write complete");
            Ok(())
        }
        Err(e) => {
            warn!(file = final_name, error = %e, "atomic write failed, cleaning up temp");
            let _ = dir.delete_if_exists(&tmp_name);
            Err(e)
        }
    }
}

/// Rename `old_name` to `new_name` with overwrite semantics
///
/// Implemented as read old, atomically write new, delete old. A direct
/// rename refuses existing targets on some platforms; the read-write-delete
/// sequence guarantees the target is complete before the source disappears,
/// so a mid-rename crash loses nothing.
pub fn rename_file(dir: &StoreDir, old_name: &str, new_name: &str) -> Result<()> {
    if old_name == new_name {
        return Ok(());
    }
    let bytes = dir.read(old_name)?;
    write_atomic(dir, new_name, &bytes)?;
    dir.delete_if_exists(old_name)?;
    debug!(from = old_name, to = new_name, "renamed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir() -> (TempDir, StoreDir) {
        let tmp = TempDir::new().unwrap();
        let store = StoreDir::ensure(tmp.path().join("store")).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_write_atomic_creates_final_file_only() {
        let (_tmp, store) = dir();
        write_atomic(&store, "m.json", b"{\"version\":1}").unwrap();
        assert_eq!(store.read("m.json").unwrap(), b"{\"version\":1}");
        assert!(!store.exists("m.json.tmp"));
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let (_tmp, store) = dir();
        write_atomic(&store, "f.bin", b"old").unwrap();
        write_atomic(&store, "f.bin", b"new contents").unwrap();
        assert_eq!(store.read("f.bin").unwrap(), b"new contents");
    }

    #[test]
    fn test_write_atomic_clears_stale_tmp() {
        let (_tmp, store) = dir();
        std::fs::write(store.file_path("f.bin.tmp"), b"stale").unwrap();
        write_atomic(&store, "f.bin", b"fresh").unwrap();
        assert_eq!(store.read("f.bin").unwrap(), b"fresh");
        assert!(!store.exists("f.bin.tmp"));
    }

    #[test]
    fn test_rename_overwrites_target() {
        let (_tmp, store) = dir();
        write_atomic(&store, "a.arrow", b"source").unwrap();
        write_atomic(&store, "b.arrow", b"target").unwrap();
        rename_file(&store, "a.arrow", "b.arrow").unwrap();
        assert!(!store.exists("a.arrow"));
        assert_eq!(store.read("b.arrow").unwrap(), b"source");
    }

    #[test]
    fn test_rename_to_self_is_noop() {
        let (_tmp, store) = dir();
        write_atomic(&store, "a.arrow", b"x").unwrap();
        rename_file(&store, "a.arrow", "a.arrow").unwrap();
        assert_eq!(store.read("a.arrow").unwrap(), b"x");
    }

    #[test]
    fn test_rename_missing_source_errors() {
        let (_tmp, store) = dir();
        assert!(rename_file(&store, "missing", "dest").is_err());
        assert!(!store.exists("dest"));
    }
}
