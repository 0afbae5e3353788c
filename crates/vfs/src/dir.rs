//! Directory handle for the persistent store
//!
//! `StoreDir` wraps one directory and exposes the small set of operations the
//! snapshot store needs. Paths never escape the directory: callers pass bare
//! file names, not paths.

use cleanslate_core::{CoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Subdirectory
    Directory,
}

/// Handle to one directory of the persistent store
#[derive(Debug, Clone)]
pub struct StoreDir {
    root: PathBuf,
}

impl StoreDir {
    /// Open a directory handle, creating the directory (and parents) if needed
    pub fn ensure(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Handle to a nested subdirectory, created if needed
    pub fn subdir(&self, name: &str) -> Result<StoreDir> {
        StoreDir::ensure(self.root.join(name))
    }

    /// Absolute path of a file inside this directory
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether a file exists
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    /// Size of a file in bytes, or None if it does not exist
    pub fn file_size(&self, name: &str) -> Option<u64> {
        fs::metadata(self.file_path(name)).ok().map(|m| m.len())
    }

    /// Read a whole file
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_path(name))?)
    }

    /// Read the first `n` bytes of a file (fewer if the file is shorter)
    pub fn read_prefix(&self, name: &str, n: usize) -> Result<Vec<u8>> {
        use std::io::Read;
        let mut file = fs::File::open(self.file_path(name))?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = file.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Delete a file; no-op if it does not exist
    pub fn delete_if_exists(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file_path(name)) {
            Ok(()) => {
                debug!(file = name, "deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Enumerate entries: file names and kinds
    ///
    /// Entries that disappear mid-listing are skipped. Order is unspecified.
    pub fn list_entries(&self) -> Result<Vec<(String, EntryKind)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => EntryKind::Directory,
                Ok(t) if t.is_file() => EntryKind::File,
                _ => continue,
            };
            if let Some(name) = entry.file_name().to_str() {
                entries.push((name.to_string(), kind));
            }
        }
        Ok(entries)
    }

    /// Enumerate file names only
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self
            .list_entries()?
            .into_iter()
            .filter(|(_, k)| *k == EntryKind::File)
            .map(|(n, _)| n)
            .collect())
    }
}
