//! Startup cleanup
//!
//! Runs once at boot, before any snapshot is read. Each step swallows its
//! own failures with a warning — cleanup must never block startup:
//!
//! (a) orphaned `*.tmp` files from interrupted atomic writes
//! (b) undersized files: `.arrow` under 8 bytes, `_manifest.json` under 10
//! (c) orphaned `_diff_*` working files
//! (d) shard filenames whose case-insensitive forms collide: only the
//!     fully-lowercase member survives (snapshot ids are lowercase on disk,
//!     so mixed-case duplicates are strays from older builds)

use crate::store::SnapshotStore;
use cleanslate_core::{MIN_MANIFEST_BYTES, MIN_SHARD_BYTES};
use std::collections::HashMap;
use tracing::{info, warn};

/// What cleanup removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Orphaned temp files removed
    pub temp_files: Vec<String>,
    /// Undersized shard/manifest files removed
    pub undersized: Vec<String>,
    /// Orphaned diff working files removed
    pub diff_orphans: Vec<String>,
    /// Mixed-case shard duplicates removed
    pub case_collisions: Vec<String>,
}

impl CleanupReport {
    /// Total files removed
    pub fn total(&self) -> usize {
        self.temp_files.len()
            + self.undersized.len()
            + self.diff_orphans.len()
            + self.case_collisions.len()
    }
}

impl SnapshotStore {
    /// Run the full cleanup pass; never fails
    pub fn startup_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let names = match self.dir().list_files() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "cleanup could not list the snapshots directory");
                return report;
            }
        };

        // (a) interrupted atomic writes
        for name in &names {
            if name.ends_with(".tmp") {
                self.remove_quietly(name, &mut report.temp_files);
            }
        }

        // (b) undersized files
        for name in &names {
            if name.ends_with(".tmp") {
                continue;
            }
            let floor = if name.ends_with(".arrow") {
                Some(MIN_SHARD_BYTES)
            } else if name.ends_with("_manifest.json") {
                Some(MIN_MANIFEST_BYTES)
            } else {
                None
            };
            if let Some(floor) = floor {
                if let Some(size) = self.dir().file_size(name) {
                    if size < floor {
                        self.remove_quietly(name, &mut report.undersized);
                    }
                }
            }
        }

        // (c) diff working files never persist across runs
        for name in &names {
            if name.starts_with("_diff_") && !name.ends_with(".tmp") {
                self.remove_quietly(name, &mut report.diff_orphans);
            }
        }

        // (d) case-insensitive collision groups keep the lowercase member
        let mut groups: HashMap<String, Vec<&String>> = HashMap::new();
        for name in &names {
            if name.contains("_shard_") && name.ends_with(".arrow") {
                groups.entry(name.to_lowercase()).or_default().push(name);
            }
        }
        for (lower, members) in groups {
            if members.len() < 2 || !members.iter().any(|m| **m == lower) {
                continue;
            }
            for member in members {
                if *member != lower {
                    self.remove_quietly(member, &mut report.case_collisions);
                }
            }
        }

        if report.total() > 0 {
            info!(
                temp = report.temp_files.len(),
                undersized = report.undersized.len(),
                diff = report.diff_orphans.len(),
                case = report.case_collisions.len(),
                "startup cleanup removed files"
            );
        }
        report
    }

    fn remove_quietly(&self, name: &str, bucket: &mut Vec<String>) {
        match self.dir().delete_if_exists(name) {
            Ok(()) => bucket.push(name.to_string()),
            Err(e) => warn!(file = name, error = %e, "cleanup could not remove file"),
        }
    }
}
