//! Stat snapshots: the identity/size/mtime triple that change detection
//! runs on

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

/// Identity, size, and modification time of one path at one instant.
///
/// The all-zero value is the sentinel for "path does not currently exist";
/// live files never have inode number zero. Snapshots are immutable values,
/// replaced wholesale on each check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Inode number, or 0 for the sentinel
    pub ino: u64,
    /// File size in bytes
    pub size: u64,
    /// Modification time, whole seconds since the epoch
    pub mtime_sec: i64,
    /// Nanosecond part of the modification time
    pub mtime_nsec: i64,
}

impl StatSnapshot {
    /// The "path does not currently exist" sentinel
    pub const MISSING: StatSnapshot = StatSnapshot {
        ino: 0,
        size: 0,
        mtime_sec: 0,
        mtime_nsec: 0,
    };

    /// Stat a path, mapping every failure to the sentinel.
    ///
    /// A vanished file must read as "missing" rather than as an error so a
    /// check pass can treat deletion as just another observable change.
    pub fn capture(path: impl AsRef<Path>) -> StatSnapshot {
        match fs::metadata(path) {
            Ok(meta) => StatSnapshot {
                ino: meta.ino(),
                size: meta.len(),
                mtime_sec: meta.mtime(),
                mtime_nsec: meta.mtime_nsec(),
            },
            Err(_) => StatSnapshot::MISSING,
        }
    }

    /// Check if the snapshot refers to an existing file
    pub fn exists(&self) -> bool {
        self.ino != 0
    }

    /// Wall-clock modification time, or `None` for the sentinel
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        if !self.exists() {
            return None;
        }
        Utc.timestamp_opt(self.mtime_sec, self.mtime_nsec as u32)
            .single()
    }
}

impl Default for StatSnapshot {
    fn default() -> Self {
        StatSnapshot::MISSING
    }
}
