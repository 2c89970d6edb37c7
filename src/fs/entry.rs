//! Listed entries
//!
//! An entry is an immutable snapshot of one file or object taken at listing
//! time. Local and remote listers produce the same type.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Metadata for a single file or object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Slash-separated path relative to the listing root, the sort key
    pub key: String,
    /// Explicit directory marker (remote keys ending in `/`)
    pub is_dir_marker: bool,
    /// Size in bytes
    pub size: u64,
    /// Modification time
    pub modified: SystemTime,
    /// Storage class (remote only)
    pub storage_class: Option<String>,
    /// ETag reported by the backend (remote only)
    pub etag: Option<String>,
    /// Resolved path when the entry was reached through a symlink (local only)
    pub local_real_path: Option<PathBuf>,
}

impl Entry {
    /// A plain file entry
    pub fn file(key: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            key: key.into(),
            is_dir_marker: false,
            size,
            modified,
            storage_class: None,
            etag: None,
            local_real_path: None,
        }
    }

    /// A directory marker entry
    pub fn dir_marker(key: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            is_dir_marker: true,
            ..Self::file(key, 0, modified)
        }
    }

    /// Modification time in whole seconds since the epoch
    pub fn mtime_secs(&self) -> i64 {
        system_time_secs(self.modified)
    }
}

/// Whole seconds since the epoch, negative before it
pub fn system_time_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Inverse of [`system_time_secs`]
pub fn secs_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtime_secs_truncates() {
        let t = UNIX_EPOCH + Duration::from_millis(10_999);
        let entry = Entry::file("a.txt", 1, t);
        assert_eq!(entry.mtime_secs(), 10);
        assert_eq!(secs_to_system_time(-5), UNIX_EPOCH - Duration::from_secs(5));
        assert_eq!(system_time_secs(secs_to_system_time(-5)), -5);
    }

    #[test]
    fn test_dir_marker() {
        let marker = Entry::dir_marker("photos/", UNIX_EPOCH);
        assert!(marker.is_dir_marker);
        assert_eq!(marker.size, 0);
    }
}
