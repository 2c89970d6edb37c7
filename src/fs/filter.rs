//! Include/exclude filtering for listed entries

use crate::error::{Result, SyncError};
use crate::fs::Entry;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::time::SystemTime;

/// Raw filter parameters as given on the command line
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    /// Include patterns (empty = everything)
    pub include: Vec<String>,
    /// Exclude patterns
    pub exclude: Vec<String>,
    /// Only entries modified at or after this time
    pub newer_than: Option<SystemTime>,
    /// Only entries modified at or before this time
    pub older_than: Option<SystemTime>,
    /// Minimum entry size
    pub min_size: Option<u64>,
    /// Maximum entry size
    pub max_size: Option<u64>,
}

/// Compiled filter predicate applied by listers
#[derive(Debug, Clone)]
pub struct EntryFilter {
    include: GlobSet,
    exclude: GlobSet,
    newer_than: Option<SystemTime>,
    older_than: Option<SystemTime>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl EntryFilter {
    /// Compile a filter specification
    pub fn new(spec: &FilterSpec) -> Result<Self> {
        Ok(Self {
            include: build_globset(&spec.include)?,
            exclude: build_globset(&spec.exclude)?,
            newer_than: spec.newer_than,
            older_than: spec.older_than,
            min_size: spec.min_size,
            max_size: spec.max_size,
        })
    }

    /// A filter that lets everything through
    pub fn allow_all() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            newer_than: None,
            older_than: None,
            min_size: None,
            max_size: None,
        }
    }

    /// A filter made of exclude patterns only
    pub fn exclude_only(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            exclude: build_globset(patterns)?,
            ..Self::allow_all()
        })
    }

    /// Does the entry pass the filter?
    pub fn matches(&self, entry: &Entry) -> bool {
        if !self.include.is_empty() && !self.include.is_match(&entry.key) {
            return false;
        }
        if self.exclude.is_match(&entry.key) {
            return false;
        }
        if let Some(newer) = self.newer_than {
            if entry.modified < newer {
                return false;
            }
        }
        if let Some(older) = self.older_than {
            if entry.modified > older {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if entry.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if entry.size > max {
                return false;
            }
        }
        true
    }

    /// Is the key matched by any exclude pattern?
    pub fn is_excluded(&self, key: &str) -> bool {
        self.exclude.is_match(key)
    }
}

/// Build a GlobSet from patterns
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            SyncError::validation(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::validation(format!("failed to build glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn entry(key: &str, size: u64, secs: u64) -> Entry {
        Entry::file(key, size, UNIX_EPOCH + Duration::from_secs(secs))
    }

    #[test]
    fn test_include_exclude() {
        let filter = EntryFilter::new(&FilterSpec {
            include: vec!["*.jpg".into(), "docs/**".into()],
            exclude: vec!["**/private/**".into()],
            ..Default::default()
        })
        .unwrap();

        assert!(filter.matches(&entry("a.jpg", 1, 0)));
        assert!(filter.matches(&entry("docs/readme.md", 1, 0)));
        assert!(!filter.matches(&entry("notes.txt", 1, 0)));
        assert!(!filter.matches(&entry("docs/private/key.md", 1, 0)));
    }

    #[test]
    fn test_time_and_size_bounds() {
        let filter = EntryFilter::new(&FilterSpec {
            newer_than: Some(UNIX_EPOCH + Duration::from_secs(100)),
            older_than: Some(UNIX_EPOCH + Duration::from_secs(200)),
            max_size: Some(10),
            ..Default::default()
        })
        .unwrap();

        assert!(filter.matches(&entry("a", 5, 150)));
        assert!(!filter.matches(&entry("a", 5, 50)));
        assert!(!filter.matches(&entry("a", 5, 250)));
        assert!(!filter.matches(&entry("a", 50, 150)));
    }

    #[test]
    fn test_invalid_glob() {
        let err = EntryFilter::exclude_only(&["a[".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
