//! Lazy, key-ordered walk of a local directory tree

use crate::error::SyncError;
use crate::fs::{Entry, EntryFilter, EntrySource, Listing};
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Lister over a local directory tree
///
/// Siblings are visited in the order of the keys they produce, with
/// directories compared as `name/`, so the whole walk comes out in byte
/// order of the full key. Directories themselves are never yielded.
pub struct LocalLister {
    root: PathBuf,
    walker: Option<walkdir::IntoIter>,
    filter: EntryFilter,
    done: bool,
}

impl LocalLister {
    /// Create a lister rooted at `root`
    ///
    /// A root that does not exist lists as empty.
    pub fn new(root: &Path, filter: EntryFilter, follow_symlinks: bool) -> Self {
        let walker = root.is_dir().then(|| {
            WalkDir::new(root)
                .min_depth(1)
                .follow_links(follow_symlinks)
                .sort_by(compare_siblings)
                .into_iter()
        });

        Self {
            root: root.to_path_buf(),
            walker,
            filter,
            done: false,
        }
    }

    fn key_for(&self, path: &Path) -> Result<String, SyncError> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut parts = Vec::new();
        for component in relative.components() {
            if let Component::Normal(name) = component {
                let name = name.to_str().ok_or_else(|| {
                    SyncError::Listing(format!("non UTF-8 file name: {}", path.display()))
                })?;
                parts.push(name);
            }
        }
        Ok(parts.join("/"))
    }

    fn to_entry(&self, dent: &DirEntry) -> Result<Entry, SyncError> {
        let key = self.key_for(dent.path())?;
        let metadata = dent.metadata().map_err(|err| {
            let vanished = err
                .io_error()
                .map(|e| e.kind() == std::io::ErrorKind::NotFound)
                .unwrap_or(false);
            if vanished {
                SyncError::NotFound(dent.path().to_path_buf())
            } else {
                SyncError::Listing(format!("stat {}: {}", dent.path().display(), err))
            }
        })?;

        let mut entry = Entry::file(
            key,
            metadata.len(),
            metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
        );
        if dent.path_is_symlink() {
            entry.local_real_path = std::fs::canonicalize(dent.path()).ok();
        }
        Ok(entry)
    }
}

impl EntrySource for LocalLister {
    fn next_listing(&mut self) -> Listing {
        if self.done {
            return Listing::End;
        }

        loop {
            let next = match self.walker.as_mut() {
                Some(walker) => walker.next(),
                None => None,
            };

            let dent = match next {
                None => {
                    self.done = true;
                    return Listing::End;
                }
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    let vanished = err
                        .io_error()
                        .map(|e| e.kind() == std::io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    if vanished {
                        return Listing::Vanished {
                            key: self.key_for(&path).unwrap_or_else(|_| path.display().to_string()),
                            error: SyncError::NotFound(path),
                        };
                    }
                    self.done = true;
                    return Listing::Error(SyncError::Listing(format!(
                        "walking {}: {}",
                        path.display(),
                        err
                    )));
                }
                Some(Ok(dent)) => dent,
            };

            // Directories are implicit in their children's keys; symlinks
            // that are not followed and special files are skipped.
            if !dent.file_type().is_file() {
                continue;
            }

            match self.to_entry(&dent) {
                Ok(entry) if self.filter.matches(&entry) => return Listing::Entry(entry),
                Ok(_) => continue,
                Err(err) if err.is_vanished() => {
                    return Listing::Vanished {
                        key: self
                            .key_for(dent.path())
                            .unwrap_or_else(|_| dent.path().display().to_string()),
                        error: err,
                    };
                }
                Err(err) => {
                    self.done = true;
                    return Listing::Error(err);
                }
            }
        }
    }
}

/// Order siblings by the key bytes they contribute
fn compare_siblings(a: &DirEntry, b: &DirEntry) -> Ordering {
    sort_name(a).cmp(&sort_name(b))
}

fn sort_name(entry: &DirEntry) -> Vec<u8> {
    let mut name = entry.file_name().as_encoded_bytes().to_vec();
    if entry.file_type().is_dir() {
        name.push(b'/');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FilterSpec;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap().write_all(content).unwrap();
    }

    fn collect_keys(lister: &mut LocalLister) -> Vec<String> {
        let mut keys = Vec::new();
        loop {
            match lister.next_listing() {
                Listing::Entry(e) => keys.push(e.key),
                Listing::DirectoryMarker(_) => panic!("local walks never emit markers"),
                Listing::End => return keys,
                Listing::Vanished { key, .. } => panic!("unexpected vanished {}", key),
                Listing::Error(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn test_walk_is_key_ordered() {
        let dir = TempDir::new().unwrap();
        for name in ["ab", "a/b", "a.txt", "a-c", "a/z/deep.bin", "a/c"] {
            create_file(dir.path(), name, b"x");
        }
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let mut lister = LocalLister::new(dir.path(), EntryFilter::allow_all(), false);
        let keys = collect_keys(&mut lister);

        assert_eq!(keys, vec!["a-c", "a.txt", "a/b", "a/c", "a/z/deep.bin", "ab"]);
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_walk_applies_filter() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "keep.txt", b"keep");
        create_file(dir.path(), "skip.tmp", b"skip");
        create_file(dir.path(), "sub/keep2.txt", b"keep");

        let filter = EntryFilter::new(&FilterSpec {
            exclude: vec!["*.tmp".to_string()],
            ..Default::default()
        })
        .unwrap();
        let mut lister = LocalLister::new(dir.path(), filter, false);

        assert_eq!(collect_keys(&mut lister), vec!["keep.txt", "sub/keep2.txt"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut lister =
            LocalLister::new(&dir.path().join("missing"), EntryFilter::allow_all(), false);
        assert!(matches!(lister.next_listing(), Listing::End));
    }

    #[test]
    fn test_entry_metadata() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "data.bin", &[7u8; 1234]);

        let mut lister = LocalLister::new(dir.path(), EntryFilter::allow_all(), false);
        match lister.next_listing() {
            Listing::Entry(entry) => {
                assert_eq!(entry.key, "data.bin");
                assert_eq!(entry.size, 1234);
                assert!(!entry.is_dir_marker);
                assert!(entry.local_real_path.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_followed() {
        let dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        create_file(target.path(), "real.txt", b"real");
        std::os::unix::fs::symlink(target.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let mut skipping = LocalLister::new(dir.path(), EntryFilter::allow_all(), false);
        assert!(collect_keys(&mut skipping).is_empty());

        let mut following = LocalLister::new(dir.path(), EntryFilter::allow_all(), true);
        match following.next_listing() {
            Listing::Entry(entry) => {
                assert_eq!(entry.key, "link.txt");
                assert_eq!(entry.size, 4);
                assert!(entry.local_real_path.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_vanishes_with_relative_key() {
        let dir = TempDir::new().unwrap();
        create_file(dir.path(), "a.txt", b"a");
        create_file(dir.path(), "sub/c.txt", b"c");
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("sub/b.link"))
            .unwrap();

        let mut lister = LocalLister::new(dir.path(), EntryFilter::allow_all(), true);
        let mut keys = Vec::new();
        let mut vanished = Vec::new();
        loop {
            match lister.next_listing() {
                Listing::Entry(e) => keys.push(e.key),
                Listing::Vanished { key, error } => {
                    assert!(error.is_vanished());
                    vanished.push(key);
                }
                Listing::End => break,
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(keys, vec!["a.txt", "sub/c.txt"]);
        assert_eq!(vanished, vec!["sub/b.link"]);
    }
}
