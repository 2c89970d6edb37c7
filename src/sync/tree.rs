//! One side of a sync: a local directory or a bucket prefix
//!
//! A tree resolves relative keys to local paths or full object keys, builds
//! the lister for its side, and reads content for checksum strategies.

use crate::config::Location;
use crate::error::{Result, SyncError};
use crate::fs::{Entry, EntryFilter, EntrySource, Listing, LocalLister, VecLister};
use crate::hash::{crc32_file, crc32_object};
use crate::storage::{ObjectStore, RemoteLister};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Root of one side of a transfer
#[derive(Clone)]
pub enum Tree {
    /// Local directory (or, for single files, the file itself)
    Local {
        /// Root path
        root: PathBuf,
    },
    /// Bucket prefix
    Remote {
        /// Backend holding the bucket
        store: Arc<dyn ObjectStore>,
        /// Bucket name
        bucket: String,
        /// Prefix prepended to every key
        prefix: String,
    },
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            Self::Remote { bucket, prefix, .. } => f
                .debug_struct("Remote")
                .field("bucket", bucket)
                .field("prefix", prefix)
                .finish(),
        }
    }
}

impl Tree {
    /// Tree for a location used exactly as given
    pub fn at(location: &Location, store: &Arc<dyn ObjectStore>) -> Self {
        match location {
            Location::Local(path) => Self::Local { root: path.clone() },
            Location::Remote { bucket, prefix } => Self::Remote {
                store: Arc::clone(store),
                bucket: bucket.clone(),
                prefix: prefix.clone(),
            },
        }
    }

    /// Tree for a location used as a directory root
    pub fn root_of(location: &Location, store: &Arc<dyn ObjectStore>) -> Self {
        Self::at(&location.as_tree_root(), store)
    }

    /// Whether modification times written to this side read back unchanged
    pub fn preserves_mtime(&self) -> bool {
        match self {
            Self::Local { .. } => true,
            Self::Remote { store, .. } => store.preserves_mtime(),
        }
    }

    /// Local path for a relative key
    pub fn local_path(&self, key: &str) -> Result<PathBuf> {
        match self {
            Self::Local { root } => Ok(join_key(root, key)),
            Self::Remote { .. } => Err(SyncError::validation(format!(
                "'{}' is not on a local tree",
                key
            ))),
        }
    }

    /// Backend, bucket and full object key for a relative key
    pub fn remote_object(&self, key: &str) -> Result<(&dyn ObjectStore, &str, String)> {
        match self {
            Self::Remote {
                store,
                bucket,
                prefix,
            } => Ok((store.as_ref(), bucket.as_str(), format!("{}{}", prefix, key))),
            Self::Local { .. } => Err(SyncError::validation(format!(
                "'{}' is not on a remote tree",
                key
            ))),
        }
    }

    /// Stable descriptor of a key, used to name breakpoint records
    pub fn descriptor(&self, key: &str) -> String {
        match self {
            Self::Local { root } => {
                let path = join_key(root, key);
                std::path::absolute(&path)
                    .unwrap_or(path)
                    .display()
                    .to_string()
            }
            Self::Remote { bucket, prefix, .. } => format!("s3://{}/{}{}", bucket, prefix, key),
        }
    }

    /// Build the lister for this tree
    pub fn lister(&self, filter: EntryFilter, follow_symlinks: bool) -> TreeLister {
        match self {
            Self::Local { root } => {
                TreeLister::Local(LocalLister::new(root, filter, follow_symlinks))
            }
            Self::Remote {
                store,
                bucket,
                prefix,
            } => TreeLister::Remote(RemoteLister::new(
                Arc::clone(store),
                bucket.clone(),
                prefix.clone(),
                filter,
            )),
        }
    }

    /// CRC32 of an entry's content on this side
    pub fn crc32(&self, entry: &Entry) -> Result<String> {
        match self {
            Self::Local { root } => {
                let path = entry
                    .local_real_path
                    .clone()
                    .unwrap_or_else(|| join_key(root, &entry.key));
                crc32_file(&path)
            }
            Self::Remote {
                store,
                bucket,
                prefix,
            } => {
                let key = format!("{}{}", prefix, entry.key);
                crc32_object(store.as_ref(), bucket, &key, entry.size)
            }
        }
    }
}

/// Join a `/`-separated key onto a local root
pub fn join_key(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Lister for either side, or a fixed set of entries
pub enum TreeLister {
    /// Local walk
    Local(LocalLister),
    /// Remote paging
    Remote(RemoteLister),
    /// Pre-built entries
    Fixed(VecLister),
}

impl EntrySource for TreeLister {
    fn next_listing(&mut self) -> Listing {
        match self {
            Self::Local(lister) => lister.next_listing(),
            Self::Remote(lister) => lister.next_listing(),
            Self::Fixed(lister) => lister.next_listing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_key_resolution() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let remote = Tree::root_of(&Location::parse("s3://b/photos").unwrap(), &store);
        let (_, bucket, key) = remote.remote_object("2024/a.jpg").unwrap();
        assert_eq!(bucket, "b");
        assert_eq!(key, "photos/2024/a.jpg");
        assert_eq!(remote.descriptor("x"), "s3://b/photos/x");
        assert!(remote.local_path("x").is_err());

        let local = Tree::at(&Location::Local(PathBuf::from("/data")), &store);
        assert_eq!(local.local_path("a/b.txt").unwrap(), PathBuf::from("/data/a/b.txt"));
        assert_eq!(local.local_path("").unwrap(), PathBuf::from("/data"));
        assert!(local.preserves_mtime());
    }

    #[test]
    fn test_exact_object_key() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let single = Tree::at(&Location::parse("s3://b/dir/file.bin").unwrap(), &store);
        assert_eq!(single.remote_object("").unwrap().2, "dir/file.bin");
    }
}
