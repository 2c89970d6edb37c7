//! Bucket and object commands
//!
//! Thin operations behind the `ls`, `mb`, `rb`, `rm`, `cp`, `sync` and
//! `sign` subcommands. Everything here goes through [`ObjectStore`].

use crate::config::Location;
use crate::core::{SyncEngine, SyncReport};
use crate::error::{Result, SyncError};
use crate::fs::{EntryFilter, EntrySource, Listing};
use crate::storage::{BucketInfo, ListRequest, ObjectInfo, ObjectStore, RemoteLister, LIST_PAGE_SIZE};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One line of `ls` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedItem {
    /// A bucket
    Bucket(BucketInfo),
    /// A grouped prefix (non-recursive listing)
    Prefix(String),
    /// An object
    Object(ObjectInfo),
}

impl fmt::Display for ListedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(bucket) => {
                let created = bucket.created.map(format_time).unwrap_or_default();
                write!(f, "{:19}  s3://{}", created, bucket.name)
            }
            Self::Prefix(prefix) => write!(f, "{:19}  {:>10}  {}", "", "DIR", prefix),
            Self::Object(object) => write!(
                f,
                "{:19}  {:>10}  {}",
                format_time(object.last_modified),
                humansize::format_size(object.size, humansize::BINARY),
                object.key
            ),
        }
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn require_remote(location: &Location) -> Result<(&str, &str)> {
    match location {
        Location::Remote { bucket, prefix } => Ok((bucket, prefix)),
        Location::Local(path) => Err(SyncError::validation(format!(
            "expected an s3:// location, got {}",
            path.display()
        ))),
    }
}

fn require_bucket(location: &Location) -> Result<&str> {
    match require_remote(location)? {
        (bucket, "") => Ok(bucket),
        _ => Err(SyncError::validation(format!(
            "expected a bucket without a key, got {}",
            location
        ))),
    }
}

/// List buckets (no location) or the objects under a prefix
pub fn list(
    store: &dyn ObjectStore,
    location: Option<&Location>,
    recursive: bool,
) -> Result<Vec<ListedItem>> {
    let Some(location) = location else {
        return Ok(store
            .list_buckets()?
            .into_iter()
            .map(ListedItem::Bucket)
            .collect());
    };

    let (bucket, prefix) = require_remote(location)?;
    let mut request = ListRequest {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
        delimiter: (!recursive).then(|| "/".to_string()),
        token: None,
        max_keys: LIST_PAGE_SIZE,
    };

    let mut items = Vec::new();
    loop {
        let page = store.list_objects(&request)?;
        items.extend(page.common_prefixes.into_iter().map(ListedItem::Prefix));
        let last_key = page.objects.last().map(|o| o.key.clone());
        items.extend(page.objects.into_iter().map(ListedItem::Object));

        if !page.is_truncated {
            break;
        }
        request.token = page.next_token.or(last_key);
        if request.token.is_none() {
            break;
        }
    }
    Ok(items)
}

/// Create a bucket
pub fn make_bucket(store: &dyn ObjectStore, location: &Location) -> Result<()> {
    let bucket = require_bucket(location)?;
    store.create_bucket(bucket)?;
    tracing::info!("Created bucket {}", bucket);
    Ok(())
}

/// Remove an empty bucket
pub fn remove_bucket(store: &dyn ObjectStore, location: &Location) -> Result<()> {
    let bucket = require_bucket(location)?;
    if !store.bucket_exists(bucket)? {
        return Err(SyncError::BucketNotFound(bucket.to_string()));
    }
    store.delete_bucket(bucket)?;
    tracing::info!("Removed bucket {}", bucket);
    Ok(())
}

/// Remove one object, or every object under a prefix with `recursive`
///
/// Returns how many objects were (or, in a dry run, would be) removed.
pub fn remove_objects(
    store: &Arc<dyn ObjectStore>,
    location: &Location,
    recursive: bool,
    dry_run: bool,
) -> Result<u64> {
    let (bucket, prefix) = require_remote(location)?;

    if !recursive {
        if prefix.is_empty() {
            return Err(SyncError::validation("refusing to remove a bucket root without --recursive"));
        }
        store.head_object(bucket, prefix)?;
        remove_one(store.as_ref(), bucket, prefix, dry_run)?;
        return Ok(1);
    }

    let root = location.as_tree_root();
    let (_, root_prefix) = require_remote(&root)?;
    let mut lister = RemoteLister::new(
        Arc::clone(store),
        bucket,
        root_prefix,
        EntryFilter::allow_all(),
    );

    let mut removed = 0;
    loop {
        let key = match lister.next_listing() {
            Listing::Entry(entry) | Listing::DirectoryMarker(entry) => entry.key,
            Listing::End => break,
            Listing::Vanished { .. } => continue,
            Listing::Error(err) => return Err(err),
        };
        let full_key = format!("{}{}", root_prefix, key);
        match remove_one(store.as_ref(), bucket, &full_key, dry_run) {
            Ok(()) => removed += 1,
            Err(err) if err.is_vanished() => {
                tracing::warn!("Skipping {}, it disappeared", full_key);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(removed)
}

fn remove_one(store: &dyn ObjectStore, bucket: &str, key: &str, dry_run: bool) -> Result<()> {
    if dry_run {
        println!("(dry run) {} s3://{}/{}", console::style("  remove").cyan(), bucket, key);
        return Ok(());
    }
    store.delete_object(bucket, key)?;
    tracing::debug!("Removed s3://{}/{}", bucket, key);
    Ok(())
}

/// Copy a single file or object, or a whole tree with `recursive`
pub fn copy(engine: &SyncEngine, recursive: bool) -> Result<SyncReport> {
    if recursive {
        engine.copy_tree()
    } else {
        engine.copy_single()
    }
}

/// Make the destination match the source
pub fn sync(engine: &SyncEngine) -> Result<SyncReport> {
    engine.sync()
}

/// Pre-signed download URL for one object
pub fn signed_url(store: &dyn ObjectStore, bucket: &str, key: &str, expires: Duration) -> Result<String> {
    if key.is_empty() {
        return Err(SyncError::validation("a signed URL needs an object key"));
    }
    store.head_object(bucket, key)?;
    store.presign_get(bucket, key, expires)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunMode, SyncArgs};
    use crate::core::OutputOptions;
    use crate::storage::MemoryStore;
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    fn store() -> (Arc<MemoryStore>, Arc<dyn ObjectStore>) {
        let memory = Arc::new(MemoryStore::with_buckets(&["b"]));
        for key in ["a.txt", "dir/x", "dir/y", "dir2/z"] {
            memory.insert("b", key, key.as_bytes(), UNIX_EPOCH);
        }
        let store: Arc<dyn ObjectStore> = memory.clone();
        (memory, store)
    }

    fn loc(url: &str) -> Location {
        Location::parse(url).unwrap()
    }

    #[test]
    fn test_list_levels() {
        let (_, store) = store();
        let top = list(store.as_ref(), Some(&loc("s3://b")), false).unwrap();
        assert_eq!(
            top,
            vec![
                ListedItem::Prefix("dir/".into()),
                ListedItem::Prefix("dir2/".into()),
                ListedItem::Object(store.head_object("b", "a.txt").unwrap()),
            ]
        );

        let all = list(store.as_ref(), Some(&loc("s3://b/dir")), true).unwrap();
        assert_eq!(all.len(), 3);

        let buckets = list(store.as_ref(), None, false).unwrap();
        assert!(matches!(&buckets[0], ListedItem::Bucket(b) if b.name == "b"));
    }

    #[test]
    fn test_bucket_lifecycle() {
        let (_, store) = store();
        make_bucket(store.as_ref(), &loc("s3://fresh")).unwrap();
        assert!(store.bucket_exists("fresh").unwrap());
        remove_bucket(store.as_ref(), &loc("s3://fresh")).unwrap();
        assert!(!store.bucket_exists("fresh").unwrap());

        assert!(matches!(
            make_bucket(store.as_ref(), &loc("s3://b/key")),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            remove_bucket(store.as_ref(), &loc("s3://missing")),
            Err(SyncError::BucketNotFound(_))
        ));
    }

    #[test]
    fn test_remove_objects() {
        let (memory, store) = store();
        assert_eq!(remove_objects(&store, &loc("s3://b/dir"), true, true).unwrap(), 2);
        assert_eq!(memory.keys("b").len(), 4);

        assert_eq!(remove_objects(&store, &loc("s3://b/dir"), true, false).unwrap(), 2);
        assert_eq!(memory.keys("b"), vec!["a.txt", "dir2/z"]);

        assert_eq!(remove_objects(&store, &loc("s3://b/a.txt"), false, false).unwrap(), 1);
        assert!(remove_objects(&store, &loc("s3://b/a.txt"), false, false)
            .unwrap_err()
            .is_vanished());
    }

    #[test]
    fn test_signed_url_requires_object() {
        let (_, store) = store();
        assert!(signed_url(store.as_ref(), "b", "missing", Duration::from_secs(60))
            .unwrap_err()
            .is_vanished());
        assert!(signed_url(store.as_ref(), "b", "", Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_copy_dispatch() {
        let (memory, store) = store();
        let dir = TempDir::new().unwrap();
        let mut args = SyncArgs::new(loc("s3://b/dir"), crate::config::Location::Local(dir.path().join("out")));
        args.mode = RunMode::Copy;
        args.breakpoint_dir = dir.path().join("bp");

        let quiet = OutputOptions { quiet: true, ..OutputOptions::default() };
        let engine = SyncEngine::new(args, Arc::clone(&store)).with_output(quiet);
        let report = copy(&engine, true).unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(std::fs::read(dir.path().join("out/x")).unwrap(), b"dir/x");
        assert_eq!(memory.keys("b").len(), 4);
    }
}
