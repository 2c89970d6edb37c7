//! Sync engine
//!
//! Wires one invocation together: checks the buckets involved, builds the
//! trees and listers for both sides, and runs the comparator through the
//! executor.

use crate::config::{Location, RunMode, SyncArgs};
use crate::core::{OutputOptions, SyncExecutor, SyncReport};
use crate::error::{IoResultExt, Result, SyncError};
use crate::fs::{Entry, EntryFilter, VecLister};
use crate::storage::ObjectStore;
use crate::sync::{
    BreakpointBook, Comparator, ComparePolicy, SyncDecision, Transferer, Tree, TreeLister,
};
use std::sync::Arc;

/// Runs sync and copy invocations against one storage backend
pub struct SyncEngine {
    /// Validated arguments
    args: Arc<SyncArgs>,
    /// Backend for every remote location
    store: Arc<dyn ObjectStore>,
    /// Output behaviour
    output: OutputOptions,
    /// Breakpoint records
    book: Arc<BreakpointBook>,
}

impl SyncEngine {
    /// Create an engine for one invocation
    pub fn new(args: SyncArgs, store: Arc<dyn ObjectStore>) -> Self {
        let book = Arc::new(BreakpointBook::new(
            args.breakpoint_dir.clone(),
            args.breakpoint_expire_days,
        ));
        let output = OutputOptions {
            dry_run: args.dry_run,
            ..OutputOptions::default()
        };
        Self {
            args: Arc::new(args),
            store,
            output,
            book,
        }
    }

    /// Set output behaviour (the dry-run flag always follows the arguments)
    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = OutputOptions {
            dry_run: self.args.dry_run,
            ..output
        };
        self
    }

    /// Arguments of this run
    pub fn args(&self) -> &SyncArgs {
        &self.args
    }

    /// Breakpoint records of this run, for flushing at shutdown
    pub fn book(&self) -> &Arc<BreakpointBook> {
        &self.book
    }

    /// Compare both trees and transfer what differs
    pub fn sync(&self) -> Result<SyncReport> {
        self.prepare()?;
        let (src, dst) = self.trees();
        let filter = EntryFilter::new(&self.args.filter)?;
        let src_lister = src.lister(filter.clone(), self.args.follow_symlinks);
        let dst_lister = dst.lister(filter, self.args.follow_symlinks);
        self.run_tree(src, dst, src_lister, dst_lister)
    }

    /// Transfer every entry of the source tree, never deleting
    pub fn copy_tree(&self) -> Result<SyncReport> {
        self.ensure_copy_mode()?;
        self.prepare()?;
        let (src, dst) = self.trees();
        let filter = EntryFilter::new(&self.args.filter)?;
        let src_lister = src.lister(filter, self.args.follow_symlinks);
        let dst_lister = TreeLister::Fixed(VecLister::empty());
        self.run_tree(src, dst, src_lister, dst_lister)
    }

    /// Transfer the single file or object named by the source
    ///
    /// A destination that is an existing directory, or a remote prefix
    /// ending in `/`, receives the source's file name.
    pub fn copy_single(&self) -> Result<SyncReport> {
        self.ensure_copy_mode()?;
        self.prepare()?;
        let (src, entry) = self.single_source()?;
        let (dst, dst_key) = self.single_destination(&entry.key);
        let policy = ComparePolicy::new(&self.args, Arc::clone(&src), Arc::clone(&dst))?;
        let mut decision = SyncDecision::transfer(policy.transfer_operation(), entry, None);
        decision.dst_key = dst_key;

        let transferer = Transferer::new(&self.args, src, dst, Arc::clone(&self.book));
        let executor = SyncExecutor::new(&transferer, 1, self.output);
        Ok(executor.run(std::iter::once(Ok(decision))))
    }

    fn ensure_copy_mode(&self) -> Result<()> {
        if self.args.mode != RunMode::Copy {
            return Err(SyncError::validation("copy requires copy mode arguments"));
        }
        Ok(())
    }

    /// Checks that must pass before any listing or transfer starts
    fn prepare(&self) -> Result<()> {
        self.args.validate()?;
        for location in [&self.args.source, &self.args.destination] {
            if let Location::Remote { bucket, .. } = location {
                if !self.store.bucket_exists(bucket)? {
                    return Err(SyncError::BucketNotFound(bucket.clone()));
                }
            }
        }

        if !self.args.dry_run {
            match self.book.cleanup_expired() {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Removed {} expired breakpoint records", n),
                Err(e) => tracing::debug!("Breakpoint cleanup failed: {}", e),
            }
        }
        Ok(())
    }

    fn trees(&self) -> (Arc<Tree>, Arc<Tree>) {
        (
            Arc::new(Tree::root_of(&self.args.source, &self.store)),
            Arc::new(Tree::root_of(&self.args.destination, &self.store)),
        )
    }

    fn run_tree(
        &self,
        src: Arc<Tree>,
        dst: Arc<Tree>,
        src_lister: TreeLister,
        dst_lister: TreeLister,
    ) -> Result<SyncReport> {
        tracing::info!(
            "{} {} -> {}",
            match self.args.mode {
                RunMode::Sync => "Syncing",
                RunMode::Copy => "Copying",
            },
            self.args.source,
            self.args.destination
        );

        let policy = ComparePolicy::new(&self.args, Arc::clone(&src), Arc::clone(&dst))?;
        let comparator = Comparator::new(src_lister, dst_lister, policy);
        let transferer = Transferer::new(&self.args, src, dst, Arc::clone(&self.book));
        let executor = SyncExecutor::new(&transferer, self.args.concurrency, self.output);

        Ok(executor.run(comparator))
    }

    fn single_source(&self) -> Result<(Arc<Tree>, Entry)> {
        match &self.args.source {
            Location::Local(path) => {
                let metadata = std::fs::metadata(path).with_path(path)?;
                if metadata.is_dir() {
                    return Err(SyncError::validation(format!(
                        "{} is a directory, use --recursive",
                        path.display()
                    )));
                }
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| SyncError::validation(format!("bad file name: {}", path.display())))?;
                let parent = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => std::path::PathBuf::from("."),
                };
                let modified = metadata.modified().with_path(path)?;
                let entry = Entry::file(name, metadata.len(), modified);
                let tree = Tree::at(&Location::Local(parent), &self.store);
                Ok((Arc::new(tree), entry))
            }
            Location::Remote { bucket, prefix } => {
                if prefix.is_empty() || prefix.ends_with('/') {
                    return Err(SyncError::validation(format!(
                        "{} is a prefix, use --recursive",
                        self.args.source
                    )));
                }
                let info = self.store.head_object(bucket, prefix)?;
                let (parent, name) = match prefix.rfind('/') {
                    Some(idx) => prefix.split_at(idx + 1),
                    None => ("", prefix.as_str()),
                };
                let mut entry = Entry::file(name, info.size, info.last_modified);
                entry.etag = info.etag;
                entry.storage_class = info.storage_class;
                let location = Location::Remote {
                    bucket: bucket.clone(),
                    prefix: parent.to_string(),
                };
                Ok((Arc::new(Tree::at(&location, &self.store)), entry))
            }
        }
    }

    fn single_destination(&self, name: &str) -> (Arc<Tree>, String) {
        let destination = &self.args.destination;
        let into_directory = match destination {
            Location::Local(path) => path.is_dir() || path.to_string_lossy().ends_with('/'),
            Location::Remote { prefix, .. } => prefix.is_empty() || prefix.ends_with('/'),
        };

        let key = if into_directory { name.to_string() } else { String::new() };
        (Arc::new(Tree::at(destination, &self.store)), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompareStrategy;
    use crate::storage::MemoryStore;
    use filetime::FileTime;
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn write(root: &Path, key: &str, data: &[u8], secs: i64) {
        let path = root.join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn setup() -> (TempDir, Arc<MemoryStore>, Arc<dyn ObjectStore>) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::with_buckets(&["b", "c"]));
        let store: Arc<dyn ObjectStore> = memory.clone();
        (dir, memory, store)
    }

    fn args(dir: &TempDir, src: Location, dst: Location) -> SyncArgs {
        let mut args = SyncArgs::new(src, dst);
        args.breakpoint_dir = dir.path().join("bp");
        args.concurrency = 4;
        args
    }

    fn quiet() -> OutputOptions {
        OutputOptions {
            quiet: true,
            ..OutputOptions::default()
        }
    }

    #[test]
    fn test_upload_sync_is_idempotent() {
        let (dir, memory, store) = setup();
        let src = dir.path().join("src");
        write(&src, "a.txt", b"aaaa", 1_000);
        write(&src, "nested/b.txt", b"bb", 2_000);
        memory.insert("b", "dst/stale.txt", b"old", UNIX_EPOCH + Duration::from_secs(10));

        let mut sync_args = args(&dir, Location::Local(src.clone()), Location::parse("s3://b/dst").unwrap());
        sync_args.delete = true;

        let engine = SyncEngine::new(sync_args.clone(), Arc::clone(&store)).with_output(quiet());
        let report = engine.sync().unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.bytes, 6);
        assert!(report.is_success());
        assert_eq!(memory.keys("b"), vec!["dst/a.txt", "dst/nested/b.txt"]);

        let again = SyncEngine::new(sync_args, store).with_output(quiet()).sync().unwrap();
        assert_eq!(again.succeeded, 0);
        assert_eq!(again.skipped, 2);
    }

    #[test]
    fn test_download_sync_with_crc_strategy() {
        let (dir, memory, store) = setup();
        let dst = dir.path().join("dst");
        memory.insert("b", "p/same", b"12345", UNIX_EPOCH + Duration::from_secs(50));
        memory.insert("b", "p/changed", b"new!!", UNIX_EPOCH + Duration::from_secs(50));
        write(&dst, "same", b"12345", 99);
        write(&dst, "changed", b"old!!", 99);
        write(&dst, "extra", b"x", 99);

        let mut sync_args = args(&dir, Location::parse("s3://b/p").unwrap(), Location::Local(dst.clone()));
        sync_args.strategy = CompareStrategy::OnlyCrc32;
        let report = SyncEngine::new(sync_args, store).with_output(quiet()).sync().unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(std::fs::read(dst.join("changed")).unwrap(), b"new!!");
        assert!(dst.join("extra").exists());
    }

    #[test]
    fn test_failed_transfer_is_counted() {
        let (dir, memory, store) = setup();
        let src = dir.path().join("src");
        write(&src, "good", b"g", 1);
        write(&src, "bad", b"b", 1);
        memory.fail_key("bad");

        let sync_args = args(&dir, Location::Local(src), Location::parse("s3://b/").unwrap());
        let report = SyncEngine::new(sync_args, store).with_output(quiet()).sync().unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, "bad");
        assert!(!report.is_success());
        assert!(report.fatal.is_none());
    }

    #[test]
    fn test_missing_bucket_fails_before_transfer() {
        let (dir, _, store) = setup();
        let src = dir.path().join("src");
        write(&src, "a", b"a", 1);

        let engine = SyncEngine::new(
            args(&dir, Location::Local(src), Location::parse("s3://nope/x").unwrap()),
            store,
        );
        assert!(matches!(engine.sync(), Err(SyncError::BucketNotFound(b)) if b == "nope"));
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (dir, memory, store) = setup();
        let src = dir.path().join("src");
        write(&src, "a", b"a", 1);

        let mut sync_args = args(&dir, Location::Local(src), Location::parse("s3://b/").unwrap());
        sync_args.dry_run = true;
        let report = SyncEngine::new(sync_args, store).with_output(quiet()).sync().unwrap();

        assert_eq!(report.skipped, 1);
        assert!(memory.keys("b").is_empty());
    }

    #[test]
    fn test_copy_tree_always_transfers() {
        let (dir, memory, store) = setup();
        memory.insert("b", "data/x", b"xx", UNIX_EPOCH);
        memory.insert("b", "data/y/z", b"zzz", UNIX_EPOCH);
        memory.insert("c", "mirror/x", b"xx", UNIX_EPOCH + Duration::from_secs(100));

        let mut copy_args = args(&dir, Location::parse("s3://b/data").unwrap(), Location::parse("s3://c/mirror").unwrap());
        copy_args.mode = RunMode::Copy;
        let report = SyncEngine::new(copy_args, store).with_output(quiet()).copy_tree().unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(memory.keys("c"), vec!["mirror/x", "mirror/y/z"]);
    }

    #[test]
    fn test_copy_single_file_into_prefix() {
        let (dir, memory, store) = setup();
        let src = dir.path().join("src");
        write(&src, "photo.jpg", b"jpeg", 1_234);

        let mut copy_args = args(
            &dir,
            Location::Local(src.join("photo.jpg")),
            Location::parse("s3://b/album/").unwrap(),
        );
        copy_args.mode = RunMode::Copy;
        let report = SyncEngine::new(copy_args, Arc::clone(&store)).with_output(quiet()).copy_single().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(memory.object_data("b", "album/photo.jpg").unwrap(), b"jpeg");

        let target = dir.path().join("renamed.jpg");
        let mut back = args(&dir, Location::parse("s3://b/album/photo.jpg").unwrap(), Location::Local(target.clone()));
        back.mode = RunMode::Copy;
        SyncEngine::new(back, store).with_output(quiet()).copy_single().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"jpeg");
    }
}
