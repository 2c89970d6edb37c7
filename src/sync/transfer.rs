//! Executes transfer and delete decisions
//!
//! Small files and objects move in a single call. Anything above the
//! multipart threshold goes through the resumable routines in
//! [`crate::sync::multipart`].

use crate::config::SyncArgs;
use crate::core::DecisionHandler;
use crate::error::{IoResultExt, Result, SyncError};
use crate::fs::Entry;
use crate::storage::PutOptions;
use crate::sync::multipart::{self, partial_path, MultipartConfig, ObjectRef};
use crate::sync::{BreakpointBook, Operation, SyncDecision, Tree};
use filetime::FileTime;
use std::path::Path;
use std::sync::Arc;

/// Runs decisions against a source and destination tree
pub struct Transferer {
    src: Arc<Tree>,
    dst: Arc<Tree>,
    book: Arc<BreakpointBook>,
    multipart: MultipartConfig,
    threshold: u64,
}

impl Transferer {
    /// Create a transferer for one invocation
    pub fn new(args: &SyncArgs, src: Arc<Tree>, dst: Arc<Tree>, book: Arc<BreakpointBook>) -> Self {
        Self {
            src,
            dst,
            book,
            multipart: MultipartConfig {
                part_size: args.part_size,
                part_threads: args.part_threads,
                restart: args.restart,
                flush_interval: args.flush_interval,
            },
            threshold: args.multipart_threshold,
        }
    }

    fn use_multipart(&self, size: u64) -> bool {
        size > 0 && size > self.threshold
    }

    fn descriptors(&self, decision: &SyncDecision) -> (String, String) {
        (
            self.src.descriptor(&decision.src_key),
            self.dst.descriptor(&decision.dst_key),
        )
    }

    fn upload(&self, decision: &SyncDecision, source: &Entry) -> Result<u64> {
        let path = self.src.local_path(&decision.src_key)?;
        let (store, bucket, key) = self.dst.remote_object(&decision.dst_key)?;
        let modified = std::fs::metadata(&path).with_path(&path)?.modified().with_path(&path)?;

        if self.use_multipart(source.size) {
            let (src_id, dst_id) = self.descriptors(decision);
            let dst = ObjectRef { store, bucket, key: &key };
            return multipart::upload_file(
                &self.multipart,
                &self.book,
                &path,
                modified,
                dst,
                (&src_id, &dst_id),
            );
        }

        let data = std::fs::read(&path).with_path(&path)?;
        let len = data.len() as u64;
        let options = PutOptions {
            modified: Some(modified),
            storage_class: None,
        };
        store.put_object(bucket, &key, data, &options)?;
        Ok(len)
    }

    fn download(&self, decision: &SyncDecision, source: &Entry) -> Result<u64> {
        let (store, bucket, key) = self.src.remote_object(&decision.src_key)?;
        let target = self.dst.local_path(&decision.dst_key)?;

        if self.use_multipart(source.size) {
            let (src_id, dst_id) = self.descriptors(decision);
            let src = ObjectRef { store, bucket, key: &key };
            return multipart::download_object(
                &self.multipart,
                &self.book,
                src,
                source.size,
                source.modified,
                &target,
                (&src_id, &dst_id),
            );
        }

        let data = store.get_object(bucket, &key, None)?;
        write_local(&target, &data)?;
        filetime::set_file_mtime(&target, FileTime::from_system_time(source.modified))
            .with_path(&target)?;
        Ok(data.len() as u64)
    }

    fn copy(&self, decision: &SyncDecision, source: &Entry) -> Result<u64> {
        let (src_store, src_bucket, src_key) = self.src.remote_object(&decision.src_key)?;
        let (store, bucket, key) = self.dst.remote_object(&decision.dst_key)?;

        if self.use_multipart(source.size) {
            let (src_id, dst_id) = self.descriptors(decision);
            return multipart::copy_object(
                &self.multipart,
                &self.book,
                ObjectRef { store: src_store, bucket: src_bucket, key: &src_key },
                source.size,
                source.modified,
                ObjectRef { store, bucket, key: &key },
                (&src_id, &dst_id),
            );
        }

        store.copy_object(src_bucket, &src_key, bucket, &key)?;
        Ok(source.size)
    }

    fn remove(&self, decision: &SyncDecision) -> Result<u64> {
        match decision.operation {
            Operation::RemoveRemote => {
                let (store, bucket, key) = self.dst.remote_object(&decision.dst_key)?;
                store.delete_object(bucket, &key)?;
            }
            _ => {
                let path = self.dst.local_path(&decision.dst_key)?;
                std::fs::remove_file(&path).with_path(&path)?;
            }
        }
        Ok(0)
    }
}

impl DecisionHandler for Transferer {
    fn handle(&self, decision: &SyncDecision) -> Result<u64> {
        let source = || {
            decision.source.as_ref().ok_or_else(|| {
                SyncError::validation(format!("no source entry for '{}'", decision.src_key))
            })
        };

        match decision.operation {
            Operation::Upload => self.upload(decision, source()?),
            Operation::Download => self.download(decision, source()?),
            Operation::Copy => self.copy(decision, source()?),
            Operation::RemoveRemote | Operation::RemoveLocal => self.remove(decision),
            Operation::NoOp | Operation::Error => Ok(0),
        }
    }
}

/// Write a whole file through a temporary sibling so readers never see a torn file
fn write_local(target: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }
    let temp = partial_path(target);
    std::fs::write(&temp, data).with_path(&temp)?;
    std::fs::rename(&temp, target).with_path(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Location;
    use crate::storage::{MemoryStore, ObjectStore};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        memory: Arc<MemoryStore>,
        store: Arc<dyn ObjectStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let memory = Arc::new(MemoryStore::with_buckets(&["b", "c"]));
            let store: Arc<dyn ObjectStore> = memory.clone();
            Self {
                dir: TempDir::new().unwrap(),
                memory,
                store,
            }
        }

        fn transferer(&self, src: &str, dst: &str, threshold: u64) -> Transferer {
            let local = self.dir.path().join("local");
            let parse = |s: &str| {
                if s == "local" {
                    Location::Local(local.clone())
                } else {
                    Location::parse(s).unwrap()
                }
            };
            let mut args = SyncArgs::new(parse(src), parse(dst));
            args.multipart_threshold = threshold;
            args.part_size = 4;
            let src = Arc::new(Tree::root_of(&args.source, &self.store));
            let dst = Arc::new(Tree::root_of(&args.destination, &self.store));
            let book = Arc::new(BreakpointBook::new(self.dir.path().join("bp"), 7));
            Transferer::new(&args, src, dst, book)
        }

        fn local(&self, key: &str) -> std::path::PathBuf {
            self.dir.path().join("local").join(key)
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_upload_keeps_modification_time() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.local("dir")).unwrap();
        std::fs::write(fx.local("dir/a.txt"), b"hello").unwrap();
        filetime::set_file_mtime(fx.local("dir/a.txt"), FileTime::from_unix_time(1_000, 0)).unwrap();

        let decision = SyncDecision::transfer(Operation::Upload, Entry::file("dir/a.txt", 5, at(1_000)), None);
        let bytes = fx.transferer("local", "s3://b/up", 1024).handle(&decision).unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(fx.memory.object_data("b", "up/dir/a.txt").unwrap(), b"hello");
        let info = fx.memory.head_object("b", "up/dir/a.txt").unwrap();
        assert_eq!(info.last_modified, at(1_000));
    }

    #[test]
    fn test_large_upload_goes_multipart() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.local("")).unwrap();
        std::fs::write(fx.local("big"), b"0123456789").unwrap();

        let decision = SyncDecision::transfer(Operation::Upload, Entry::file("big", 10, at(1)), None);
        fx.transferer("local", "s3://b/", 8).handle(&decision).unwrap();

        assert_eq!(fx.memory.part_upload_count(), 3);
        assert_eq!(fx.memory.object_data("b", "big").unwrap(), b"0123456789");
    }

    #[test]
    fn test_download_creates_parents_and_sets_mtime() {
        let fx = Fixture::new();
        fx.memory.insert("b", "src/x/y.bin", b"payload", at(2_000));

        let source = Entry::file("x/y.bin", 7, at(2_000));
        let decision = SyncDecision::transfer(Operation::Download, source, None);
        fx.transferer("s3://b/src", "local", 1024).handle(&decision).unwrap();

        let path = fx.local("x/y.bin");
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), at(2_000));
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_copy_and_remove() {
        let fx = Fixture::new();
        fx.memory.insert("b", "p/k", b"data", at(5));
        fx.memory.insert("c", "q/old", b"stale", at(5));
        let transferer = fx.transferer("s3://b/p", "s3://c/q", 1024);

        let copy = SyncDecision::transfer(Operation::Copy, Entry::file("k", 4, at(5)), None);
        assert_eq!(transferer.handle(&copy).unwrap(), 4);
        assert_eq!(fx.memory.object_data("c", "q/k").unwrap(), b"data");

        let remove = SyncDecision::destination_only(Operation::RemoveRemote, Entry::file("old", 5, at(5)));
        assert_eq!(transferer.handle(&remove).unwrap(), 0);
        assert!(fx.memory.object_data("c", "q/old").is_none());
    }

    #[test]
    fn test_vanished_source_is_reported_as_vanished() {
        let fx = Fixture::new();
        let decision = SyncDecision::transfer(Operation::Download, Entry::file("gone", 3, at(1)), None);
        let err = fx.transferer("s3://b/", "local", 1024).handle(&decision).unwrap_err();
        assert!(err.is_vanished());

        std::fs::create_dir_all(fx.local("")).unwrap();
        let remove = SyncDecision::destination_only(Operation::RemoveLocal, Entry::file("nope", 1, at(1)));
        let err = fx.transferer("s3://b/", "local", 1024).handle(&remove).unwrap_err();
        assert!(err.is_vanished());
    }
}
