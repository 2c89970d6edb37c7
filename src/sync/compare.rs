//! Merge-join comparator
//!
//! Walks two key-ordered listers in lockstep and yields exactly one
//! [`SyncDecision`] per distinct key. Directory markers only advance their
//! side. Vanished entries turn into `Error` decisions; any other listing or
//! comparison failure ends the stream with `Err`.

use crate::error::{Result, SyncError};
use crate::fs::{Entry, EntrySource, Listing};
use crate::sync::ComparePolicy;
use std::cmp::Ordering;
use std::fmt;

/// Action chosen for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Remote to remote copy
    Copy,
    /// Local to remote
    Upload,
    /// Remote to local
    Download,
    /// Delete a destination object
    RemoveRemote,
    /// Delete a destination file
    RemoveLocal,
    /// Nothing to do
    NoOp,
    /// The entry could not be compared
    Error,
}

impl Operation {
    /// Does this operation move data?
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Copy | Self::Upload | Self::Download)
    }

    /// Short verb for logs and dry-run output
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::RemoveRemote | Self::RemoveLocal => "remove",
            Self::NoOp => "skip",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One classified key
#[derive(Debug, Clone)]
pub struct SyncDecision {
    /// Key relative to the source root
    pub src_key: String,
    /// Key relative to the destination root
    pub dst_key: String,
    /// What to do
    pub operation: Operation,
    /// Source snapshot, when the key exists there
    pub source: Option<Entry>,
    /// Destination snapshot, when the key exists there
    pub target: Option<Entry>,
    /// Why an `Error` decision was produced
    pub reason: Option<String>,
}

impl SyncDecision {
    /// Decision for a key that exists at the source
    pub fn transfer(operation: Operation, source: Entry, target: Option<Entry>) -> Self {
        Self {
            src_key: source.key.clone(),
            dst_key: source.key.clone(),
            operation,
            source: Some(source),
            target,
            reason: None,
        }
    }

    /// Decision for a key that exists only at the destination
    pub fn destination_only(operation: Operation, target: Entry) -> Self {
        Self {
            src_key: target.key.clone(),
            dst_key: target.key.clone(),
            operation,
            source: None,
            target: Some(target),
            reason: None,
        }
    }

    /// Decision recording a per-entry failure
    pub fn error(key: impl Into<String>, err: &SyncError) -> Self {
        let key = key.into();
        Self {
            src_key: key.clone(),
            dst_key: key,
            operation: Operation::Error,
            source: None,
            target: None,
            reason: Some(err.to_string()),
        }
    }
}

enum Pull {
    Ready,
    Vanished(String, SyncError),
    Fatal(SyncError),
}

/// Lazy merge of a source and destination lister
pub struct Comparator<S, D> {
    src: S,
    dst: D,
    policy: ComparePolicy,
    src_head: Option<Entry>,
    dst_head: Option<Entry>,
    src_done: bool,
    dst_done: bool,
    finished: bool,
}

impl<S: EntrySource, D: EntrySource> Comparator<S, D> {
    /// Create a comparator over two listers
    pub fn new(src: S, dst: D, policy: ComparePolicy) -> Self {
        Self {
            src,
            dst,
            policy,
            src_head: None,
            dst_head: None,
            src_done: false,
            dst_done: false,
            finished: false,
        }
    }

    fn fill(lister: &mut impl EntrySource, head: &mut Option<Entry>, done: &mut bool) -> Pull {
        while head.is_none() && !*done {
            match lister.next_listing() {
                Listing::Entry(entry) => *head = Some(entry),
                Listing::DirectoryMarker(_) => continue,
                Listing::End => *done = true,
                Listing::Vanished { key, error } => return Pull::Vanished(key, error),
                Listing::Error(err) => {
                    *done = true;
                    return Pull::Fatal(err);
                }
            }
        }
        Pull::Ready
    }

    fn fail(&mut self, err: SyncError) -> Option<Result<SyncDecision>> {
        self.finished = true;
        Some(Err(err))
    }

    fn both_sides(&mut self, src: Entry, dst: Entry) -> Option<Result<SyncDecision>> {
        match self.policy.both_sides_equal(&src, &dst) {
            Ok(true) => Some(Ok(SyncDecision::transfer(Operation::NoOp, src, Some(dst)))),
            Ok(false) => {
                let op = self.policy.transfer_operation();
                Some(Ok(SyncDecision::transfer(op, src, Some(dst))))
            }
            Err(err) if err.is_vanished() => Some(Ok(SyncDecision::error(src.key, &err))),
            Err(err) => self.fail(err.with_context(format!("comparing '{}'", src.key))),
        }
    }
}

impl<S: EntrySource, D: EntrySource> Iterator for Comparator<S, D> {
    type Item = Result<SyncDecision>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match Self::fill(&mut self.src, &mut self.src_head, &mut self.src_done) {
            Pull::Ready => {}
            Pull::Vanished(key, err) => return Some(Ok(SyncDecision::error(key, &err))),
            Pull::Fatal(err) => return self.fail(err),
        }
        match Self::fill(&mut self.dst, &mut self.dst_head, &mut self.dst_done) {
            Pull::Ready => {}
            Pull::Vanished(key, err) => return Some(Ok(SyncDecision::error(key, &err))),
            Pull::Fatal(err) => return self.fail(err),
        }

        let order = match (&self.src_head, &self.dst_head) {
            (None, None) => {
                self.finished = true;
                return None;
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(src), Some(dst)) => src.key.as_bytes().cmp(dst.key.as_bytes()),
        };

        match order {
            Ordering::Equal => {
                let src = self.src_head.take()?;
                let dst = self.dst_head.take()?;
                self.both_sides(src, dst)
            }
            Ordering::Less => {
                let src = self.src_head.take()?;
                let op = self.policy.transfer_operation();
                Some(Ok(SyncDecision::transfer(op, src, None)))
            }
            Ordering::Greater => {
                let dst = self.dst_head.take()?;
                let op = self.policy.destination_only(&dst);
                Some(Ok(SyncDecision::destination_only(op, dst)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Location, SyncArgs};
    use crate::fs::VecLister;
    use crate::storage::{MemoryStore, ObjectStore};
    use crate::sync::Tree;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn upload_policy(delete: bool) -> ComparePolicy {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::with_buckets(&["b"]));
        let mut args = SyncArgs::new(
            Location::Local(PathBuf::from("/src")),
            Location::parse("s3://b/dst").unwrap(),
        );
        args.delete = delete;
        let src = Arc::new(Tree::root_of(&args.source, &store));
        let dst = Arc::new(Tree::root_of(&args.destination, &store));
        ComparePolicy::new(&args, src, dst).unwrap()
    }

    fn entry(key: &str, size: u64, secs: u64) -> Entry {
        Entry::file(key, size, UNIX_EPOCH + Duration::from_secs(secs))
    }

    struct FailingLister {
        items: Vec<Listing>,
    }

    impl EntrySource for FailingLister {
        fn next_listing(&mut self) -> Listing {
            if self.items.is_empty() {
                Listing::End
            } else {
                self.items.remove(0)
            }
        }
    }

    #[test]
    fn test_scenario_decisions() {
        let src = VecLister::new(vec![entry("a.txt", 10, 1000), entry("b.txt", 20, 2000)]);
        let dst = VecLister::new(vec![entry("a.txt", 10, 1000), entry("c.txt", 5, 3000)]);

        let decisions: Vec<_> = Comparator::new(src, dst, upload_policy(true))
            .map(|d| d.unwrap())
            .map(|d| (d.src_key, d.operation))
            .collect();

        assert_eq!(
            decisions,
            vec![
                ("a.txt".to_string(), Operation::NoOp),
                ("b.txt".to_string(), Operation::Upload),
                ("c.txt".to_string(), Operation::RemoveRemote),
            ]
        );
    }

    #[test]
    fn test_markers_produce_no_decisions() {
        let src = VecLister::new(vec![entry("a/x", 1, 1)]);
        let dst = VecLister::new(vec![Entry::dir_marker("a/", UNIX_EPOCH), entry("a/x", 1, 1)]);

        let decisions: Vec<_> = Comparator::new(src, dst, upload_policy(true))
            .map(|d| d.unwrap().operation)
            .collect();
        assert_eq!(decisions, vec![Operation::NoOp]);
    }

    #[test]
    fn test_vanished_entry_is_not_fatal() {
        let src = FailingLister {
            items: vec![
                Listing::Entry(entry("a", 1, 1)),
                Listing::Vanished {
                    key: "dir/gone".into(),
                    error: SyncError::NotFound(PathBuf::from("/src/dir/gone")),
                },
                Listing::Entry(entry("b", 1, 1)),
            ],
        };
        let decisions: Vec<_> = Comparator::new(src, VecLister::empty(), upload_policy(false))
            .map(|d| d.unwrap())
            .map(|d| (d.src_key, d.dst_key, d.operation))
            .collect();
        assert_eq!(
            decisions,
            vec![
                ("a".to_string(), "a".to_string(), Operation::Upload),
                ("dir/gone".to_string(), "dir/gone".to_string(), Operation::Error),
                ("b".to_string(), "b".to_string(), Operation::Upload),
            ]
        );
    }

    #[test]
    fn test_listing_failure_aborts() {
        let dst = FailingLister {
            items: vec![
                Listing::Entry(entry("a", 1, 1)),
                Listing::Error(SyncError::Listing("connection reset".into())),
            ],
        };
        let src = VecLister::new(vec![entry("a", 1, 1), entry("b", 1, 1)]);
        let mut comparator = Comparator::new(src, dst, upload_policy(false));

        assert_eq!(comparator.next().unwrap().unwrap().operation, Operation::NoOp);
        assert!(comparator.next().unwrap().is_err());
        assert!(comparator.next().is_none());
    }

    fn key_set() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("[a-c]{1,2}(/[a-c]{1,2})?", 0..24)
    }

    proptest! {
        #[test]
        fn merge_join_visits_union_once(src_keys in key_set(), dst_keys in key_set()) {
            let src = VecLister::new(src_keys.iter().map(|k| entry(k, 1, 1)).collect());
            let dst = VecLister::new(dst_keys.iter().map(|k| entry(k, 2, 1)).collect());

            let decisions: Vec<_> = Comparator::new(src, dst, upload_policy(true))
                .map(|d| d.unwrap())
                .collect();

            let visited: Vec<_> = decisions.iter().map(|d| d.src_key.clone()).collect();
            let union: Vec<_> = src_keys.union(&dst_keys).cloned().collect();
            prop_assert_eq!(&visited, &union);

            for d in &decisions {
                let in_src = src_keys.contains(&d.src_key);
                let in_dst = dst_keys.contains(&d.src_key);
                prop_assert_eq!(d.source.is_some(), in_src);
                prop_assert_eq!(d.target.is_some(), in_dst);
                let expected = if in_src { Operation::Upload } else { Operation::RemoveRemote };
                prop_assert_eq!(d.operation, expected);
            }
        }
    }
}
