//! The entry lister contract
//!
//! A lister yields entries one at a time in non-decreasing key order until
//! it reports `End`. Listers are single-consumer and keep no shared state.

use crate::error::SyncError;
use crate::fs::Entry;
use std::collections::VecDeque;

/// One step of a listing
#[derive(Debug)]
pub enum Listing {
    /// A file or object
    Entry(Entry),
    /// An explicit directory marker
    DirectoryMarker(Entry),
    /// No more entries
    End,
    /// An entry disappeared while it was being listed; iteration continues
    Vanished {
        /// Key of the entry, relative to the listing root
        key: String,
        /// What the walk reported
        error: SyncError,
    },
    /// The underlying walk or list call failed; the last item before `End`
    Error(SyncError),
}

/// Ordered source of listed entries
pub trait EntrySource {
    /// Advance to the next listing item
    fn next_listing(&mut self) -> Listing;
}

/// Lister over an in-memory, pre-sorted list of entries
#[derive(Debug, Default)]
pub struct VecLister {
    entries: VecDeque<Entry>,
}

impl VecLister {
    /// Create from entries, sorting them by key
    pub fn new(mut entries: Vec<Entry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries.dedup_by(|a, b| a.key == b.key);
        Self {
            entries: entries.into(),
        }
    }

    /// A lister with nothing in it
    pub fn empty() -> Self {
        Self::default()
    }
}

impl EntrySource for VecLister {
    fn next_listing(&mut self) -> Listing {
        match self.entries.pop_front() {
            Some(entry) if entry.is_dir_marker => Listing::DirectoryMarker(entry),
            Some(entry) => Listing::Entry(entry),
            None => Listing::End,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_vec_lister_sorts_and_ends() {
        let mut lister = VecLister::new(vec![
            Entry::file("b", 1, UNIX_EPOCH),
            Entry::dir_marker("a/", UNIX_EPOCH),
            Entry::file("a/x", 1, UNIX_EPOCH),
        ]);

        assert!(matches!(lister.next_listing(), Listing::DirectoryMarker(e) if e.key == "a/"));
        assert!(matches!(lister.next_listing(), Listing::Entry(e) if e.key == "a/x"));
        assert!(matches!(lister.next_listing(), Listing::Entry(e) if e.key == "b"));
        assert!(matches!(lister.next_listing(), Listing::End));
        assert!(matches!(lister.next_listing(), Listing::End));
    }
}
