//! Paged listing of a remote prefix

use crate::error::SyncError;
use crate::fs::{Entry, EntryFilter, EntrySource, Listing};
use crate::storage::{ListRequest, ObjectStore, LIST_PAGE_SIZE};
use std::collections::VecDeque;
use std::sync::Arc;

/// Lister over every object under a bucket prefix
///
/// Fetches one page at a time. Keys are yielded relative to the prefix;
/// keys ending in `/` are directory markers.
pub struct RemoteLister {
    store: Arc<dyn ObjectStore>,
    request: ListRequest,
    buffer: VecDeque<Entry>,
    filter: EntryFilter,
    truncated: bool,
    started: bool,
    done: bool,
}

impl RemoteLister {
    /// Create a lister for `prefix` in `bucket`
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        filter: EntryFilter,
    ) -> Self {
        Self {
            store,
            request: ListRequest {
                bucket: bucket.into(),
                prefix: prefix.into(),
                delimiter: None,
                token: None,
                max_keys: LIST_PAGE_SIZE,
            },
            buffer: VecDeque::new(),
            filter,
            truncated: false,
            started: false,
            done: false,
        }
    }

    /// Whether the backend reported more pages after the last fetch
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn fetch_page(&mut self) -> Result<(), SyncError> {
        let page = self.store.list_objects(&self.request).map_err(|e| {
            SyncError::Listing(format!(
                "listing s3://{}/{}: {}",
                self.request.bucket, self.request.prefix, e
            ))
        })?;
        self.started = true;
        self.truncated = page.is_truncated;
        self.request.token = match (page.is_truncated, page.next_token) {
            (true, Some(token)) => Some(token),
            (true, None) => page.objects.last().map(|o| o.key.clone()),
            (false, _) => None,
        };

        let prefix_len = self.request.prefix.len();
        for object in page.objects {
            let Some(key) = object.key.get(prefix_len..) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let mut entry = if key.ends_with('/') {
                Entry::dir_marker(key, object.last_modified)
            } else {
                Entry::file(key, object.size, object.last_modified)
            };
            entry.etag = object.etag;
            entry.storage_class = object.storage_class;
            if entry.is_dir_marker || self.filter.matches(&entry) {
                self.buffer.push_back(entry);
            }
        }
        Ok(())
    }
}

impl EntrySource for RemoteLister {
    fn next_listing(&mut self) -> Listing {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return if entry.is_dir_marker {
                    Listing::DirectoryMarker(entry)
                } else {
                    Listing::Entry(entry)
                };
            }
            if self.done || (self.started && !self.truncated) {
                self.done = true;
                return Listing::End;
            }
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Listing::Error(err);
            }
        }
    }
}
