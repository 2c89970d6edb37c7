//! Resumable multipart transfer state
//!
//! Every large transfer keeps a [`MultipartState`]: the part layout, the
//! parts the backend has acknowledged, and the source fingerprint the
//! progress belongs to. The state is persisted as a breakpoint record in
//! the working directory so an interrupted transfer resumes with only the
//! missing parts.
//!
//! Part bookkeeping sits behind a read/write lock. Writing the record to
//! disk is serialized by a separate mutex and only takes a read lock long
//! enough to snapshot, so flushing never stalls part completion.

use crate::error::{IoResultExt, Result, SyncError};
use crate::storage::{CompletedPart, MAX_PARTS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Part size and count for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    /// Bytes per part (the last part may be shorter)
    pub part_size: u64,
    /// Number of parts
    pub parts_num: u32,
}

impl PartLayout {
    /// Byte range of a 1-based part within a file of `total` bytes
    pub fn range(&self, part_number: u32, total: u64) -> Range<u64> {
        let start = (part_number as u64 - 1) * self.part_size;
        start.min(total)..(start + self.part_size).min(total)
    }
}

/// Choose the part size and count for a file
///
/// The initial part size grows to the smallest multiple of itself that
/// keeps the part count within [`MAX_PARTS`].
pub fn compute_part_layout(file_size: u64, initial_part_size: u64) -> PartLayout {
    let initial = initial_part_size.max(1);
    let max_parts = MAX_PARTS as u64;

    let part_size = if initial.saturating_mul(max_parts) < file_size {
        file_size.div_ceil(max_parts).div_ceil(initial) * initial
    } else {
        initial
    };

    PartLayout {
        part_size,
        parts_num: file_size.div_ceil(part_size) as u32,
    }
}

/// Identity of the source content a record belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Source size
    pub size: u64,
    /// Source modification time, whole seconds
    pub modified_secs: i64,
    /// MD5 of the trailing sample
    pub tail_md5: String,
}

/// Durable snapshot of a transfer's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRecord {
    /// MD5 of the source's trailing sample
    pub md5: String,
    /// Backend multipart upload id (empty for downloads)
    pub upload_id: String,
    /// Source size
    pub src_file_size: u64,
    /// Source modification time, whole seconds
    pub src_file_last_modified: i64,
    /// Number of parts
    pub parts_num: u32,
    /// Bytes per part
    pub part_size: u64,
    /// Parts acknowledged so far
    pub completed_parts: Vec<CompletedPart>,
    /// When the record was written, whole seconds
    pub record_time: i64,
}

impl BreakpointRecord {
    /// Is the record older than its time-to-live?
    pub fn is_expired(&self, expire_days: u64, now: i64) -> bool {
        let ttl = i64::try_from(expire_days)
            .unwrap_or(i64::MAX)
            .saturating_mul(SECS_PER_DAY);
        self.record_time.saturating_add(ttl) < now
    }

    /// Does the record describe exactly this source?
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.src_file_size == fingerprint.size
            && self.src_file_last_modified == fingerprint.modified_secs
            && self.md5 == fingerprint.tail_md5
    }

    fn layout_is_valid(&self) -> bool {
        self.part_size > 0
            && self.parts_num as u64 == self.src_file_size.div_ceil(self.part_size)
            && self.part_size.saturating_mul(MAX_PARTS as u64) >= self.src_file_size
    }
}

/// How a state came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No usable record, starting from part one
    Fresh,
    /// Adopted a matching record
    Resumed,
}

/// Working directory of breakpoint records
pub struct BreakpointBook {
    dir: PathBuf,
    expire_days: u64,
    live: Mutex<Vec<Weak<MultipartState>>>,
}

impl BreakpointBook {
    /// Book rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>, expire_days: u64) -> Self {
        Self {
            dir: dir.into(),
            expire_days,
            live: Mutex::new(Vec::new()),
        }
    }

    /// Record directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, content_id: &str) -> PathBuf {
        self.dir.join(content_id)
    }

    /// Read a usable record
    ///
    /// Missing, unreadable and expired records are all treated as absent.
    pub fn load(&self, content_id: &str) -> Option<BreakpointRecord> {
        self.read(content_id)
            .filter(|record| !self.expired(content_id, record))
    }

    fn expired(&self, content_id: &str, record: &BreakpointRecord) -> bool {
        let expired = record.is_expired(self.expire_days, now_secs());
        if expired {
            tracing::debug!("Ignoring expired breakpoint {}", content_id);
        }
        expired
    }

    fn read(&self, content_id: &str) -> Option<BreakpointRecord> {
        let path = self.record_path(content_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!("Ignoring unreadable breakpoint {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Ignoring corrupt breakpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write a record atomically
    pub fn save(&self, content_id: &str, record: &BreakpointRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_path(&self.dir)?;
        let path = self.record_path(content_id);
        let temp_path = path.with_extension("tmp");

        let file = File::create(&temp_path).with_path(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writer.flush().with_path(&temp_path)?;
        drop(writer);

        std::fs::rename(&temp_path, &path).with_path(&path)?;
        Ok(())
    }

    /// Delete a record if present
    pub fn remove(&self, content_id: &str) -> Result<()> {
        let path = self.record_path(content_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    /// Start or resume the transfer identified by `content_id`
    ///
    /// With `allow_resume` false any existing record is discarded. Callers
    /// pass false for `--restart` and when a download's partial file is gone.
    /// The upload id of a discarded record is handed to the new state as
    /// [`MultipartState::stale_upload_id`] so the caller can abort it.
    pub fn open(
        self: &Arc<Self>,
        content_id: impl Into<String>,
        fingerprint: Fingerprint,
        initial_part_size: u64,
        allow_resume: bool,
    ) -> Arc<MultipartState> {
        let content_id = content_id.into();
        let (resumable, discarded) = match self.read(&content_id) {
            Some(record) if allow_resume && !self.expired(&content_id, &record) => {
                if record.matches(&fingerprint) && record.layout_is_valid() {
                    (Some(record), None)
                } else {
                    tracing::warn!(
                        "Source changed since the last attempt, restarting transfer {}",
                        content_id
                    );
                    (None, Some(record))
                }
            }
            other => (None, other),
        };

        let state = match resumable {
            Some(record) => {
                tracing::debug!(
                    "Resuming {} with {}/{} parts done",
                    content_id,
                    record.completed_parts.len(),
                    record.parts_num
                );
                MultipartState::resumed(Arc::clone(self), content_id, fingerprint, record)
            }
            None => {
                if let Err(e) = self.remove(&content_id) {
                    tracing::debug!("Could not clear breakpoint {}: {}", content_id, e);
                }
                let layout = compute_part_layout(fingerprint.size, initial_part_size);
                let mut state =
                    MultipartState::fresh(Arc::clone(self), content_id, fingerprint, layout);
                state.stale_upload_id = discarded
                    .map(|record| record.upload_id)
                    .filter(|id| !id.is_empty());
                state
            }
        };

        let state = Arc::new(state);
        let mut live = lock(&self.live);
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(&state));
        state
    }

    /// Flush every live state, used at shutdown
    pub fn flush_all(&self) {
        let live: Vec<_> = lock(&self.live).iter().filter_map(Weak::upgrade).collect();
        for state in live {
            if let Err(e) = state.flush() {
                tracing::warn!("Failed to save breakpoint {}: {}", state.content_id(), e);
            }
        }
    }

    /// Delete expired and unreadable records, returning how many went
    pub fn cleanup_expired(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SyncError::io(&self.dir, e)),
        };

        let now = now_secs();
        let mut removed = 0;
        for entry in entries {
            let path = entry.with_path(&self.dir)?.path();
            if !path.is_file() || path.extension().is_some() {
                continue;
            }
            let stale = File::open(&path)
                .ok()
                .and_then(|f| serde_json::from_reader::<_, BreakpointRecord>(BufReader::new(f)).ok())
                .map_or(true, |record| record.is_expired(self.expire_days, now));
            if stale {
                std::fs::remove_file(&path).with_path(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[derive(Debug)]
struct PartProgress {
    upload_id: String,
    completed: BTreeMap<u32, CompletedPart>,
    dirty: bool,
    finish_seq: u64,
    flushed_seq: u64,
    closed: bool,
    last_flush_time: Option<SystemTime>,
    last_finish_part_time: Option<SystemTime>,
}

/// Live progress of one multipart transfer
pub struct MultipartState {
    content_id: String,
    fingerprint: Fingerprint,
    layout: PartLayout,
    mode: OpenMode,
    book: Arc<BreakpointBook>,
    progress: RwLock<PartProgress>,
    flush_lock: Mutex<()>,
    stale_upload_id: Option<String>,
}

impl MultipartState {
    fn fresh(
        book: Arc<BreakpointBook>,
        content_id: String,
        fingerprint: Fingerprint,
        layout: PartLayout,
    ) -> Self {
        Self::build(book, content_id, fingerprint, layout, OpenMode::Fresh, String::new(), Vec::new())
    }

    fn resumed(
        book: Arc<BreakpointBook>,
        content_id: String,
        fingerprint: Fingerprint,
        record: BreakpointRecord,
    ) -> Self {
        let layout = PartLayout {
            part_size: record.part_size,
            parts_num: record.parts_num,
        };
        Self::build(
            book,
            content_id,
            fingerprint,
            layout,
            OpenMode::Resumed,
            record.upload_id,
            record.completed_parts,
        )
    }

    fn build(
        book: Arc<BreakpointBook>,
        content_id: String,
        fingerprint: Fingerprint,
        layout: PartLayout,
        mode: OpenMode,
        upload_id: String,
        parts: Vec<CompletedPart>,
    ) -> Self {
        let completed = parts
            .into_iter()
            .filter(|p| p.part_number >= 1 && p.part_number <= layout.parts_num)
            .filter(|p| !p.etag.is_empty())
            .map(|p| (p.part_number, p))
            .collect();

        Self {
            content_id,
            fingerprint,
            layout,
            mode,
            book,
            progress: RwLock::new(PartProgress {
                upload_id,
                completed,
                dirty: false,
                finish_seq: 0,
                flushed_seq: 0,
                closed: false,
                last_flush_time: None,
                last_finish_part_time: None,
            }),
            flush_lock: Mutex::new(()),
            stale_upload_id: None,
        }
    }

    /// Record name
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Fresh or resumed
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Part size and count
    pub fn layout(&self) -> PartLayout {
        self.layout
    }

    /// Source fingerprint this progress belongs to
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Upload id of a record this fresh state replaced
    ///
    /// The backend still holds that upload until it is aborted.
    pub fn stale_upload_id(&self) -> Option<&str> {
        self.stale_upload_id.as_deref()
    }

    /// Backend upload id, empty until assigned
    pub fn upload_id(&self) -> String {
        read_lock(&self.progress).upload_id.clone()
    }

    /// Assign the backend upload id of a fresh transfer
    pub fn set_upload_id(&self, upload_id: impl Into<String>) {
        let mut progress = write_lock(&self.progress);
        progress.upload_id = upload_id.into();
        progress.dirty = true;
        progress.finish_seq += 1;
    }

    /// Record an acknowledged part
    pub fn finish_part(&self, part_number: u32, etag: impl Into<String>) -> Result<()> {
        if part_number < 1 || part_number > self.layout.parts_num {
            return Err(SyncError::InvalidPartNumber {
                part: part_number,
                parts_num: self.layout.parts_num,
            });
        }
        let etag = etag.into();
        if etag.is_empty() {
            return Err(SyncError::EmptyETag(part_number));
        }

        let mut progress = write_lock(&self.progress);
        progress
            .completed
            .insert(part_number, CompletedPart { part_number, etag });
        progress.dirty = true;
        progress.finish_seq += 1;
        progress.last_finish_part_time = Some(SystemTime::now());
        tracing::debug!("{} part {}/{} done", self.content_id, part_number, self.layout.parts_num);
        Ok(())
    }

    /// Look up a completed part
    ///
    /// A part without a transfer tag is not completed; such an entry is
    /// dropped so it gets transferred again.
    pub fn completed_part(&self, part_number: u32) -> Option<CompletedPart> {
        let found = read_lock(&self.progress).completed.get(&part_number).cloned();
        match found {
            Some(part) if part.etag.is_empty() => {
                let mut progress = write_lock(&self.progress);
                match progress.completed.get(&part_number) {
                    Some(part) if part.etag.is_empty() => {
                        progress.completed.remove(&part_number);
                        None
                    }
                    other => other.cloned(),
                }
            }
            other => other,
        }
    }

    /// Number of parts acknowledged with a tag
    pub fn completed_count(&self) -> usize {
        self.completed_parts().len()
    }

    /// Parts still to transfer, ascending
    pub fn pending_parts(&self) -> Vec<u32> {
        (1..=self.layout.parts_num)
            .filter(|&part| self.completed_part(part).is_none())
            .collect()
    }

    /// Completed parts in part order
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.purge_empty();
        read_lock(&self.progress).completed.values().cloned().collect()
    }

    fn purge_empty(&self) {
        let has_empty = read_lock(&self.progress)
            .completed
            .values()
            .any(|p| p.etag.is_empty());
        if has_empty {
            write_lock(&self.progress)
                .completed
                .retain(|_, p| !p.etag.is_empty());
        }
    }

    /// Durable projection of the current progress
    pub fn snapshot(&self) -> BreakpointRecord {
        let progress = read_lock(&self.progress);
        self.record_from(&progress)
    }

    fn record_from(&self, progress: &PartProgress) -> BreakpointRecord {
        BreakpointRecord {
            md5: self.fingerprint.tail_md5.clone(),
            upload_id: progress.upload_id.clone(),
            src_file_size: self.fingerprint.size,
            src_file_last_modified: self.fingerprint.modified_secs,
            parts_num: self.layout.parts_num,
            part_size: self.layout.part_size,
            completed_parts: progress
                .completed
                .values()
                .filter(|p| !p.etag.is_empty())
                .cloned()
                .collect(),
            record_time: now_secs(),
        }
    }

    /// Persist the record if anything changed since the last flush
    ///
    /// Returns whether a record was written.
    pub fn flush(&self) -> Result<bool> {
        let _guard = lock(&self.flush_lock);
        let (record, seq) = {
            let progress = read_lock(&self.progress);
            if progress.closed || !progress.dirty || progress.finish_seq == progress.flushed_seq {
                return Ok(false);
            }
            (self.record_from(&progress), progress.finish_seq)
        };

        self.book.save(&self.content_id, &record)?;

        let mut progress = write_lock(&self.progress);
        progress.flushed_seq = seq;
        if progress.finish_seq == seq {
            progress.dirty = false;
        }
        progress.last_flush_time = Some(SystemTime::now());
        tracing::debug!(
            "Saved breakpoint {} ({} parts)",
            self.content_id,
            record.completed_parts.len()
        );
        Ok(true)
    }

    /// The transfer finished: drop the record for good
    pub fn complete(&self) -> Result<()> {
        self.close()
    }

    /// The progress is unusable: drop the record so the next attempt starts fresh
    pub fn discard(&self) -> Result<()> {
        tracing::debug!("Discarding breakpoint {}", self.content_id);
        self.close()
    }

    fn close(&self) -> Result<()> {
        let _guard = lock(&self.flush_lock);
        write_lock(&self.progress).closed = true;
        self.book.remove(&self.content_id)
    }

    /// When the record was last written
    pub fn last_flush_time(&self) -> Option<SystemTime> {
        read_lock(&self.progress).last_flush_time
    }

    /// When the last part was acknowledged
    pub fn last_finish_part_time(&self) -> Option<SystemTime> {
        read_lock(&self.progress).last_finish_part_time
    }

    /// Flush periodically until the returned handle is stopped or dropped
    pub fn start_flusher(self: &Arc<Self>, interval: Duration) -> Result<FlushHandle> {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(0);
        let state = Arc::clone(self);

        let thread = thread::Builder::new()
            .name("objsync-flush".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                        if let Err(e) = state.flush() {
                            tracing::warn!("Failed to save breakpoint {}: {}", state.content_id, e);
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| SyncError::io("objsync-flush", e))?;

        Ok(FlushHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Background flusher tied to one transfer
pub struct FlushHandle {
    stop: Option<crossbeam::channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FlushHandle {
    /// Stop the flusher and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}
