//! Multipart upload, download and copy
//!
//! Each routine opens (or resumes) a [`MultipartState`], runs the pending
//! parts on a dedicated rayon pool of `part_threads` threads, and either
//! completes the transfer or flushes the record for the next attempt.

use crate::error::{IoResultExt, Result, SyncError};
use crate::hash::{content_id, md5_hex, tail_md5_file, tail_md5_object};
use crate::storage::{ObjectStore, PartSource, PutOptions};
use crate::sync::{BreakpointBook, Fingerprint, MultipartState, OpenMode};
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Suffix of the partial file a multipart download writes into
pub const PARTIAL_SUFFIX: &str = ".objsync-part";

/// Settings shared by every multipart routine
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Initial part size
    pub part_size: u64,
    /// Parts in flight per transfer
    pub part_threads: usize,
    /// Ignore existing records
    pub restart: bool,
    /// Background flush interval
    pub flush_interval: Duration,
}

/// A remote object addressed by backend, bucket and key
#[derive(Clone, Copy)]
pub struct ObjectRef<'a> {
    /// Backend
    pub store: &'a dyn ObjectStore,
    /// Bucket
    pub bucket: &'a str,
    /// Full key
    pub key: &'a str,
}

/// Path of the partial file for a download target
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

/// Upload a local file in parts
pub fn upload_file(
    config: &MultipartConfig,
    book: &Arc<BreakpointBook>,
    path: &Path,
    modified: SystemTime,
    dst: ObjectRef<'_>,
    descriptors: (&str, &str),
) -> Result<u64> {
    let size = std::fs::metadata(path).with_path(path)?.len();
    let fingerprint = Fingerprint {
        size,
        modified_secs: crate::fs::system_time_secs(modified),
        tail_md5: tail_md5_file(path)?,
    };
    let options = PutOptions {
        modified: Some(modified),
        storage_class: None,
    };

    with_restart(config, book, descriptors, fingerprint, true, |state| {
        ensure_upload(state, dst, &options)?;
        run_parts(config, state, |part, range| {
            let data = read_range(path, range)?;
            dst.store
                .upload_part(dst.bucket, dst.key, &state.upload_id(), part, data)
        })?;
        complete_upload(state, dst)?;
        Ok(size)
    })
}

/// Copy an object into another object in parts
pub fn copy_object(
    config: &MultipartConfig,
    book: &Arc<BreakpointBook>,
    src: ObjectRef<'_>,
    size: u64,
    modified: SystemTime,
    dst: ObjectRef<'_>,
    descriptors: (&str, &str),
) -> Result<u64> {
    let fingerprint = Fingerprint {
        size,
        modified_secs: crate::fs::system_time_secs(modified),
        tail_md5: tail_md5_object(src.store, src.bucket, src.key, size)?,
    };
    let options = PutOptions {
        modified: Some(modified),
        storage_class: None,
    };

    with_restart(config, book, descriptors, fingerprint, true, |state| {
        ensure_upload(state, dst, &options)?;
        run_parts(config, state, |part, range| {
            let source = PartSource {
                bucket: src.bucket.to_string(),
                key: src.key.to_string(),
                range,
            };
            dst.store
                .upload_part_copy(&source, dst.bucket, dst.key, &state.upload_id(), part)
        })?;
        complete_upload(state, dst)?;
        Ok(size)
    })
}

/// Download an object in parts into `target`
///
/// Parts are written into the preallocated partial file, which is renamed
/// over the target once every part is in place.
pub fn download_object(
    config: &MultipartConfig,
    book: &Arc<BreakpointBook>,
    src: ObjectRef<'_>,
    size: u64,
    modified: SystemTime,
    target: &Path,
    descriptors: (&str, &str),
) -> Result<u64> {
    let fingerprint = Fingerprint {
        size,
        modified_secs: crate::fs::system_time_secs(modified),
        tail_md5: tail_md5_object(src.store, src.bucket, src.key, size)?,
    };
    let partial = partial_path(target);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }
    let have_partial = partial.is_file();

    with_restart(config, book, descriptors, fingerprint, have_partial, |state| {
        if state.mode() == OpenMode::Fresh {
            let file = File::create(&partial).with_path(&partial)?;
            file.set_len(size).with_path(&partial)?;
        }

        run_parts(config, state, |part, range| {
            let data = src.store.get_object(src.bucket, src.key, Some(range.clone()))?;
            if data.len() as u64 != range.end - range.start {
                return Err(SyncError::storage(
                    "get_object",
                    src.key,
                    format!("short read for part {}", part),
                ));
            }
            let mut file = OpenOptions::new()
                .write(true)
                .open(&partial)
                .with_path(&partial)?;
            file.seek(SeekFrom::Start(range.start)).with_path(&partial)?;
            file.write_all(&data).with_path(&partial)?;
            Ok(md5_hex(&data))
        })?;

        check_all_parts(state)?;
        std::fs::rename(&partial, target).with_path(target)?;
        filetime::set_file_mtime(target, filetime::FileTime::from_system_time(modified))
            .with_path(target)?;
        Ok(size)
    })
}

/// Run a transfer, starting over once if the backend forgot a resumed upload
fn with_restart<F>(
    config: &MultipartConfig,
    book: &Arc<BreakpointBook>,
    descriptors: (&str, &str),
    fingerprint: Fingerprint,
    can_resume: bool,
    transfer: F,
) -> Result<u64>
where
    F: Fn(&Arc<MultipartState>) -> Result<u64>,
{
    let id = content_id(descriptors.0, descriptors.1);
    let mut allow_resume = can_resume && !config.restart;

    loop {
        let state = book.open(id.clone(), fingerprint.clone(), config.part_size, allow_resume);
        let flusher = state.start_flusher(config.flush_interval)?;
        let result = transfer(&state);
        flusher.stop();

        match result {
            Ok(bytes) => {
                state.complete()?;
                return Ok(bytes);
            }
            Err(SyncError::NoSuchUpload(_)) if state.mode() == OpenMode::Resumed => {
                tracing::warn!(
                    "Upload for {} expired on the server, restarting from part 1",
                    descriptors.1
                );
                state.discard()?;
                allow_resume = false;
            }
            Err(err) => {
                if let Err(e) = state.flush() {
                    tracing::warn!("Failed to save breakpoint for {}: {}", descriptors.1, e);
                }
                return Err(err);
            }
        }
    }
}

fn ensure_upload(state: &MultipartState, dst: ObjectRef<'_>, options: &PutOptions) -> Result<()> {
    if state.upload_id().is_empty() {
        if let Some(stale) = state.stale_upload_id() {
            abort_stale(dst, stale);
        }
        let upload_id = dst
            .store
            .create_multipart_upload(dst.bucket, dst.key, options)?;
        tracing::debug!("Started multipart upload {} for {}", upload_id, dst.key);
        state.set_upload_id(upload_id);
    }
    Ok(())
}

fn abort_stale(dst: ObjectRef<'_>, upload_id: &str) {
    match dst.store.abort_multipart_upload(dst.bucket, dst.key, upload_id) {
        Ok(()) => tracing::debug!("Aborted abandoned upload {} for {}", upload_id, dst.key),
        Err(SyncError::NoSuchUpload(_)) => {}
        Err(e) => tracing::warn!("Could not abort abandoned upload {}: {}", upload_id, e),
    }
}

/// Transfer every pending part, recording each acknowledgement
fn run_parts<F>(config: &MultipartConfig, state: &MultipartState, part: F) -> Result<()>
where
    F: Fn(u32, std::ops::Range<u64>) -> Result<String> + Sync,
{
    let layout = state.layout();
    let size = state.fingerprint().size;
    let pending = state.pending_parts();
    if pending.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.part_threads.max(1))
        .thread_name(|i| format!("objsync-part-{}", i))
        .build()
        .map_err(|e| SyncError::storage("part_pool", state.content_id(), e))?;

    let results: Vec<Result<()>> = pool.install(|| {
        pending
            .par_iter()
            .map(|&number| {
                let etag = part(number, layout.range(number, size))?;
                state.finish_part(number, etag)
            })
            .collect()
    });

    let failed = results.iter().filter(|r| r.is_err()).count();
    match results.into_iter().find_map(|r| r.err()) {
        Some(SyncError::NoSuchUpload(id)) => Err(SyncError::NoSuchUpload(id)),
        Some(err) => {
            tracing::debug!("{} of {} parts failed", failed, pending.len());
            Err(err)
        }
        None => Ok(()),
    }
}

fn check_all_parts(state: &MultipartState) -> Result<()> {
    let done = state.completed_count();
    let expected = state.layout().parts_num as usize;
    if done != expected {
        return Err(SyncError::storage(
            "complete",
            state.content_id(),
            format!("{} of {} parts completed", done, expected),
        ));
    }
    Ok(())
}

fn complete_upload(state: &MultipartState, dst: ObjectRef<'_>) -> Result<()> {
    check_all_parts(state)?;
    dst.store.complete_multipart_upload(
        dst.bucket,
        dst.key,
        &state.upload_id(),
        &state.completed_parts(),
    )
}

fn read_range(path: &Path, range: std::ops::Range<u64>) -> Result<Vec<u8>> {
    let mut file = File::open(path).with_path(path)?;
    file.seek(SeekFrom::Start(range.start)).with_path(path)?;
    let mut data = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut data).with_path(path)?;
    Ok(data)
}
