//! In-process object store
//!
//! Keeps buckets, objects and pending multipart uploads in memory. Used by
//! tests and benches, and as a reference for the semantics the sync engine
//! expects from a backend.

use crate::error::{Result, SyncError};
use crate::hash::md5_hex;
use crate::storage::{
    BucketInfo, CompletedPart, ListPage, ListRequest, ObjectInfo, ObjectStore, PartSource,
    PutOptions, MAX_PARTS,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: SystemTime,
    etag: String,
    storage_class: Option<String>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: self.modified,
            etag: Some(self.etag.clone()),
            storage_class: self.storage_class.clone(),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    options: PutOptions,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_parts_once: HashSet<u32>,
    fail_keys: HashSet<String>,
}

/// Object store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    faults: Mutex<Faults>,
    next_upload: AtomicU64,
    part_uploads: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given buckets already present
    pub fn with_buckets(names: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut buckets = write_lock(&store.buckets);
            for name in names {
                buckets.entry(name.to_string()).or_default();
            }
        }
        store
    }

    /// Store an object directly with an explicit modification time
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8], modified: SystemTime) {
        let object = StoredObject {
            etag: md5_hex(data),
            data: data.to_vec(),
            modified,
            storage_class: None,
        };
        write_lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Object content, if present
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        read_lock(&self.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
    }

    /// All keys of a bucket, in order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        read_lock(&self.buckets)
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of multipart uploads that were neither completed nor aborted
    pub fn pending_uploads(&self) -> Vec<String> {
        read_lock(&self.uploads).keys().cloned().collect()
    }

    /// Forget a pending upload as if the backend had expired it
    pub fn expire_upload(&self, upload_id: &str) {
        write_lock(&self.uploads).remove(upload_id);
    }

    /// Make the next upload of each listed part number fail once
    pub fn fail_parts_once(&self, parts: &[u32]) {
        let mut faults = lock(&self.faults);
        faults.fail_parts_once.extend(parts.iter().copied());
    }

    /// Make every write to `key` fail
    pub fn fail_key(&self, key: &str) {
        lock(&self.faults).fail_keys.insert(key.to_string());
    }

    /// Number of successful `upload_part` and `upload_part_copy` calls
    pub fn part_upload_count(&self) -> usize {
        self.part_uploads.load(Ordering::SeqCst)
    }

    fn check_key_fault(&self, op: &'static str, key: &str) -> Result<()> {
        if lock(&self.faults).fail_keys.contains(key) {
            return Err(SyncError::storage(op, key, "injected failure"));
        }
        Ok(())
    }

    fn require_bucket(&self, bucket: &str) -> Result<()> {
        if read_lock(&self.buckets).contains_key(bucket) {
            Ok(())
        } else {
            Err(SyncError::BucketNotFound(bucket.to_string()))
        }
    }

    fn store_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String> {
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(SyncError::InvalidPartNumber {
                part: part_number,
                parts_num: MAX_PARTS,
            });
        }
        if lock(&self.faults).fail_parts_once.remove(&part_number) {
            return Err(SyncError::storage("upload_part", key, "injected part failure"));
        }
        self.check_key_fault("upload_part", key)?;

        let mut uploads = write_lock(&self.uploads);
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| SyncError::NoSuchUpload(upload_id.to_string()))?;
        let etag = md5_hex(&data);
        upload.parts.insert(part_number, (etag.clone(), data));
        self.part_uploads.fetch_add(1, Ordering::SeqCst);
        Ok(etag)
    }
}

impl ObjectStore for MemoryStore {
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage> {
        let buckets = read_lock(&self.buckets);
        let objects = buckets
            .get(&request.bucket)
            .ok_or_else(|| SyncError::BucketNotFound(request.bucket.clone()))?;

        let max_keys = request.max_keys.max(1);
        let mut page = ListPage::default();
        let mut last_key = None;
        let candidates = objects.iter().filter(|(key, _)| {
            key.starts_with(&request.prefix)
                && request.token.as_deref().map_or(true, |after| key.as_str() > after)
        });

        for (key, object) in candidates {
            if page.objects.len() + page.common_prefixes.len() == max_keys {
                page.is_truncated = true;
                break;
            }
            if let Some(delimiter) = request.delimiter.as_deref() {
                let rest = &key[request.prefix.len()..];
                if let Some(pos) = rest.find(delimiter) {
                    let common = format!("{}{}", request.prefix, &rest[..pos + delimiter.len()]);
                    if page.common_prefixes.last() != Some(&common) {
                        page.common_prefixes.push(common);
                    }
                    last_key = Some(key.clone());
                    continue;
                }
            }
            page.objects.push(object.info(key));
            last_key = Some(key.clone());
        }

        if page.is_truncated {
            page.next_token = last_key;
        }
        Ok(page)
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.require_bucket(bucket)?;
        read_lock(&self.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.info(key))
            .ok_or_else(|| SyncError::object_not_found(bucket, key))
    }

    fn get_object(&self, bucket: &str, key: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        self.require_bucket(bucket)?;
        let buckets = read_lock(&self.buckets);
        let object = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| SyncError::object_not_found(bucket, key))?;

        match range {
            None => Ok(object.data.clone()),
            Some(range) => {
                let len = object.data.len() as u64;
                if range.start > range.end || range.start > len {
                    return Err(SyncError::storage("get_object", key, "range not satisfiable"));
                }
                let end = range.end.min(len);
                Ok(object.data[range.start as usize..end as usize].to_vec())
            }
        }
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        self.require_bucket(bucket)?;
        self.check_key_fault("put_object", key)?;
        let object = StoredObject {
            etag: md5_hex(&data),
            data,
            modified: options.modified.unwrap_or_else(SystemTime::now),
            storage_class: options.storage_class.clone(),
        };
        let info = object.info(key);
        write_lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
        Ok(info)
    }

    fn copy_object(&self, src_bucket: &str, src_key: &str, bucket: &str, key: &str) -> Result<()> {
        self.require_bucket(bucket)?;
        self.check_key_fault("copy_object", key)?;
        let mut buckets = write_lock(&self.buckets);
        let object = buckets
            .get(src_bucket)
            .and_then(|objects| objects.get(src_key))
            .cloned()
            .ok_or_else(|| SyncError::object_not_found(src_bucket, src_key))?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.require_bucket(bucket)?;
        self.check_key_fault("delete_object", key)?;
        if let Some(objects) = write_lock(&self.buckets).get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        self.require_bucket(bucket)?;
        self.check_key_fault("create_multipart_upload", key)?;
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
        write_lock(&self.uploads).insert(
            id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String> {
        self.store_part(key, upload_id, part_number, data)
    }

    fn upload_part_copy(
        &self,
        source: &PartSource,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        let data = self.get_object(&source.bucket, &source.key, Some(source.range.clone()))?;
        self.store_part(key, upload_id, part_number, data)
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        self.check_key_fault("complete_multipart_upload", key)?;
        let upload = write_lock(&self.uploads)
            .remove(upload_id)
            .ok_or_else(|| SyncError::NoSuchUpload(upload_id.to_string()))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(SyncError::storage(
                "complete_multipart_upload",
                key,
                "upload id belongs to a different object",
            ));
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(SyncError::storage(
                    "complete_multipart_upload",
                    key,
                    "parts are not in ascending order",
                ));
            }
            previous = part.part_number;
            let (etag, bytes) = upload.parts.get(&part.part_number).ok_or_else(|| {
                SyncError::storage(
                    "complete_multipart_upload",
                    key,
                    format!("part {} was never uploaded", part.part_number),
                )
            })?;
            if *etag != part.etag {
                return Err(SyncError::storage(
                    "complete_multipart_upload",
                    key,
                    format!("ETag mismatch for part {}", part.part_number),
                ));
            }
            data.extend_from_slice(bytes);
        }

        let object = StoredObject {
            etag: format!("{}-{}", md5_hex(&data), parts.len()),
            data,
            modified: upload.options.modified.unwrap_or_else(SystemTime::now),
            storage_class: upload.options.storage_class,
        };
        write_lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
        Ok(())
    }

    fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        write_lock(&self.uploads)
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| SyncError::NoSuchUpload(upload_id.to_string()))
    }

    fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        Ok(read_lock(&self.buckets)
            .keys()
            .map(|name| BucketInfo {
                name: name.clone(),
                created: None,
            })
            .collect())
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(read_lock(&self.buckets).contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = write_lock(&self.buckets);
        if buckets.contains_key(bucket) {
            return Err(SyncError::storage("create_bucket", bucket, "bucket already exists"));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = write_lock(&self.buckets);
        match buckets.get(bucket) {
            None => Err(SyncError::BucketNotFound(bucket.to_string())),
            Some(objects) if !objects.is_empty() => {
                Err(SyncError::storage("delete_bucket", bucket, "bucket is not empty"))
            }
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    fn presign_get(&self, bucket: &str, key: &str, expires: Duration) -> Result<String> {
        self.head_object(bucket, key)?;
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            expires.as_secs()
        ))
    }

    fn preserves_mtime(&self) -> bool {
        true
    }
}

// A poisoned lock only means another test thread panicked mid-update;
// the maps themselves stay structurally valid.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}
