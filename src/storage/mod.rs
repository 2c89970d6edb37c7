//! Object storage module
//!
//! The sync engine talks to storage only through the [`ObjectStore`]
//! trait. `MemoryStore` is an in-process backend; `S3Store` (feature
//! `native_s3`) talks to AWS S3 and compatible services.

mod lister;
mod memory;
#[cfg(feature = "native_s3")]
mod s3;

pub use lister::*;
pub use memory::*;
#[cfg(feature = "native_s3")]
pub use s3::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{Duration, SystemTime};

/// Largest part number a multipart upload accepts
pub const MAX_PARTS: u32 = 10_000;

/// Page size used when listing objects
pub const LIST_PAGE_SIZE: usize = 1000;

/// Object information returned by list and head calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified time
    pub last_modified: SystemTime,
    /// ETag as reported by the backend
    pub etag: Option<String>,
    /// Storage class
    pub storage_class: Option<String>,
}

/// Bucket information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name
    pub name: String,
    /// Creation time, if reported
    pub created: Option<SystemTime>,
}

/// One list-objects call
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Bucket to list
    pub bucket: String,
    /// Only keys starting with this prefix
    pub prefix: String,
    /// Group keys sharing a prefix up to this delimiter
    pub delimiter: Option<String>,
    /// Continuation token from the previous page
    pub token: Option<String>,
    /// Page size
    pub max_keys: usize,
}

/// One page of a listing, in key order
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page
    pub objects: Vec<ObjectInfo>,
    /// Grouped prefixes when a delimiter was given
    pub common_prefixes: Vec<String>,
    /// More results exist
    pub is_truncated: bool,
    /// Token for the next page
    pub next_token: Option<String>,
}

/// Options for object writes
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Source modification time, kept by backends that can store it
    pub modified: Option<SystemTime>,
    /// Storage class for the new object
    pub storage_class: Option<String>,
}

/// A part acknowledged by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    /// 1-based part number
    #[serde(rename = "partNumberId")]
    pub part_number: u32,
    /// Transfer tag returned for the part
    #[serde(rename = "eTag")]
    pub etag: String,
}

/// Server-side copy source for one part
#[derive(Debug, Clone)]
pub struct PartSource {
    /// Source bucket
    pub bucket: String,
    /// Source key
    pub key: String,
    /// Byte range of the source object
    pub range: Range<u64>,
}

/// Storage backend capability consumed by the sync engine
///
/// Calls block the calling thread; implementations must be shareable
/// between worker threads.
pub trait ObjectStore: Send + Sync {
    /// List one page of objects
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage>;

    /// Fetch metadata of one object
    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Read an object, or a byte range of it
    fn get_object(&self, bucket: &str, key: &str, range: Option<Range<u64>>) -> Result<Vec<u8>>;

    /// Write a whole object
    fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>, options: &PutOptions)
        -> Result<ObjectInfo>;

    /// Server-side copy of a whole object
    fn copy_object(&self, src_bucket: &str, src_key: &str, bucket: &str, key: &str)
        -> Result<()>;

    /// Delete an object
    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Start a multipart upload, returning its upload id
    fn create_multipart_upload(&self, bucket: &str, key: &str, options: &PutOptions)
        -> Result<String>;

    /// Upload one part, returning its ETag
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String>;

    /// Copy one part from an existing object, returning its ETag
    fn upload_part_copy(
        &self,
        source: &PartSource,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String>;

    /// Assemble the uploaded parts into the final object
    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Abandon a multipart upload
    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// List all buckets
    fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Does the bucket exist and is it reachable?
    fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a bucket
    fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Delete an empty bucket
    fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Pre-signed GET URL valid for `expires`
    fn presign_get(&self, bucket: &str, key: &str, expires: Duration) -> Result<String>;

    /// Whether listed modification times reflect [`PutOptions::modified`]
    fn preserves_mtime(&self) -> bool {
        false
    }
}
