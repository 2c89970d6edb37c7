//! Native AWS S3 backend
//!
//! Wraps the AWS SDK behind the blocking [`ObjectStore`] interface. Every
//! call is driven on a private tokio runtime, so any number of sync worker
//! threads can share one client and its connection pool. Works with
//! S3-compatible endpoints (MinIO, Wasabi, ...) through a custom endpoint
//! and path-style addressing.

use crate::config::Settings;
use crate::error::{Result, SyncError};
use crate::storage::{
    BucketInfo, CompletedPart, ListPage, ListRequest, ObjectInfo, ObjectStore, PartSource,
    PutOptions,
};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CreateBucketConfiguration, StorageClass,
};
use std::future::Future;
use std::ops::Range;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum retry delay cap in seconds.
const MAX_RETRY_DELAY_SECS: u64 = 64;

/// Connection settings for [`S3Store`]
#[derive(Debug, Clone)]
pub struct S3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Retries per call on transient failures
    pub max_retries: u32,
    /// Force path-style access
    pub force_path_style: bool,
    /// Access key ID (falls back to the AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (falls back to the AWS credential chain)
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            max_retries: 5,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl From<&Settings> for S3Config {
    fn from(settings: &Settings) -> Self {
        Self {
            region: settings.region.clone(),
            endpoint_url: settings.endpoint.clone(),
            force_path_style: settings.path_style,
            access_key_id: settings.access_key_id.clone(),
            secret_access_key: settings.secret_access_key.clone(),
            ..Self::default()
        }
    }
}

/// Object store backed by the AWS SDK
pub struct S3Store {
    client: aws_sdk_s3::Client,
    runtime: tokio::runtime::Runtime,
    config: S3Config,
}

impl S3Store {
    /// Build a client from configuration
    pub fn new(config: S3Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("objsync-s3")
            .build()
            .map_err(|e| SyncError::Config(format!("cannot start S3 runtime: {}", e)))?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(config.region.clone()));

            if let Some(ref endpoint) = config.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }

            if let (Some(ref key_id), Some(ref secret)) =
                (&config.access_key_id, &config.secret_access_key)
            {
                let creds = aws_credential_types::Credentials::new(
                    key_id,
                    secret,
                    None,
                    None,
                    "objsync-static",
                );
                loader = loader.credentials_provider(creds);
            }

            let shared = loader.load().await;
            let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
            if config.force_path_style {
                s3_config = s3_config.force_path_style(true);
            }
            aws_sdk_s3::Client::from_conf(s3_config.build())
        });

        Ok(Self {
            client,
            runtime,
            config,
        })
    }

    /// Run one call, retrying transient failures with exponential backoff
    fn call<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.runtime.block_on(async {
            let mut retries = 0;
            loop {
                match f().await {
                    Ok(value) => return Ok(value),
                    Err(e) if is_transient(&e) && retries < self.config.max_retries => {
                        retries += 1;
                        let delay = exponential_backoff_delay(retries);
                        tracing::warn!(
                            "S3 {} on '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                            op,
                            key,
                            retries,
                            self.config.max_retries,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

impl ObjectStore for S3Store {
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage> {
        self.call("list_objects", &request.prefix, move || async move {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&request.bucket)
                .prefix(&request.prefix)
                .set_delimiter(request.delimiter.clone())
                .set_continuation_token(request.token.clone())
                .max_keys(request.max_keys as i32)
                .send()
                .await
                .map_err(|e| sdk_error("list_objects", &request.bucket, &request.prefix, e))?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|object| {
                    Some(ObjectInfo {
                        key: object.key()?.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        last_modified: to_system_time(object.last_modified()),
                        etag: object.e_tag().map(str::to_string),
                        storage_class: object.storage_class().map(|c| c.as_str().to_string()),
                    })
                })
                .collect();

            Ok(ListPage {
                objects,
                common_prefixes: resp
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string))
                    .collect(),
                is_truncated: resp.is_truncated().unwrap_or(false),
                next_token: resp.next_continuation_token().map(str::to_string),
            })
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.call("head_object", key, move || async move {
            let resp = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| sdk_error("head_object", bucket, key, e))?;

            Ok(ObjectInfo {
                key: key.to_string(),
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: to_system_time(resp.last_modified()),
                etag: resp.e_tag().map(str::to_string),
                storage_class: resp.storage_class().map(|c| c.as_str().to_string()),
            })
        })
    }

    fn get_object(&self, bucket: &str, key: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        if matches!(&range, Some(r) if r.start >= r.end) {
            return Ok(Vec::new());
        }
        let range = &range;
        self.call("get_object", key, move || async move {
            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .set_range(range.as_ref().map(http_range))
                .send()
                .await
                .map_err(|e| sdk_error("get_object", bucket, key, e))?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| SyncError::storage("get_object", key, e))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let size = data.len() as u64;
        let data = &data;
        let etag = self.call("put_object", key, move || async move {
            let resp = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
                .body(ByteStream::from(data.clone()))
                .send()
                .await
                .map_err(|e| sdk_error("put_object", bucket, key, e))?;
            Ok(resp.e_tag().map(str::to_string))
        })?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            last_modified: SystemTime::now(),
            etag,
            storage_class: options.storage_class.clone(),
        })
    }

    fn copy_object(&self, src_bucket: &str, src_key: &str, bucket: &str, key: &str) -> Result<()> {
        self.call("copy_object", key, move || async move {
            self.client
                .copy_object()
                .copy_source(format!("{}/{}", src_bucket, src_key))
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| sdk_error("copy_object", bucket, key, e))?;
            Ok(())
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.call("delete_object", key, move || async move {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| sdk_error("delete_object", bucket, key, e))?;
            Ok(())
        })
    }

    fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        self.call("create_multipart_upload", key, move || async move {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
                .send()
                .await
                .map_err(|e| sdk_error("create_multipart_upload", bucket, key, e))?;

            resp.upload_id().map(str::to_string).ok_or_else(|| {
                SyncError::storage("create_multipart_upload", key, "missing upload id")
            })
        })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<String> {
        let data = &data;
        self.call("upload_part", key, move || async move {
            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .body(ByteStream::from(data.clone()))
                .send()
                .await
                .map_err(|e| sdk_error("upload_part", bucket, key, e))?;
            Ok(resp.e_tag().unwrap_or_default().to_string())
        })
    }

    fn upload_part_copy(
        &self,
        source: &PartSource,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        self.call("upload_part_copy", key, move || async move {
            let resp = self
                .client
                .upload_part_copy()
                .copy_source(format!("{}/{}", source.bucket, source.key))
                .copy_source_range(http_range(&source.range))
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .send()
                .await
                .map_err(|e| sdk_error("upload_part_copy", bucket, key, e))?;
            Ok(resp
                .copy_part_result()
                .and_then(|r| r.e_tag())
                .unwrap_or_default()
                .to_string())
        })
    }

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let completed: Vec<_> = parts
            .iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        let completed = &completed;

        self.call("complete_multipart_upload", key, move || async move {
            let upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed.clone()))
                .build();
            self.client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|e| sdk_error("complete_multipart_upload", bucket, key, e))?;
            Ok(())
        })
    }

    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.call("abort_multipart_upload", key, move || async move {
            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| sdk_error("abort_multipart_upload", bucket, key, e))?;
            Ok(())
        })
    }

    fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.call("list_buckets", "", move || async move {
            let resp = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| sdk_error("list_buckets", "", "", e))?;
            Ok(resp
                .buckets()
                .iter()
                .filter_map(|b| {
                    Some(BucketInfo {
                        name: b.name()?.to_string(),
                        created: b.creation_date().map(|d| to_system_time(Some(d))),
                    })
                })
                .collect())
        })
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let result = self.call("head_bucket", bucket, move || async move {
            self.client
                .head_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| sdk_error("head_bucket", bucket, "", e))?;
            Ok(())
        });
        match result {
            Ok(()) => Ok(true),
            Err(SyncError::BucketNotFound(_)) | Err(SyncError::ObjectNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        let location = (self.config.region != "us-east-1").then(|| {
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.config.region.as_str()))
                .build()
        });
        let location = &location;
        self.call("create_bucket", bucket, move || async move {
            self.client
                .create_bucket()
                .bucket(bucket)
                .set_create_bucket_configuration(location.clone())
                .send()
                .await
                .map_err(|e| sdk_error("create_bucket", bucket, "", e))?;
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.call("delete_bucket", bucket, move || async move {
            self.client
                .delete_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| sdk_error("delete_bucket", bucket, "", e))?;
            Ok(())
        })
    }

    fn presign_get(&self, bucket: &str, key: &str, expires: Duration) -> Result<String> {
        let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(expires)
            .map_err(|e| SyncError::validation(format!("invalid expiry: {}", e)))?;
        self.runtime.block_on(async {
            let request = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| sdk_error("presign_get", bucket, key, e))?;
            Ok(request.uri().to_string())
        })
    }
}

/// Map an SDK error onto the error kinds the sync engine reacts to
fn sdk_error<E>(op: &'static str, bucket: &str, key: &str, err: E) -> SyncError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = DisplayErrorContext(&err).to_string();
    classify_code(err.code(), op, bucket, key, message)
}

fn classify_code(
    code: Option<&str>,
    op: &'static str,
    bucket: &str,
    key: &str,
    message: String,
) -> SyncError {
    match code {
        Some("NoSuchBucket") => SyncError::BucketNotFound(bucket.to_string()),
        Some("NotFound") if key.is_empty() => {
            SyncError::BucketNotFound(bucket.to_string())
        }
        Some("NoSuchKey" | "NotFound") => SyncError::object_not_found(bucket, key),
        Some("NoSuchUpload") => SyncError::NoSuchUpload(key.to_string()),
        _ => SyncError::storage(op, if key.is_empty() { bucket } else { key }, message),
    }
}

fn is_transient(err: &SyncError) -> bool {
    matches!(err, SyncError::Storage { .. })
}

fn to_system_time(time: Option<&DateTime>) -> SystemTime {
    time.and_then(|t| SystemTime::try_from(*t).ok())
        .unwrap_or(UNIX_EPOCH)
}

fn http_range(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end.saturating_sub(1))
}

/// Calculate exponential backoff delay: 2^retries seconds, capped at MAX_RETRY_DELAY_SECS.
fn exponential_backoff_delay(retries: u32) -> Duration {
    let secs = (1u64 << retries.min(16)).min(MAX_RETRY_DELAY_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = S3Config::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_retries, 5);
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            region: "eu-west-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            path_style: true,
            ..Settings::default()
        };
        let config = S3Config::from(&settings);
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff_delay(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff_delay(3), Duration::from_secs(8));
        assert_eq!(exponential_backoff_delay(6), Duration::from_secs(64));
        assert_eq!(exponential_backoff_delay(40), Duration::from_secs(64));
    }

    #[test]
    fn test_error_codes() {
        let not_found = classify_code(Some("NoSuchKey"), "get_object", "b", "k", String::new());
        assert!(not_found.is_vanished());

        let no_upload = classify_code(Some("NoSuchUpload"), "upload_part", "b", "k", String::new());
        assert!(matches!(no_upload, SyncError::NoSuchUpload(_)));

        let bucket = classify_code(Some("NotFound"), "head_bucket", "b", "", String::new());
        assert!(matches!(bucket, SyncError::BucketNotFound(_)));

        let other = classify_code(Some("SlowDown"), "put_object", "b", "k", "slow".into());
        assert!(is_transient(&other));
    }

    #[test]
    fn test_http_range_is_inclusive() {
        assert_eq!(http_range(&(0..10)), "bytes=0-9");
        assert_eq!(http_range(&(1024..2048)), "bytes=1024-2047");
    }
}
