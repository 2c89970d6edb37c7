//! Source and destination descriptors
//!
//! A location is either a local path or an `s3://bucket/prefix` URL.

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::PathBuf;

/// One side of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Local filesystem path
    Local(PathBuf),
    /// Bucket plus key prefix
    Remote {
        /// Bucket name
        bucket: String,
        /// Key prefix (may be empty)
        prefix: String,
    },
}

impl Location {
    /// Parse a command-line argument
    pub fn parse(value: &str) -> Result<Self> {
        if is_s3_url(value) {
            let (bucket, prefix) = parse_s3_url(value)
                .ok_or_else(|| SyncError::validation(format!("malformed URL '{}'", value)))?;
            if bucket.is_empty() {
                return Err(SyncError::validation(format!("missing bucket in '{}'", value)));
            }
            Ok(Self::Remote { bucket, prefix })
        } else if value.is_empty() {
            Err(SyncError::validation("empty path"))
        } else {
            Ok(Self::Local(PathBuf::from(value)))
        }
    }

    /// The same location treated as the root of a tree
    ///
    /// Remote prefixes gain a trailing `/` so `s3://b/dir` does not also
    /// match `s3://b/dir2/...`.
    pub fn as_tree_root(&self) -> Self {
        match self {
            Self::Remote { bucket, prefix } if !prefix.is_empty() && !prefix.ends_with('/') => {
                Self::Remote {
                    bucket: bucket.clone(),
                    prefix: format!("{}/", prefix),
                }
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
        }
    }
}

/// Parse S3 URL (s3://bucket/key)
pub fn parse_s3_url(url: &str) -> Option<(String, String)> {
    let path = url.strip_prefix("s3://")?;
    let mut parts = path.splitn(2, '/');
    let bucket = parts.next()?.to_string();
    let key = parts.next().unwrap_or("").to_string();

    Some((bucket, key))
}

/// Check if path is an S3 URL
pub fn is_s3_url(path: &str) -> bool {
    path.starts_with("s3://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_url() {
        assert_eq!(
            parse_s3_url("s3://my-bucket/path/to/file"),
            Some(("my-bucket".to_string(), "path/to/file".to_string()))
        );
        assert_eq!(
            parse_s3_url("s3://bucket"),
            Some(("bucket".to_string(), "".to_string()))
        );
        assert_eq!(parse_s3_url("/local/path"), None);
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            Location::parse("s3://b/photos").unwrap(),
            Location::Remote { bucket: "b".into(), prefix: "photos".into() }
        );
        assert_eq!(
            Location::parse("./data").unwrap(),
            Location::Local(PathBuf::from("./data"))
        );
        assert!(Location::parse("s3:///key").is_err());
        assert!(Location::parse("").is_err());
    }

    #[test]
    fn test_tree_root() {
        let root = Location::parse("s3://b/photos").unwrap().as_tree_root();
        assert_eq!(root.to_string(), "s3://b/photos/");

        let bucket_root = Location::parse("s3://b").unwrap().as_tree_root();
        assert_eq!(bucket_root.to_string(), "s3://b/");

        let local = Location::Local(PathBuf::from("/tmp/x"));
        assert_eq!(local.as_tree_root(), local);
    }
}
