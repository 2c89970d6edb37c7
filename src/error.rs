//! Error types for objsync
//!
//! One error enum is shared by every layer. Variants follow the way the sync
//! engine treats failures: validation problems abort before any I/O,
//! per-item failures are counted, vanished entries are skipped with a
//! warning, and listing failures abort the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for objsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad arguments or an impossible source/destination combination
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// I/O error during local file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local file or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Remote object not found
    #[error("Object not found: s3://{bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Bucket does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// A single storage backend call failed
    #[error("Storage error during {op} on '{key}': {message}")]
    Storage {
        op: &'static str,
        key: String,
        message: String,
    },

    /// The backend no longer knows the multipart upload id
    #[error("Multipart upload '{0}' no longer exists")]
    NoSuchUpload(String),

    /// Listing a tree failed, the comparison cannot continue
    #[error("Listing failed: {0}")]
    Listing(String),

    /// Breakpoint record could not be read or written
    #[error("Breakpoint record error: {0}")]
    Breakpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Part number outside of the transfer's part range
    #[error("Part number {part} is outside the valid range 1..={parts_num}")]
    InvalidPartNumber { part: u32, parts_num: u32 },

    /// A part was acknowledged without a transfer tag
    #[error("Part {0} was acknowledged with an empty ETag")]
    EmptyETag(u32),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a storage error for one backend call
    pub fn storage(op: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create an object-not-found error
    pub fn object_not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The entry existed at listing time but is gone now.
    pub fn is_vanished(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::ObjectNotFound { .. } => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Self::WithContext { source, .. } => source.is_vanished(),
            _ => false,
        }
    }

    /// Errors that abort a whole sync or copy run
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::Listing(_)
            | Self::Config(_)
            | Self::BucketNotFound(_) => true,
            Self::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Get the local path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::NotFound(path) => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for objsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Breakpoint(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SyncError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SyncError::io("/test/path", io_err);
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
        assert!(err.is_vanished());
    }

    #[test]
    fn test_vanished_classification() {
        assert!(SyncError::object_not_found("b", "k").is_vanished());
        assert!(SyncError::object_not_found("b", "k")
            .with_context("download")
            .is_vanished());
        assert!(!SyncError::storage("put", "k", "boom").is_vanished());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::Listing("timeout".into()).is_fatal());
        assert!(SyncError::validation("bad").is_fatal());
        assert!(!SyncError::storage("put", "k", "boom").is_fatal());
        assert!(!SyncError::EmptyETag(3).is_fatal());
    }

    #[test]
    fn test_part_number_message() {
        let err = SyncError::InvalidPartNumber { part: 12, parts_num: 10 };
        assert_eq!(
            err.to_string(),
            "Part number 12 is outside the valid range 1..=10"
        );
    }
}
