//! # objsync - Resumable Sync for Object Storage
//!
//! objsync synchronizes trees between a local filesystem and an
//! S3-compatible object store, or between two remote locations.
//!
//! ## Features
//!
//! - **Merge-join comparison**: both sides are listed lazily in key order
//!   and compared in a single pass
//! - **Bounded concurrency**: at most N file operations in flight, with a
//!   separate per-transfer part thread count
//! - **Resumable multipart transfers**: breakpoint records let an
//!   interrupted upload, download or copy resume with the missing parts
//! - **Comparison strategies**: time+size, time+size with CRC32 fallback,
//!   or CRC32 only
//!
//! ## Quick Start
//!
//! ```no_run
//! use objsync::config::{Location, SyncArgs};
//! use objsync::core::{sync, SyncEngine};
//! use objsync::storage::{MemoryStore, ObjectStore};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::with_buckets(&["photos"]));
//! let args = SyncArgs::new(
//!     Location::parse("./photos").unwrap(),
//!     Location::parse("s3://photos/2024").unwrap(),
//! );
//!
//! let engine = SyncEngine::new(args, store);
//! let report = sync(&engine).unwrap();
//! report.print_summary();
//! ```
//!
//! ## Resumable Transfers
//!
//! ```no_run
//! use objsync::sync::{compute_part_layout, BreakpointBook, Fingerprint};
//! use std::sync::Arc;
//!
//! let layout = compute_part_layout(250 * 1024 * 1024, 10 * 1024 * 1024);
//! assert_eq!(layout.parts_num, 25);
//!
//! let book = Arc::new(BreakpointBook::new("/tmp/objsync-breakpoints", 7));
//! let fingerprint = Fingerprint {
//!     size: 250 * 1024 * 1024,
//!     modified_secs: 1_700_000_000,
//!     tail_md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
//! };
//! let state = book.open("record-id", fingerprint, 10 * 1024 * 1024, true);
//! println!("{} parts pending", state.pending_parts().len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod progress;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::{Location, SyncArgs};
pub use core::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use objsync::prelude::*;
    //! ```

    pub use crate::config::{CompareStrategy, Location, RunMode, Settings, SyncArgs};
    pub use crate::core::{OutputOptions, SyncEngine, SyncExecutor, SyncReport};
    pub use crate::error::{Result, SyncError};
    pub use crate::fs::{Entry, EntryFilter, FilterSpec};
    pub use crate::progress::ProgressReporter;
    pub use crate::storage::{MemoryStore, ObjectStore};
    pub use crate::sync::{BreakpointBook, Comparator, ComparePolicy, Operation, SyncDecision};
}
