//! Content hashing module
//!
//! Streaming CRC32 and MD5 over local files and remote objects.

mod content;

pub use content::*;
