//! Entries, filters and local tree listing
//!
//! Provides the entry snapshot type shared by all listers, the listing
//! contract the comparator consumes, and the local directory walker.

mod entry;
mod filter;
mod listing;
mod walker;

pub use entry::*;
pub use filter::*;
pub use listing::*;
pub use walker::*;
