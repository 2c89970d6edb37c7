//! Sync comparison and resumable transfers
//!
//! Provides:
//! - Trees for the local and remote side of a run
//! - Comparison policies and the merge-join comparator
//! - Breakpoint records for resumable multipart transfers
//! - The transfer routines the executor dispatches to

mod breakpoint;
mod compare;
mod multipart;
mod strategy;
mod transfer;
mod tree;

pub use breakpoint::*;
pub use compare::*;
pub use multipart::*;
pub use strategy::*;
pub use transfer::*;
pub use tree::*;
