//! Progress reporting module
//!
//! Running counters and a status spinner for sync and copy runs.

mod reporter;

pub use reporter::*;
