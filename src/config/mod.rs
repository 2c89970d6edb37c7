//! Configuration module for objsync
//!
//! Provides CLI arguments, the settings file, location parsing and the
//! validated per-invocation `SyncArgs`.

mod location;
mod settings;
mod sync_args;

pub use location::*;
pub use settings::*;
pub use sync_args::*;
