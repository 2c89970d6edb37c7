//! Core sync engine module
//!
//! Provides the bounded-concurrency executor, the engine that wires a
//! sync or copy invocation together, and the bucket/object commands.

mod commands;
mod engine;
mod executor;
#[cfg(feature = "native_s3")]
mod shutdown;

pub use commands::*;
pub use engine::*;
pub use executor::*;
#[cfg(feature = "native_s3")]
pub use shutdown::*;
