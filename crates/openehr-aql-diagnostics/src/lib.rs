//! AQL compiler diagnostics and error handling
//!
//! This crate provides the error handling infrastructure shared by the AQL to ASL
//! compiler crates: structured error codes and the compile error type.

mod error;
mod error_code;

pub use error::*;
pub use error_code::*;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, AqlError>;
