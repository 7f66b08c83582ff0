//! Error handling for tessera.
//!
//! This module provides a unified error type and result alias used
//! across all tessera components.

mod engine;

pub use engine::{ErrorCode, TesseraError};

/// Result type alias for tessera operations.
pub type TesseraResult<T> = std::result::Result<T, TesseraError>;
