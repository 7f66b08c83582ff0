//! Engine error types.
//!
//! Errors fall into five groups that decide how the engine reacts:
//!
//! - corruption and I/O failures are fatal and close the engine instance
//! - capacity errors are raised before any page is mutated
//! - lock timeouts are returned to the caller, who may retry
//! - argument and lifecycle errors are local validation failures
//! - cancellation aborts the current transaction

use std::fmt;
use thiserror::Error;

use crate::types::{ColId, PageId};

/// Error codes for categorizing errors.
///
/// These codes are stable and can be used for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation was cancelled.
    Cancelled = 0x0005,
    /// Engine instance is closed.
    EngineClosed = 0x0006,
    /// Invalid configuration.
    InvalidConfig = 0x0007,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data file is in an invalid state.
    InvalidDatafileState = 0x0104,

    // Storage errors (0x0200 - 0x02FF)
    /// Not enough free space in a page.
    PageFull = 0x0200,
    /// Page slot directory exhausted.
    TooManyItems = 0x0201,
    /// Collection limit exceeded.
    CollectionLimit = 0x0202,
    /// Index key exceeds the maximum size.
    IndexKeyTooLong = 0x0205,
    /// Duplicate key in a unique index.
    IndexDuplicateKey = 0x0206,

    // Transaction errors (0x0300 - 0x03FF)
    /// Lock not acquired within the timeout.
    LockTimeout = 0x0303,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Storage",
            0x03 => "Transaction",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for tessera.
#[derive(Debug, Error)]
pub enum TesseraError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// The engine was closed, either explicitly or after a fatal error.
    #[error("engine is closed")]
    EngineClosed,

    // ==========================================================================
    // I/O and Corruption
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The data file contains something the engine did not write.
    #[error("invalid datafile state: {message}")]
    InvalidDatafileState {
        /// Description of the corruption.
        message: String,
    },

    /// Page checksum did not match its content.
    #[error("checksum mismatch at position {position}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Physical page position.
        position: u32,
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed from the content.
        actual: u32,
    },

    // ==========================================================================
    // Capacity Errors
    // ==========================================================================
    /// Not enough free space in a page.
    #[error("page {page_id} is full, cannot insert segment of {requested} bytes ({available} free)")]
    PageFull {
        /// The full page.
        page_id: PageId,
        /// Bytes requested.
        requested: usize,
        /// Bytes available.
        available: usize,
    },

    /// No free slot left in a page.
    #[error("page {page_id} has no free slot")]
    TooManyItems {
        /// The full page.
        page_id: PageId,
    },

    /// Collection id outside the supported range.
    #[error("collection id {col_id} exceeds the limit of {max} collections")]
    CollectionLimit {
        /// Rejected id.
        col_id: u8,
        /// Highest valid id.
        max: u8,
    },

    /// Index key exceeds the maximum encoded size.
    #[error("index key of {size} bytes exceeds maximum {max}")]
    IndexKeyTooLong {
        /// Encoded key size.
        size: usize,
        /// Maximum encoded key size.
        max: usize,
    },

    /// Duplicate key inserted into a unique index.
    #[error("duplicate key {key} in unique index '{index}'")]
    IndexDuplicateKey {
        /// Index name.
        index: String,
        /// Offending key, rendered.
        key: String,
    },

    // ==========================================================================
    // Concurrency
    // ==========================================================================
    /// Lock not acquired within the configured timeout.
    #[error("timed out after {timeout_ms}ms waiting for lock on collections {collections:?}")]
    LockTimeout {
        /// Collections requested.
        collections: Vec<ColId>,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },
}

impl TesseraError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::EngineClosed => ErrorCode::EngineClosed,
            Self::Io { .. } => ErrorCode::Io,
            Self::InvalidDatafileState { .. } | Self::ChecksumMismatch { .. } => {
                ErrorCode::InvalidDatafileState
            }
            Self::PageFull { .. } => ErrorCode::PageFull,
            Self::TooManyItems { .. } => ErrorCode::TooManyItems,
            Self::CollectionLimit { .. } => ErrorCode::CollectionLimit,
            Self::IndexKeyTooLong { .. } => ErrorCode::IndexKeyTooLong,
            Self::IndexDuplicateKey { .. } => ErrorCode::IndexDuplicateKey,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
        }
    }

    /// Returns true if the caller may retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns true if this error indicates on-disk corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidDatafileState { .. } | Self::ChecksumMismatch { .. }
        )
    }

    /// Returns true if the engine must be closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_corruption() || matches!(self, Self::Io { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::InvalidDatafileState {
            message: message.into(),
        }
    }
}
