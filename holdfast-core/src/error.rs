//! Error types for the Holdfast storage core.
//!
//! Callers are expected to pattern-match on [`Error`]: the variants keep
//! domain errors (out of range), content errors (end of data, corruption)
//! and lifecycle errors (closed, read-only) apart, so recovery policy can
//! live at the call site instead of inside the storage layer.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An index or byte offset falls outside the addressable range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A read, or a non-expanding write, reached past the end of content.
    #[error("end of data")]
    EndOfData,

    /// The resource has been closed — explicitly, or by a simulated
    /// failure — and every further operation fails.
    #[error("closed")]
    Closed,

    /// A mutating operation was attempted on a read-only resource.
    #[error("read-only")]
    ReadOnly,

    /// Persisted bytes do not form a valid structure.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// An underlying I/O failure, real or injected.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
