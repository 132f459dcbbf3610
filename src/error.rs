//! # Error Handling for litedit
//!
//! This module defines the error type used throughout the crate. A single
//! enum ([`Error`]) covers every failure mode, from a rejected row id to a
//! worker that stopped answering.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! `#[error(...)]` gives the `Display` text, `#[from]` gives the `From`
//! conversions that make `?` work across crate boundaries.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Validation | Invalid row id, disallowed pragma | Show at the point of the edit |
//! | Execution | SQLite rejected a statement | Show at the point of the edit |
//! | Transport | Timeout, unknown method, malformed envelope | Show "operation timed out" / retry |
//! | Persistence | Backup decode failure, file I/O | Log and investigate |
//! | Controller | Recovery mode after failed undo | Revert the document |
//!
//! ## Crossing the Worker Boundary
//!
//! Errors never cross the RPC boundary as live values. The handler side turns
//! them into text (`to_string()`), the proxy side wraps that text in
//! [`Error::Remote`]. Because execution errors always render with the stable
//! `Query failed: ` prefix, callers can still pattern-match on the text.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in litedit operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors (rejected before any SQL is issued)
    // =========================================================================

    /// The engine has not been opened yet, or has already been shut down.
    #[error("database not initialized")]
    NotInitialized,

    /// A row id did not validate to a finite integer.
    ///
    /// Row ids are accepted as numbers or strings at the boundary. Anything
    /// that does not parse to an integer is rejected; it is never coerced to 0.
    #[error("invalid row id: {0}")]
    InvalidRowId(String),

    /// Structurally invalid input (empty column list, legacy column definition,
    /// unsafe column type, bad argument shape).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The pragma name is not on the allow-list.
    ///
    /// Pragma names cannot be bound as parameters, so the allow-list is the
    /// only thing standing between the caller and arbitrary SQL.
    #[error("pragma '{0}' is not allowed")]
    PragmaNotAllowed(String),

    /// The pragma value has a type we refuse to interpolate.
    #[error("unsupported pragma value: {0}")]
    UnsupportedPragmaValue(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================

    /// SQLite rejected a statement.
    ///
    /// # Rust Pattern: Manual From
    ///
    /// `rusqlite::Error` converts into this variant (see the `From` impl
    /// below) so every `?` on an engine statement produces the same stable
    /// `Query failed: ` prefix, independent of SQLite's own message format.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================

    /// No result envelope arrived for a call before the deadline.
    #[error("operation timed out ({method} after {after_ms}ms)")]
    Timeout {
        /// The remote method that was invoked
        method: String,
        /// The configured timeout in milliseconds
        after_ms: u64,
    },

    /// The method name is not exposed by the remote side (or by the local proxy).
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// An envelope failed shape validation.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The remote side reported an error; the text is carried verbatim.
    #[error("{0}")]
    Remote(String),

    /// The message channel to the worker is gone.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================

    /// File system error while loading or saving an image.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A hot-exit backup could not be decoded.
    #[error("backup error: {0}")]
    Backup(String),

    // =========================================================================
    // Controller Errors
    // =========================================================================

    /// A previous undo/redo failed; the document refuses further edits.
    #[error("document is in recovery mode: {0}")]
    RecoveryMode(String),

    /// An abort signal stopped a multi-step operation between statements.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::QueryFailed(err.to_string())
    }
}

impl Error {
    /// Returns true for errors raised before any SQL ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::NotInitialized
                | Error::InvalidRowId(_)
                | Error::Validation(_)
                | Error::PragmaNotAllowed(_)
                | Error::UnsupportedPragmaValue(_)
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
