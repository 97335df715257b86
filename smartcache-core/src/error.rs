//! Error types for SmartCache.
//!
//! This module provides a single error hierarchy using `thiserror`.
//! Backend crates map their client errors into it, and memoized function
//! failures travel through it as boxed sources.

use thiserror::Error;

/// Result type alias using `SmartCacheError`.
pub type Result<T> = std::result::Result<T, SmartCacheError>;

/// Main error type for all SmartCache operations.
#[derive(Debug, Error)]
pub enum SmartCacheError {
    // ═══════════════════════════════════════════════════════════════════════════
    // BACKEND ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Backend could not be reached.
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected or failed an operation.
    #[error("{backend} backend error: {reason}")]
    BackendError {
        /// Backend name
        backend: &'static str,
        /// Failure description
        reason: String,
    },

    /// Connection or command timeout.
    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// Backend replied with something the client does not understand.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // KEY ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Key contains forbidden characters or is empty.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Key exceeds the backend limit.
    #[error("Cache key too long: max {max} bytes, got {actual}")]
    KeyTooLong {
        /// Maximum allowed length
        max: usize,
        /// Actual length
        actual: usize,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Stored entry was written with another envelope version.
    #[error("Entry format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Supported version
        expected: u8,
        /// Version found in the entry
        actual: u8,
    },

    /// Stored bytes are not a valid entry.
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend name not recognised.
    #[error("Unknown cache backend: {0}")]
    UnknownBackend(String),

    /// Backend URL could not be parsed.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPUTATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The memoized function itself failed. Its result is never cached.
    #[error("Memoized function '{function}' failed: {source}")]
    ComputationFailed {
        /// Qualified function name
        function: String,
        /// Error returned by the function
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// I/O error (settings file, sockets).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SmartCacheError {
    /// Creates a backend error for the named backend.
    pub fn backend(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        SmartCacheError::BackendError {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error is recoverable (can retry).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SmartCacheError::BackendUnavailable(_)
                | SmartCacheError::BackendError { .. }
                | SmartCacheError::ConnectionTimeout(_)
                | SmartCacheError::IoError(_)
        )
    }

    /// Returns true if the error originated in the storage backend.
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            SmartCacheError::BackendUnavailable(_)
                | SmartCacheError::BackendError { .. }
                | SmartCacheError::ConnectionTimeout(_)
                | SmartCacheError::ProtocolError(_)
                | SmartCacheError::IoError(_)
        )
    }

    /// Returns true if this is a key validation error.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            SmartCacheError::InvalidKey(_) | SmartCacheError::KeyTooLong { .. }
        )
    }
}
