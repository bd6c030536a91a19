//! Errors raised by cache operations
//!
//! A cache miss is never an error. These variants cover caller mistakes and
//! I/O failures only; see [`crate::cache::MissReason`] for misses.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when working with the recommendation cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache type name is not one of the known namespaces
    #[error("Unknown cache type: '{0}'. Valid cache types: optimization, benchmark")]
    UnknownCacheType(String),

    /// A field passed to `save` is out of range
    #[error("Invalid value for '{field}': {message}")]
    InvalidField { field: &'static str, message: String },

    /// The callable has no stable name (closure or function pointer)
    #[error("Cannot derive a workload name from '{0}'; use WorkloadId::new with an explicit name")]
    AnonymousWorkload(String),

    /// An externally supplied cache key is malformed
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// No platform cache directory could be determined
    #[error("Could not determine a cache directory (no home directory?)")]
    NoCacheDir,

    /// Filesystem operation failed
    #[error("I/O error during {operation} on {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry could not be serialized
    #[error("Failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        CacheError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        CacheError::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
