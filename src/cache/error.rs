//! Pool error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the pool engine and its storage drivers.
///
/// Caller errors (`InvalidKey`, `TypeMismatch`, `IdentityConflict`) are never
/// retried. `IoFatal` means the storage root is unusable and every subsequent
/// operation on the pool will fail the same way.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("item built for driver `{found}` cannot be registered in a `{expected}` pool")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error(
        "a different item instance is already registered for `{key}`; re-fetch it from the pool before saving"
    )]
    IdentityConflict { key: String },

    #[error("failed to decode stored record for `{key}`: {reason}")]
    Decode { key: String, reason: String },

    #[error("please create or chmod {} ({reason})", path.display())]
    IoFatal { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason,
        }
    }

    pub fn decode(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn io_fatal(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IoFatal {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by the caller rather than the backend.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. } | Self::TypeMismatch { .. } | Self::IdentityConflict { .. }
        )
    }
}

/// Result type for pool and driver operations.
pub type Result<T> = std::result::Result<T, CacheError>;
