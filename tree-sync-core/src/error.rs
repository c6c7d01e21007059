//! Error types for the sync engine.
//!
//! [`RemoteError`] is what a [`crate::contract::RemoteStore`] returns; the
//! reconciler wraps it into a node-level [`SyncError`] which ends up in the
//! run report. Nothing in here aborts a whole run.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the remote document store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The referenced remote entity does not exist (or is not shared with us).
    #[error("remote entity not found: {0}")]
    NotFound(String),

    /// The entity or one of its ancestors is archived and cannot be written.
    #[error("archived ancestor: {0}")]
    ArchivedAncestor(String),

    /// The remote asked us to slow down.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx, conflicts and network blips.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The payload was rejected as malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The retry policy gave up on a retryable failure.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<RemoteError>,
    },

    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, RemoteError::ArchivedAncestor(_))
    }

    /// Returns the retry-after hint if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Node-level failure recorded in the sync report.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote dataset's columns differ from the local declaration.
    #[error("schema mismatch for dataset '{dataset}': missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch {
        dataset: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Two siblings share a display name.
    #[error("duplicate sibling name '{0}'")]
    DuplicateName(String),

    #[error("invalid content: {0}")]
    Validation(String),

    /// Creating a child failed because its parent no longer exists remotely.
    #[error("parent of '{0}' no longer exists remotely")]
    ParentNotFound(String),

    /// The node was not attempted because its parent failed.
    #[error("parent '{0}' failed to sync")]
    ParentFailed(String),
}

impl SyncError {
    /// True when the failure was caused by an archived remote ancestor.
    pub fn is_archived(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_archived())
    }
}

/// Failures persisting the cache file.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to persist cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}
