use std::io;
use std::sync::Arc;

use crate::job::JobError;

/// Errors surfaced by the file-cache core.
///
/// None of these are meant to reach an end user as a filesystem error: the
/// calling layer is expected to treat every variant except [`CacheError::Io`]
/// as "not cached" and degrade to a direct read against the object store.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CacheError {
    #[error("object excluded from cache by configured regex")]
    ExcludedByRegex,

    #[error("random read below the cache-for-range-read threshold")]
    NotRequiredForRandomRead,

    #[error("entry present in the index but missing on disk")]
    NotPresentInCache,

    #[error("cached file info is stale or was evicted")]
    InvalidFileInfoCache,

    #[error("attempted to insert a nil cache entry")]
    InvalidEntry,

    #[error("entry of size {size} exceeds the cache budget of {max_bytes}")]
    InvalidEntrySize { size: u64, max_bytes: u64 },

    #[error("object generation changed mid-download")]
    GenerationChanged,

    #[error("wait for download progress was cancelled")]
    Cancelled,

    #[error("empty bucket or object name")]
    InvalidKey,

    #[error("local cache I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("object store error: {0}")]
    Store(Arc<anyhow::Error>),
}

impl From<io::Error> for CacheError {
    fn from(source: io::Error) -> Self {
        CacheError::Io(Arc::new(source))
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(source: anyhow::Error) -> Self {
        CacheError::Store(Arc::new(source))
    }
}

impl From<JobError> for CacheError {
    fn from(source: JobError) -> Self {
        match source {
            JobError::GenerationChanged => CacheError::GenerationChanged,
            JobError::Cancelled => CacheError::Cancelled,
            JobError::Io(msg) => CacheError::Io(Arc::new(io::Error::other(msg.to_string()))),
        }
    }
}

impl CacheError {
    /// True for the dispositions that mean "not cached, go read the object
    /// store directly" rather than an actual cache defect.
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            CacheError::ExcludedByRegex
                | CacheError::NotRequiredForRandomRead
                | CacheError::NotPresentInCache
                | CacheError::InvalidFileInfoCache
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
