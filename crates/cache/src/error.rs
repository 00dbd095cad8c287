//! Error types for the cache crate.

use thiserror::Error;

/// Cache operation error.
///
/// None of these are fatal to the serving path: the provider degrades to a
/// miss and the janitor logs, aborts the iteration, and retries on the next
/// boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to promote {0} to the hot tier")]
    Promotion(depot_core::FileHash),

    #[error(transparent)]
    Fetch(#[from] crate::fetch::FetchError),

    #[error(transparent)]
    Metadata(#[from] crate::metadata::MetadataError),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
