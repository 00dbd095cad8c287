//! Two-tier content-addressed file cache for Depot.
//!
//! This crate provides:
//! - `CachedFileProvider`: the serving facade (hot hit, cold promote,
//!   coalesced peer fetch)
//! - `FetchCoordinator`: per-hash singleflight over peer fetches
//! - `PeerFetcher`: authenticated streaming pull from an upstream peer
//! - `Janitor`: retention, size-cap, and orphan reconciliation between the
//!   tiers and the metadata registry
//!
//! Files live under `<root>/<HASH[0:2]>/<HASH>` and only ever appear at their
//! final name through an atomic rename from a `.dl` staging sibling, so
//! readers never observe a partial file.

pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod janitor;
pub mod layout;
pub mod metadata;
pub mod metrics;
pub mod provider;
pub mod traits;

pub use coordinator::{FetchCoordinator, TransferHandle, TransferOutcome, TransferStatus};
pub use error::{CacheError, CacheResult};
pub use fetch::{DISTRIBUTION_ROUTE, FetchError, PeerFetcher};
pub use janitor::Janitor;
pub use metadata::{FileRecord, MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore};
pub use provider::{CachedFileProvider, ServedFile};
pub use traits::{
    EnvTokenProvider, FileTokenProvider, NullTouchSink, StaticTokenProvider, TokenProvider,
    TouchSink,
};
