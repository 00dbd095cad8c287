//! The serving facade.
//!
//! Resolves a hash to a readable stream: hot hit, else synchronous promotion
//! from cold, else a coalesced peer fetch. Failure is never fatal; every
//! degraded path ends in a miss, not an error.

use crate::coordinator::{FetchCoordinator, TransferHandle, TransferOutcome};
use crate::error::CacheResult;
use crate::fetch::PeerFetcher;
use crate::layout;
use crate::metrics::{self, GaugeGuard, Tier};
use crate::traits::TouchSink;
use depot_core::{CacheConfig, FileHash};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Hard deadline for a caller waiting on an in-flight transfer. The transfer
/// itself is not cancelled on expiry.
pub const DOWNLOAD_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// An open, readable hot-tier file.
///
/// The caller owns the handle; the cache keeps no reference to served
/// streams.
pub struct ServedFile {
    hash: FileHash,
    file: fs::File,
    len: u64,
}

impl ServedFile {
    pub fn hash(&self) -> &FileHash {
        &self.hash
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying file handle.
    pub fn into_inner(self) -> fs::File {
        self.file
    }

    /// Convert into a chunked byte stream for an HTTP response body.
    pub fn into_stream(self) -> ReaderStream<fs::File> {
        ReaderStream::new(self.file)
    }
}

#[derive(Clone)]
struct Inner {
    hot_root: PathBuf,
    cold_root: Option<PathBuf>,
    fetcher: Option<Arc<PeerFetcher>>,
    coordinator: Arc<FetchCoordinator>,
    touch: Arc<dyn TouchSink>,
    wait_timeout: Duration,
}

/// Content-addressed file provider over the hot and cold tiers.
///
/// Cheap to clone; all operations are safe to call from many concurrent
/// request handlers.
#[derive(Clone)]
pub struct CachedFileProvider {
    inner: Arc<Inner>,
}

impl CachedFileProvider {
    pub fn new(
        config: &CacheConfig,
        fetcher: Option<Arc<PeerFetcher>>,
        coordinator: Arc<FetchCoordinator>,
        touch: Arc<dyn TouchSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                hot_root: config.cache_directory.clone(),
                cold_root: config.cold_root().cloned(),
                fetcher,
                coordinator,
                touch,
                wait_timeout: DOWNLOAD_WAIT_TIMEOUT,
            }),
        }
    }

    /// Override the transfer wait deadline. Tests use this to avoid the
    /// 120 s default; call before the provider is shared.
    pub fn with_wait_timeout(self, wait_timeout: Duration) -> Self {
        let mut inner = (*self.inner).clone();
        inner.wait_timeout = wait_timeout;
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.inner.coordinator
    }

    /// Best effort: make sure the file will (eventually) be available in the
    /// hot tier.
    ///
    /// Returns the transfer handle when a peer fetch was started or joined,
    /// `None` when the file is already local (or this node is authoritative
    /// and the hash is simply absent).
    pub async fn ensure_local(&self, hash: &FileHash) -> Option<Arc<TransferHandle>> {
        let hot_path = layout::path_for(&self.inner.hot_root, hash);
        if has_content(&hot_path).await {
            return None;
        }
        if self.inner.promote_from_cold(hash, &hot_path).await {
            return None;
        }
        let fetcher = self.inner.fetcher.clone()?;

        let inner = self.inner.clone();
        let task_hash = hash.clone();
        Some(self.inner.coordinator.start_or_join(hash, async move {
            inner.download_from_peer(fetcher, task_hash).await
        }))
    }

    /// Open the hot-tier file for `hash`, refreshing its access time and
    /// notifying the touch sink. `None` when absent.
    pub async fn open_local(&self, hash: &FileHash) -> Option<ServedFile> {
        let path = layout::path_for(&self.inner.hot_root, hash);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(hash = %hash, error = %e, "failed to open hot tier file");
                return None;
            }
        };
        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(hash = %hash, error = %e, "failed to stat hot tier file");
                return None;
            }
        };

        // Recency bookkeeping only; serving proceeds regardless.
        if let Err(e) = layout::touch_accessed(&path).await {
            debug!(hash = %hash, error = %e, "failed to refresh access time");
        }
        self.inner.touch.record_touch(hash);
        debug!(hash = %hash, size = len, "serving file from hot tier");

        Some(ServedFile {
            hash: hash.clone(),
            file,
            len,
        })
    }

    /// Resolve `hash` to a readable file, fetching through the peer when
    /// needed. Misses, transfer failures, and waiter timeouts all surface as
    /// `None`.
    pub async fn get_or_fetch(&self, hash: &FileHash) -> Option<ServedFile> {
        if let Some(handle) = self.ensure_local(hash).await {
            let _waiting = GaugeGuard::acquire(&metrics::DOWNLOAD_WAITERS);
            match handle.wait(self.inner.wait_timeout).await {
                TransferOutcome::Succeeded => {}
                TransferOutcome::Failed => return None,
                TransferOutcome::TimedOut => {
                    warn!(
                        hash = %hash,
                        "timed out waiting for transfer; fetch continues in background"
                    );
                    return None;
                }
            }
        }
        self.open_local(hash).await
    }

    /// True iff any of the given hashes is currently being fetched.
    pub fn any_downloading(&self, hashes: &[FileHash]) -> bool {
        self.inner.coordinator.contains(hashes)
    }
}

impl Inner {
    /// Copy the cold copy of `hash` to the hot tier via `.dl` staging and an
    /// atomic rename, then reset its timestamps so promotion starts a fresh
    /// retention window. Best effort: errors are logged and reported as a
    /// plain miss.
    async fn promote_from_cold(&self, hash: &FileHash, hot_dest: &Path) -> bool {
        let Some(cold_root) = &self.cold_root else {
            return false;
        };
        let source = layout::path_for(cold_root, hash);
        match promote(&source, hot_dest).await {
            Ok(promoted) => {
                if promoted {
                    debug!(hash = %hash, "promoted file from cold storage");
                }
                promoted
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "promotion from cold storage failed");
                false
            }
        }
    }

    /// The singleflight work body: stream the peer's copy into the fetch
    /// tier (cold when enabled, hot otherwise) and make it servable.
    async fn download_from_peer(&self, fetcher: Arc<PeerFetcher>, hash: FileHash) -> CacheResult<()> {
        let _downloading = GaugeGuard::acquire(&metrics::FILES_DOWNLOADING);

        let (dest_root, tier) = match &self.cold_root {
            Some(cold) => (cold.as_path(), Tier::Cold),
            None => (self.hot_root.as_path(), Tier::Hot),
        };
        let dest = layout::path_for(dest_root, &hash);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // A failed fetch may leave the staging file behind; the janitor
        // collects it as an orphan.
        let staging = layout::staging_path(&dest);
        let mut file = fs::File::create(&staging).await?;
        let written = fetcher.fetch(&hash, &mut file).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&staging, &dest).await?;

        tier.files_gauge().inc();
        tier.size_gauge().add(written as i64);
        info!(hash = %hash, bytes = written, tier = ?tier, "materialized file from peer");

        if self.cold_root.is_some() {
            // Fetches land in cold; promote at once so the requests that
            // triggered this transfer can be served from hot. A failed
            // promotion fails the transfer: the cold copy is in place and a
            // later request re-promotes, but the waiters must not be
            // released into a hot-tier miss.
            let hot_dest = layout::path_for(&self.hot_root, &hash);
            if !self.promote_from_cold(&hash, &hot_dest).await {
                warn!(hash = %hash, "fetched file landed in cold storage but promotion failed");
                return Err(crate::CacheError::Promotion(hash));
            }
        }
        Ok(())
    }
}

async fn has_content(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.len() > 0)
}

async fn promote(source: &Path, hot_dest: &Path) -> std::io::Result<bool> {
    if !fs::try_exists(source).await? {
        return Ok(false);
    }
    if let Some(parent) = hot_dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let staging = layout::staging_path(hot_dest);
    fs::copy(source, &staging).await?;
    // Overwrites any stale hot copy in a single step.
    fs::rename(&staging, hot_dest).await?;
    layout::set_times_to_now(hot_dest).await?;
    Ok(true)
}
