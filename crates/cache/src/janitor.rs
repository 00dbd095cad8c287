//! Periodic reconciliation between the tiers and the metadata registry.
//!
//! Each iteration walks a tier, deletes files past retention, collects
//! orphans, evicts by last access until the tier fits its size cap, prunes
//! stuck upload records, and commits the staged metadata changes in one
//! transaction. Ordering matters: retention runs before the size cap so
//! expired files are never counted against the budget, and orphan collection
//! runs over the post-retention set.
//!
//! The janitor shares nothing with the serving path except the filesystem,
//! the registry, and the active-transfer map; a hash with a transfer in
//! flight is never deleted.

use crate::coordinator::FetchCoordinator;
use crate::error::CacheResult;
use crate::layout;
use crate::metadata::MetadataStore;
use crate::metrics::Tier;
use depot_core::{CacheConfig, Clock, FileHash};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upload records younger than this are left alone even if unfinished.
const STUCK_UPLOAD_AGE_MINUTES: i64 = 20;

/// Size backfills are committed in batches of this many staged writes.
const SIZE_BACKFILL_BATCH: usize = 1000;

/// A physical file observed during a tier walk.
#[derive(Debug, Clone)]
struct TierFile {
    path: PathBuf,
    /// The file's hash, when its (uppercased) name is one. Staging files and
    /// foreign names carry `None` and fall to the orphan pass.
    hash: Option<FileHash>,
    /// Hash parsed from the name's stem; guards `.dl` staging files whose
    /// transfer is still in flight.
    transfer_key: Option<FileHash>,
    len: u64,
    last_access: OffsetDateTime,
    last_write: OffsetDateTime,
}

/// Background maintenance task for the cache tiers.
pub struct Janitor {
    config: CacheConfig,
    metadata: Arc<dyn MetadataStore>,
    coordinator: Arc<FetchCoordinator>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Janitor {
    pub fn new(
        config: CacheConfig,
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<FetchCoordinator>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            metadata,
            coordinator,
            clock,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. Iteration errors are logged; the
    /// loop sleeps to the next boundary and retries.
    pub async fn run(&self) {
        info!(
            cadence_minutes = self.config.cleanup_check_in_minutes,
            cold_storage = self.config.cold_root().is_some(),
            "janitor started"
        );
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "cleanup iteration failed");
            }
            let delay = next_run_delay(self.clock.now(), self.config.cleanup_check_in_minutes);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("janitor stopped");
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// One full maintenance iteration: cold pass (when enabled), hot pass,
    /// stuck uploads, transactional commit.
    pub async fn run_once(&self) -> CacheResult<()> {
        let now = self.clock.now();
        debug!("starting cleanup iteration");

        let cold_enabled = self.config.cold_root().is_some();
        if let Some(cold_root) = self.config.cold_root() {
            let files = enumerate_tier(cold_root).await?;
            let remaining = self
                .clean_up_outdated_files(
                    files,
                    Tier::Cold,
                    self.config.cold_retention(),
                    None,
                    true,
                    now,
                )
                .await?;
            let remaining = self
                .clean_up_files_beyond_size_limit(
                    remaining,
                    self.config.cold_size_limit_bytes(),
                    true,
                )
                .await?;
            set_tier_gauges(Tier::Cold, &remaining);
        }

        let files = enumerate_tier(&self.config.cache_directory).await?;
        let remaining = self
            .clean_up_outdated_files(
                files,
                Tier::Hot,
                self.config.hot_retention(),
                self.config.hot_forced_deletion(),
                !cold_enabled,
                now,
            )
            .await?;
        let remaining = self
            .clean_up_files_beyond_size_limit(
                remaining,
                self.config.hot_size_limit_bytes(),
                !cold_enabled,
            )
            .await?;
        set_tier_gauges(Tier::Hot, &remaining);

        self.clean_up_stuck_uploads(now).await?;
        self.metadata.commit().await?;
        Ok(())
    }

    /// Walk every uploaded record, delete expired or vanished files, and
    /// backfill unknown sizes. Returns the tier's surviving physical files
    /// after a pass of orphan collection.
    async fn clean_up_outdated_files(
        &self,
        files: Vec<TierFile>,
        tier: Tier,
        retention: Duration,
        forced_deletion: Option<Duration>,
        delete_from_metadata: bool,
        now: OffsetDateTime,
    ) -> CacheResult<Vec<TierFile>> {
        let records = self.metadata.uploaded_files().await?;
        let by_hash: HashMap<FileHash, TierFile> = files
            .iter()
            .filter_map(|f| f.hash.clone().map(|h| (h, f.clone())))
            .collect();

        let prune_before = now - retention;
        let force_before = forced_deletion.map(|window| now - window);

        let mut removed: HashSet<FileHash> = HashSet::new();
        let mut staged_backfills = 0usize;

        for record in records {
            if self.shutdown.is_cancelled() {
                break;
            }
            let file = by_hash.get(&record.hash);
            let delete = match file {
                None => true,
                Some(f) => {
                    f.last_access < prune_before
                        || force_before.is_some_and(|cutoff| f.last_write < cutoff)
                }
            };

            if delete {
                if self.coordinator.contains(std::slice::from_ref(&record.hash)) {
                    continue;
                }
                if let Some(f) = file {
                    if let Err(e) = fs::remove_file(&f.path).await {
                        warn!(hash = %record.hash, error = %e, "failed to delete expired file");
                        continue;
                    }
                    debug!(hash = %record.hash, tier = ?tier, "deleted expired file");
                }
                removed.insert(record.hash.clone());
                if delete_from_metadata {
                    self.metadata.remove_file(&record.hash).await?;
                }
            } else if record.size == 0
                && let Some(f) = file
            {
                self.metadata.set_file_size(&record.hash, f.len).await?;
                staged_backfills += 1;
                if staged_backfills % SIZE_BACKFILL_BATCH == 0 {
                    self.metadata.commit().await?;
                }
            }
        }

        let survivors: Vec<TierFile> = files
            .into_iter()
            .filter(|f| f.hash.as_ref().is_none_or(|h| !removed.contains(h)))
            .collect();
        self.clean_up_orphaned_files(survivors, tier).await
    }

    /// Delete surviving physical files that no metadata record references.
    async fn clean_up_orphaned_files(
        &self,
        files: Vec<TierFile>,
        tier: Tier,
    ) -> CacheResult<Vec<TierFile>> {
        let known: HashSet<FileHash> = self
            .metadata
            .all_files()
            .await?
            .into_iter()
            .map(|r| r.hash)
            .collect();

        let mut remaining = Vec::with_capacity(files.len());
        for file in files {
            if self.shutdown.is_cancelled() {
                remaining.push(file);
                continue;
            }
            if file.hash.as_ref().is_some_and(|h| known.contains(h)) {
                remaining.push(file);
                continue;
            }
            if file
                .transfer_key
                .as_ref()
                .is_some_and(|h| self.coordinator.contains(std::slice::from_ref(h)))
            {
                remaining.push(file);
                continue;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    tier.files_gauge().dec();
                    tier.size_gauge().sub(file.len as i64);
                    info!(path = %file.path.display(), tier = ?tier, "removed orphaned file");
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to delete orphaned file");
                    remaining.push(file);
                }
            }
        }
        Ok(remaining)
    }

    /// Evict by ascending last access until the tier fits `limit`.
    ///
    /// With no cap configured the pass reports an empty set; the caller then
    /// feeds that set to the tier gauges, which therefore read zero between
    /// capped runs.
    async fn clean_up_files_beyond_size_limit(
        &self,
        mut files: Vec<TierFile>,
        limit: Option<u64>,
        delete_from_metadata: bool,
    ) -> CacheResult<Vec<TierFile>> {
        let Some(limit) = limit else {
            return Ok(Vec::new());
        };

        files.sort_by_key(|f| f.last_access);
        let mut total: u64 = files.iter().map(|f| f.len).sum();
        let mut survivors = Vec::with_capacity(files.len());

        for file in files {
            if total <= limit || self.shutdown.is_cancelled() {
                survivors.push(file);
                continue;
            }
            if file
                .transfer_key
                .as_ref()
                .is_some_and(|h| self.coordinator.contains(std::slice::from_ref(h)))
            {
                survivors.push(file);
                continue;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    total -= file.len;
                    debug!(path = %file.path.display(), size = file.len, "evicted file over size limit");
                    if delete_from_metadata
                        && let Some(hash) = &file.hash
                    {
                        self.metadata.remove_file(hash).await?;
                    }
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to evict file");
                    survivors.push(file);
                }
            }
        }
        Ok(survivors)
    }

    /// Drop registry records whose upload never finished and has gone stale;
    /// their temp artifacts fall out later as orphans.
    async fn clean_up_stuck_uploads(&self, now: OffsetDateTime) -> CacheResult<()> {
        let cutoff = now - Duration::minutes(STUCK_UPLOAD_AGE_MINUTES);
        let removed = self.metadata.remove_stuck_uploads(cutoff).await?;
        if removed > 0 {
            info!(count = removed, "removed stuck upload records");
        }
        Ok(())
    }
}

fn set_tier_gauges(tier: Tier, remaining: &[TierFile]) {
    tier.files_gauge().set(remaining.len() as i64);
    tier.size_gauge()
        .set(remaining.iter().map(|f| f.len as i64).sum());
}

/// Recursively collect the physical files of a tier. A missing root is an
/// empty tier. Symlinks are ignored.
async fn enumerate_tier(root: &Path) -> CacheResult<Vec<TierFile>> {
    let mut results = Vec::new();
    if !fs::try_exists(root).await? {
        return Ok(results);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                let name = entry.file_name().to_string_lossy().to_ascii_uppercase();
                let info = layout::info_at(&entry.path()).await?;
                let stem = name.split('.').next().unwrap_or("");
                results.push(TierFile {
                    path: entry.path(),
                    hash: FileHash::new(&name).ok(),
                    transfer_key: FileHash::new(stem).ok(),
                    len: info.len,
                    last_access: info.accessed.into(),
                    last_write: info.modified.into(),
                });
            }
        }
    }
    Ok(results)
}

/// Delay to the next run: round the current time down to the previous
/// multiple of `every_minutes` within the hour, then add `every_minutes`.
/// Aligning to minute boundaries keeps run timestamps predictable across
/// restarts.
fn next_run_delay(now: OffsetDateTime, every_minutes: i64) -> std::time::Duration {
    let cadence = every_minutes.clamp(1, 60);
    let into_window = now.minute() as i64 % cadence;
    let window_start = now
        .replace_second(0)
        .expect("0 is a valid second")
        .replace_nanosecond(0)
        .expect("0 is a valid nanosecond")
        - Duration::minutes(into_window);
    let next = window_start + Duration::minutes(cadence);
    (next - now)
        .try_into()
        .unwrap_or(std::time::Duration::from_secs(60))
}
