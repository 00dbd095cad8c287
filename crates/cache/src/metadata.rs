//! Metadata registry trait and the in-memory reference implementation.
//!
//! The registry is a transactional key-value store keyed by hash, owned by an
//! external upload subsystem. The cache core consumes it through the
//! `MetadataStore` trait: mutations are staged and become durable at
//! `commit`, and reads observe staged changes, so a janitor pass sees its own
//! deletions while they are still pending.

use async_trait::async_trait;
use depot_core::FileHash;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use time::OffsetDateTime;

/// Metadata store error.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata backend error: {0}")]
    Backend(String),

    #[error("metadata commit failed: {0}")]
    Commit(String),
}

/// Result type alias for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// A registry record, keyed by hash.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub hash: FileHash,
    /// False while the owning upload is still in progress.
    pub uploaded: bool,
    /// When the record was created.
    pub upload_date: OffsetDateTime,
    /// Byte length; 0 means unknown and is backfilled by the janitor.
    pub size: u64,
}

/// Transactional registry of known hashes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All records, including uploads still in progress.
    async fn all_files(&self) -> MetadataResult<Vec<FileRecord>>;

    /// Records whose upload has finished.
    async fn uploaded_files(&self) -> MetadataResult<Vec<FileRecord>>;

    /// Stage a size backfill for `hash`.
    async fn set_file_size(&self, hash: &FileHash, size: u64) -> MetadataResult<()>;

    /// Stage removal of the record for `hash`.
    async fn remove_file(&self, hash: &FileHash) -> MetadataResult<()>;

    /// Stage removal of records whose upload never finished and whose
    /// `upload_date` is before `cutoff`. Returns how many were staged.
    async fn remove_stuck_uploads(&self, cutoff: OffsetDateTime) -> MetadataResult<u64>;

    /// Durably apply staged changes.
    async fn commit(&self) -> MetadataResult<()>;
}

#[derive(Debug, Clone)]
enum PendingOp {
    SetSize(FileHash, u64),
    Remove(FileHash),
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<FileHash, FileRecord>,
    pending: Vec<PendingOp>,
}

impl MemoryState {
    fn with_pending_applied(&self) -> HashMap<FileHash, FileRecord> {
        let mut view = self.records.clone();
        for op in &self.pending {
            match op {
                PendingOp::SetSize(hash, size) => {
                    if let Some(record) = view.get_mut(hash) {
                        record.size = *size;
                    }
                }
                PendingOp::Remove(hash) => {
                    view.remove(hash);
                }
            }
        }
        view
    }
}

/// In-memory `MetadataStore`.
///
/// The reference implementation backing the binary's default wiring and the
/// test suites. Production deployments plug their registry in behind the
/// trait.
#[derive(Default)]
pub struct MemoryMetadataStore {
    state: Mutex<MemoryState>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record directly, bypassing staging.
    ///
    /// This is the upload subsystem's side of the registry; tests use it to
    /// seed state.
    pub fn insert(&self, record: FileRecord) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(record.hash.clone(), record);
    }

    /// Fetch a record as the committed-plus-staged view sees it.
    pub fn get(&self, hash: &FileHash) -> Option<FileRecord> {
        let state = self.state.lock().unwrap();
        state.with_pending_applied().get(hash).cloned()
    }

    /// Number of staged, uncommitted operations.
    pub fn pending_ops(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn all_files(&self) -> MetadataResult<Vec<FileRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.with_pending_applied().into_values().collect())
    }

    async fn uploaded_files(&self) -> MetadataResult<Vec<FileRecord>> {
        let mut records = self.all_files().await?;
        records.retain(|r| r.uploaded);
        Ok(records)
    }

    async fn set_file_size(&self, hash: &FileHash, size: u64) -> MetadataResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.push(PendingOp::SetSize(hash.clone(), size));
        Ok(())
    }

    async fn remove_file(&self, hash: &FileHash) -> MetadataResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.push(PendingOp::Remove(hash.clone()));
        Ok(())
    }

    async fn remove_stuck_uploads(&self, cutoff: OffsetDateTime) -> MetadataResult<u64> {
        let mut state = self.state.lock().unwrap();
        let stuck: Vec<FileHash> = state
            .with_pending_applied()
            .into_values()
            .filter(|r| !r.uploaded && r.upload_date < cutoff)
            .map(|r| r.hash)
            .collect();
        let count = stuck.len() as u64;
        state
            .pending
            .extend(stuck.into_iter().map(PendingOp::Remove));
        Ok(count)
    }

    async fn commit(&self) -> MetadataResult<()> {
        let mut state = self.state.lock().unwrap();
        let applied = state.with_pending_applied();
        state.records = applied;
        state.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn record(hash: &str, uploaded: bool, size: u64) -> FileRecord {
        FileRecord {
            hash: FileHash::new(hash).unwrap(),
            uploaded,
            upload_date: OffsetDateTime::now_utc(),
            size,
        }
    }

    #[tokio::test]
    async fn staged_removal_is_visible_before_commit() {
        let store = MemoryMetadataStore::new();
        store.insert(record("aa01", true, 10));
        store.insert(record("bb02", true, 20));

        let hash = FileHash::new("aa01").unwrap();
        store.remove_file(&hash).await.unwrap();

        let uploaded = store.uploaded_files().await.unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].hash.as_str(), "BB02");
        assert_eq!(store.pending_ops(), 1);

        store.commit().await.unwrap();
        assert_eq!(store.pending_ops(), 0);
        assert!(store.get(&hash).is_none());
    }

    #[tokio::test]
    async fn size_backfill_applies_on_commit() {
        let store = MemoryMetadataStore::new();
        store.insert(record("cc03", true, 0));

        let hash = FileHash::new("cc03").unwrap();
        store.set_file_size(&hash, 4096).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.get(&hash).unwrap().size, 4096);
    }

    #[tokio::test]
    async fn stuck_uploads_respect_cutoff() {
        let store = MemoryMetadataStore::new();
        let now = OffsetDateTime::now_utc();
        let mut old = record("dd04", false, 0);
        old.upload_date = now - Duration::minutes(30);
        store.insert(old);
        let mut fresh = record("ee05", false, 0);
        fresh.upload_date = now - Duration::minutes(5);
        store.insert(fresh);

        let removed = store
            .remove_stuck_uploads(now - Duration::minutes(20))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        store.commit().await.unwrap();
        assert!(store.get(&FileHash::new("dd04").unwrap()).is_none());
        assert!(store.get(&FileHash::new("ee05").unwrap()).is_some());
    }
}
