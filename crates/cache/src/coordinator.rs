//! Per-hash singleflight over peer fetches.
//!
//! A thundering herd on a freshly requested hash must produce one upstream
//! fetch, one disk write, and N readers of the resulting file. The
//! coordinator keeps a map of in-flight transfers; `start_or_join` is
//! serialized by a mutex held only across the check-and-insert, never across
//! the fetch itself.

use crate::error::CacheResult;
use depot_core::FileHash;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Observable state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Succeeded,
    Failed,
}

/// What a bounded wait on a handle resolved to.
///
/// `TimedOut` only means the waiter gave up; the underlying fetch keeps
/// running for the benefit of later callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Shared handle to one in-flight transfer.
///
/// All waiters for a hash hold clones of the same handle. The handle turns
/// terminal exactly once, in the same critical section that removes it from
/// the active map: a late joiner either sees the active handle or a completed
/// absence and can re-check the filesystem.
pub struct TransferHandle {
    hash: FileHash,
    status: watch::Receiver<TransferStatus>,
}

impl TransferHandle {
    pub fn hash(&self) -> &FileHash {
        &self.hash
    }

    pub fn status(&self) -> TransferStatus {
        *self.status.borrow()
    }

    /// Wait until the transfer turns terminal, up to `limit`.
    pub async fn wait(&self, limit: Duration) -> TransferOutcome {
        let mut status = self.status.clone();
        let wait = status.wait_for(|s| *s != TransferStatus::Pending);
        match tokio::time::timeout(limit, wait).await {
            Ok(Ok(s)) => match *s {
                TransferStatus::Succeeded => TransferOutcome::Succeeded,
                _ => TransferOutcome::Failed,
            },
            // The worker task died without reporting a terminal status.
            Ok(Err(_)) => TransferOutcome::Failed,
            Err(_) => TransferOutcome::TimedOut,
        }
    }
}

/// Keyed singleflight map of active transfers.
#[derive(Default)]
pub struct FetchCoordinator {
    active: Mutex<HashMap<FileHash, Arc<TransferHandle>>>,
}

impl FetchCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the in-flight transfer for `hash`, or install a new one running
    /// `work`.
    ///
    /// `work` is executed exactly once per installed handle; a joining
    /// caller's `work` future is dropped unstarted.
    pub fn start_or_join<F>(self: &Arc<Self>, hash: &FileHash, work: F) -> Arc<TransferHandle>
    where
        F: Future<Output = CacheResult<()>> + Send + 'static,
    {
        let mut active = self.active.lock().unwrap();
        if let Some(existing) = active.get(hash) {
            return existing.clone();
        }

        let (tx, rx) = watch::channel(TransferStatus::Pending);
        let handle = Arc::new(TransferHandle {
            hash: hash.clone(),
            status: rx,
        });
        active.insert(hash.clone(), handle.clone());
        drop(active);

        let coordinator = Arc::clone(self);
        let hash = hash.clone();
        tokio::spawn(async move {
            let status = match work.await {
                Ok(()) => TransferStatus::Succeeded,
                Err(e) => {
                    tracing::warn!(hash = %hash, error = %e, "transfer failed");
                    TransferStatus::Failed
                }
            };
            // Terminal marking and map removal must share a critical section;
            // otherwise a joiner could observe the hash absent while the
            // handle still reads Pending.
            let mut active = coordinator.active.lock().unwrap();
            let _ = tx.send(status);
            active.remove(&hash);
        });

        handle
    }

    /// True iff any of the given hashes has a transfer in flight.
    pub fn contains(&self, hashes: &[FileHash]) -> bool {
        let active = self.active.lock().unwrap();
        hashes.iter().any(|h| active.contains_key(h))
    }

    /// Number of transfers currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn hash(s: &str) -> FileHash {
        FileHash::new(s).unwrap()
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let coordinator = FetchCoordinator::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let executions = executions.clone();
            let release = release.clone();
            handles.push(coordinator.start_or_join(&hash("ab01"), async move {
                executions.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok(())
            }));
        }

        assert_eq!(coordinator.active_count(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));

        // notify_one stores a permit, so the worker completes even if it has
        // not registered yet.
        release.notify_one();
        for handle in &handles {
            assert_eq!(
                handle.wait(Duration::from_secs(5)).await,
                TransferOutcome::Succeeded
            );
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_clears_the_map() {
        let coordinator = FetchCoordinator::new();
        let handle = coordinator.start_or_join(&hash("cd02"), async {
            Err(crate::CacheError::Io(std::io::Error::other("boom")))
        });

        assert_eq!(
            handle.wait(Duration::from_secs(5)).await,
            TransferOutcome::Failed
        );
        assert_eq!(coordinator.active_count(), 0);

        // A later caller gets a fresh transfer, not the failed handle.
        let second = coordinator.start_or_join(&hash("cd02"), async { Ok(()) });
        assert_eq!(
            second.wait(Duration::from_secs(5)).await,
            TransferOutcome::Succeeded
        );
    }

    #[tokio::test]
    async fn waiter_times_out_while_transfer_stays_active() {
        let coordinator = FetchCoordinator::new();
        let handle = coordinator.start_or_join(&hash("ef03"), async {
            std::future::pending::<()>().await;
            Ok(())
        });

        assert_eq!(
            handle.wait(Duration::from_millis(50)).await,
            TransferOutcome::TimedOut
        );
        assert!(coordinator.contains(&[hash("ef03")]));
        assert_eq!(handle.status(), TransferStatus::Pending);
    }

    #[tokio::test]
    async fn contains_matches_any_of_the_given_hashes() {
        let coordinator = FetchCoordinator::new();
        let _handle = coordinator.start_or_join(&hash("0a0b"), async {
            std::future::pending::<()>().await;
            Ok(())
        });

        assert!(coordinator.contains(&[hash("ffff"), hash("0a0b")]));
        assert!(!coordinator.contains(&[hash("ffff")]));
        // Case-insensitive: the key is normalized at construction.
        assert!(coordinator.contains(&[FileHash::new("0A0B").unwrap()]));
    }
}
