//! On-disk layout of a cache tier.
//!
//! A tier is a root directory sharded by the leading two hex digits of the
//! hash: a file named `H` lives at `<root>/<H[0:2]>/<H>`. In-flight
//! materializations write to a `.dl` sibling and atomically rename into
//! place.

use depot_core::FileHash;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Suffix of the transient staging path next to a final file.
pub const STAGING_SUFFIX: &str = ".dl";

/// Map a hash to its absolute path within a tier root. Pure.
pub fn path_for(root: &Path, hash: &FileHash) -> PathBuf {
    root.join(hash.shard_prefix()).join(hash.as_str())
}

/// Staging sibling for a final path: `<final>.dl`.
pub fn staging_path(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Stat-like record for a stored file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub len: u64,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
}

impl FileInfo {
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        // Access time can be unavailable depending on platform and mount
        // options; fall back to the write time for recency purposes.
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Self {
            len: meta.len(),
            accessed: meta.accessed().unwrap_or(modified),
            modified,
            created: meta.created().ok(),
        }
    }
}

/// Stat the file for `hash` in the tier rooted at `root`.
pub async fn info_for(root: &Path, hash: &FileHash) -> Option<FileInfo> {
    let path = path_for(root, hash);
    let meta = fs::metadata(&path).await.ok()?;
    Some(FileInfo::from_metadata(&meta))
}

/// Stat an arbitrary path within a tier.
pub async fn info_at(path: &Path) -> io::Result<FileInfo> {
    let meta = fs::metadata(path).await?;
    Ok(FileInfo::from_metadata(&meta))
}

/// Set a file's access and write times to now.
///
/// Used after promotion so a freshly promoted file starts a new retention
/// window instead of inheriting the cold copy's age. Creation time is not
/// settable on Unix; the rename that produced the file is its birth instant.
pub async fn set_times_to_now(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let now = filetime::FileTime::now();
        filetime::set_file_times(&path, now, now)
    })
    .await
    .map_err(|e| io::Error::other(format!("spawn_blocking failed: {e}")))?
}

/// Refresh a file's access time to now, leaving the write time alone.
pub async fn touch_accessed(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_atime(&path, filetime::FileTime::now())
    })
    .await
    .map_err(|e| io::Error::other(format!("spawn_blocking failed: {e}")))?
}
