//! Thin interfaces to external collaborators.

use depot_core::FileHash;
use std::path::PathBuf;

/// Supplies the bearer token for peer pulls.
///
/// The token is re-read on every call so rotation takes effect without a
/// restart. Issuance is external.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> String;
}

/// A fixed token value.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn bearer_token(&self) -> String {
        self.token.clone()
    }
}

/// A token read from a file on each call.
pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenProvider for FileTokenProvider {
    fn bearer_token(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(token) => token.trim().to_string(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read token file");
                String::new()
            }
        }
    }
}

/// A token read from an environment variable on each call.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn bearer_token(&self) -> String {
        match std::env::var(&self.var) {
            Ok(token) => token.trim().to_string(),
            Err(_) => {
                tracing::warn!(var = %self.var, "token environment variable not set");
                String::new()
            }
        }
    }
}

/// Receives a notification whenever a hash is served from the hot tier.
///
/// Recency tracking beyond filesystem access times lives behind this seam.
pub trait TouchSink: Send + Sync {
    fn record_touch(&self, hash: &FileHash);
}

/// Discards touches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTouchSink;

impl TouchSink for NullTouchSink {
    fn record_touch(&self, _hash: &FileHash) {}
}
