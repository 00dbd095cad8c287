//! Application state shared across handlers.

use depot_cache::{
    CachedFileProvider, EnvTokenProvider, FileTokenProvider, StaticTokenProvider, TokenProvider,
};
use depot_core::{AppConfig, TokenSource};
use std::sync::Arc;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub provider: CachedFileProvider,
    /// Source of the distribution bearer token; `None` disables inbound
    /// verification.
    pub token_provider: Option<Arc<dyn TokenProvider>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        provider: CachedFileProvider,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            token_provider,
        }
    }
}

/// Build a token provider from its configured source.
pub fn token_provider_from(source: &TokenSource) -> Arc<dyn TokenProvider> {
    match source {
        TokenSource::File { path } => Arc::new(FileTokenProvider::new(path)),
        TokenSource::Env { var } => Arc::new(EnvTokenProvider::new(var)),
        TokenSource::Value { token } => Arc::new(StaticTokenProvider::new(token.clone())),
    }
}
