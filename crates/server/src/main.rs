//! Depot distribution node daemon.

use anyhow::{Context, Result};
use clap::Parser;
use depot_cache::{
    CachedFileProvider, FetchCoordinator, Janitor, MemoryMetadataStore, NullTouchSink, PeerFetcher,
    StaticTokenProvider, TokenProvider,
};
use depot_core::{AppConfig, SystemClock};
use depot_server::state::token_provider_from;
use depot_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a content-addressed file distribution cache
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override
    // everything).
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    depot_cache::metrics::register_metrics();

    tokio::fs::create_dir_all(&config.cache.cache_directory)
        .await
        .context("failed to create cache directory")?;
    if let Some(cold) = config.cache.cold_root() {
        tokio::fs::create_dir_all(cold)
            .await
            .context("failed to create cold storage directory")?;
    }

    let token_provider = config.auth.token.as_ref().map(token_provider_from);

    let fetcher = match &config.cache.distribution_file_server_address {
        Some(address) => {
            let outbound: Arc<dyn TokenProvider> = token_provider
                .clone()
                .unwrap_or_else(|| Arc::new(StaticTokenProvider::new("")));
            let fetcher = PeerFetcher::new(
                address,
                outbound,
                config.cache.distribution_file_server_force_http2,
            )
            .context("invalid distribution peer address")?;
            tracing::info!(peer = %address, "pull-through fetch enabled");
            Some(Arc::new(fetcher))
        }
        None => {
            tracing::info!("no upstream peer configured, this node is authoritative");
            None
        }
    };

    let coordinator = FetchCoordinator::new();
    let provider = CachedFileProvider::new(
        &config.cache,
        fetcher,
        coordinator.clone(),
        Arc::new(NullTouchSink),
    );

    // The registry schema and transport are deployment-specific; the daemon
    // wires the in-memory reference store by default.
    let metadata = Arc::new(MemoryMetadataStore::new());

    let shutdown = CancellationToken::new();
    let janitor = Arc::new(Janitor::new(
        config.cache.clone(),
        metadata,
        coordinator,
        Arc::new(SystemClock),
        shutdown.clone(),
    ));
    let janitor_handle = janitor.spawn();
    tracing::info!("janitor spawned");

    let state = AppState::new(config.clone(), provider, token_provider);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(
        "listening on {} (distribution node: {})",
        addr,
        config.cache.is_distribution_node
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Stop the janitor and let the in-flight iteration reach its next
    // cancellation checkpoint.
    shutdown.cancel();
    let _ = janitor_handle.await;

    Ok(())
}
