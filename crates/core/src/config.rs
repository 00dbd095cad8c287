//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Cache core configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hot tier root directory (the serving tier). Required.
    pub cache_directory: PathBuf,
    /// Enables the two-tier model (default: false).
    #[serde(default)]
    pub use_cold_storage: bool,
    /// Cold tier root directory; required when `use_cold_storage` is set.
    #[serde(default)]
    pub cold_storage_directory: Option<PathBuf>,
    /// Upstream peer base URI. Unset means this node is authoritative:
    /// misses are answered locally without network I/O.
    #[serde(default)]
    pub distribution_file_server_address: Option<String>,
    /// Whether this node serves peer-pull requests on the distribution route.
    #[serde(default)]
    pub is_distribution_node: bool,
    /// Pin outbound peer requests to HTTP/2 with exact-version policy.
    #[serde(default)]
    pub distribution_file_server_force_http2: bool,
    /// Hot retention by last access, in days (default: 14).
    #[serde(default = "default_hot_retention_days")]
    pub unused_file_retention_period_in_days: i64,
    /// Hot forced eviction by last write, in hours; <= 0 disables (default).
    #[serde(default)]
    pub forced_deletion_of_files_after_hours: i64,
    /// Hot size cap in GiB; <= 0 disables.
    #[serde(default)]
    pub cache_size_hard_limit_in_gib: f64,
    /// Cold retention by last access, in days (default: 60).
    #[serde(default = "default_cold_retention_days")]
    pub cold_storage_unused_file_retention_period_in_days: i64,
    /// Cold size cap in GiB; <= 0 disables.
    #[serde(default)]
    pub cold_storage_size_hard_limit_in_gib: f64,
    /// Janitor cadence in minutes, aligned to wall-clock boundaries
    /// (default: 15).
    #[serde(default = "default_cleanup_check_minutes")]
    pub cleanup_check_in_minutes: i64,
}

fn default_hot_retention_days() -> i64 {
    14
}

fn default_cold_retention_days() -> i64 {
    60
}

fn default_cleanup_check_minutes() -> i64 {
    15
}

impl CacheConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        if self.cache_directory.as_os_str().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "cache_directory is required".to_string(),
            ));
        }
        if self.use_cold_storage && self.cold_storage_directory.is_none() {
            return Err(crate::Error::InvalidConfig(
                "cold_storage_directory is required when use_cold_storage is set".to_string(),
            ));
        }
        if self.cleanup_check_in_minutes < 1 || self.cleanup_check_in_minutes > 60 {
            return Err(crate::Error::InvalidConfig(format!(
                "cleanup_check_in_minutes must be within 1..=60, got {}",
                self.cleanup_check_in_minutes
            )));
        }
        Ok(())
    }

    /// Cold tier root, when the two-tier model is active.
    pub fn cold_root(&self) -> Option<&PathBuf> {
        if self.use_cold_storage {
            self.cold_storage_directory.as_ref()
        } else {
            None
        }
    }

    /// Hot size cap in bytes; `None` when disabled.
    pub fn hot_size_limit_bytes(&self) -> Option<u64> {
        gib_to_bytes(self.cache_size_hard_limit_in_gib)
    }

    /// Cold size cap in bytes; `None` when disabled.
    pub fn cold_size_limit_bytes(&self) -> Option<u64> {
        gib_to_bytes(self.cold_storage_size_hard_limit_in_gib)
    }

    /// Hot retention window.
    pub fn hot_retention(&self) -> Duration {
        Duration::days(self.unused_file_retention_period_in_days.max(0))
    }

    /// Cold retention window.
    pub fn cold_retention(&self) -> Duration {
        Duration::days(self.cold_storage_unused_file_retention_period_in_days.max(0))
    }

    /// Hot forced-deletion window by last write; `None` when disabled.
    pub fn hot_forced_deletion(&self) -> Option<Duration> {
        if self.forced_deletion_of_files_after_hours > 0 {
            Some(Duration::hours(self.forced_deletion_of_files_after_hours))
        } else {
            None
        }
    }
}

fn gib_to_bytes(gib: f64) -> Option<u64> {
    if gib > 0.0 { Some((gib * GIB) as u64) } else { None }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Source of the distribution bearer token.
///
/// The same token is presented to upstream peers on pull and expected from
/// downstream peers on the distribution route. Issuance and rotation happen
/// outside this process; `File` and `Env` sources are re-read per use so a
/// rotated token is picked up without a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenSource {
    /// Token stored in a file.
    File { path: PathBuf },
    /// Token stored in an environment variable.
    Env { var: String },
    /// Token provided directly as a value (NOT recommended for production).
    Value { token: String },
}

/// Peer authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token source; unset disables inbound verification and sends
    /// no credentials on outbound pulls.
    #[serde(default)]
    pub token: Option<TokenSource>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Validate all sections.
    pub fn validate(&self) -> crate::Result<()> {
        self.cache.validate()
    }

    /// Create a test configuration rooted at the given directory.
    ///
    /// **For testing only.** Single tier, authoritative, default janitor
    /// windows.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig {
                cache_directory: root.into(),
                use_cold_storage: false,
                cold_storage_directory: None,
                distribution_file_server_address: None,
                is_distribution_node: true,
                distribution_file_server_force_http2: false,
                unused_file_retention_period_in_days: default_hot_retention_days(),
                forced_deletion_of_files_after_hours: 0,
                cache_size_hard_limit_in_gib: 0.0,
                cold_storage_unused_file_retention_period_in_days: default_cold_retention_days(),
                cold_storage_size_hard_limit_in_gib: 0.0,
                cleanup_check_in_minutes: default_cleanup_check_minutes(),
            },
            auth: AuthConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let json = r#"{"cache_directory": "/var/cache/depot"}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.unused_file_retention_period_in_days, 14);
        assert_eq!(config.cold_storage_unused_file_retention_period_in_days, 60);
        assert_eq!(config.cleanup_check_in_minutes, 15);
        assert_eq!(config.forced_deletion_of_files_after_hours, 0);
        assert!(!config.use_cold_storage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cold_storage_requires_directory() {
        let json = r#"{"cache_directory": "/hot", "use_cold_storage": true}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_caps_yield_no_limit() {
        let mut config = AppConfig::for_testing("/hot").cache;
        assert_eq!(config.hot_size_limit_bytes(), None);
        config.cache_size_hard_limit_in_gib = 1.0;
        assert_eq!(config.hot_size_limit_bytes(), Some(1024 * 1024 * 1024));
        config.cache_size_hard_limit_in_gib = -3.0;
        assert_eq!(config.hot_size_limit_bytes(), None);
    }

    #[test]
    fn forced_deletion_disabled_at_or_below_zero() {
        let mut config = AppConfig::for_testing("/hot").cache;
        assert_eq!(config.hot_forced_deletion(), None);
        config.forced_deletion_of_files_after_hours = 72;
        assert_eq!(config.hot_forced_deletion(), Some(Duration::hours(72)));
    }

    #[test]
    fn cleanup_cadence_bounds_enforced() {
        let mut config = AppConfig::for_testing("/hot").cache;
        config.cleanup_check_in_minutes = 0;
        assert!(config.validate().is_err());
        config.cleanup_check_in_minutes = 61;
        assert!(config.validate().is_err());
        config.cleanup_check_in_minutes = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn token_source_round_trip() {
        let auth = AuthConfig {
            token: Some(TokenSource::Env {
                var: "DEPOT_TOKEN".to_string(),
            }),
        };
        let json = serde_json::to_string(&auth).unwrap();
        let decoded: AuthConfig = serde_json::from_str(&json).unwrap();
        match decoded.token {
            Some(TokenSource::Env { var }) => assert_eq!(var, "DEPOT_TOKEN"),
            other => panic!("unexpected token source: {other:?}"),
        }
    }
}
