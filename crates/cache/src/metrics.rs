//! Prometheus metrics for the cache core.
//!
//! Tier gauges are set by the janitor from each pass's surviving file set;
//! the downloading and waiter gauges are held by drop guards so every exit
//! path pairs its increment with a decrement.

use prometheus::{IntGauge, Registry};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all cache metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Files in the hot tier.
pub static FILES_TOTAL: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("depot_files_total", "Number of files in the hot tier")
        .expect("metric creation failed")
});

/// Total bytes in the hot tier.
pub static FILES_TOTAL_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_files_total_size_bytes",
        "Total size of files in the hot tier",
    )
    .expect("metric creation failed")
});

/// Files in the cold tier.
pub static COLD_FILES_TOTAL: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_cold_files_total",
        "Number of files in the cold tier",
    )
    .expect("metric creation failed")
});

/// Total bytes in the cold tier.
pub static COLD_FILES_TOTAL_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_cold_files_total_size_bytes",
        "Total size of files in the cold tier",
    )
    .expect("metric creation failed")
});

/// In-flight peer fetches.
pub static FILES_DOWNLOADING: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_files_downloading",
        "Number of peer fetches currently in flight",
    )
    .expect("metric creation failed")
});

/// Tasks currently awaiting a transfer handle.
pub static DOWNLOAD_WAITERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "depot_download_waiters",
        "Number of tasks waiting for an in-flight peer fetch",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; subsequent calls are no-ops so embedding routers and
/// integration tests can call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        for metric in [
            &FILES_TOTAL,
            &FILES_TOTAL_SIZE,
            &COLD_FILES_TOTAL,
            &COLD_FILES_TOTAL_SIZE,
            &FILES_DOWNLOADING,
            &DOWNLOAD_WAITERS,
        ] {
            REGISTRY
                .register(Box::new((*metric).clone()))
                .expect("metric registration failed");
        }
    });
}

/// Increments a gauge for its lifetime; decrements on drop.
pub struct GaugeGuard {
    gauge: &'static LazyLock<IntGauge>,
}

impl GaugeGuard {
    pub fn acquire(gauge: &'static LazyLock<IntGauge>) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// The gauge pair for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Cold,
}

impl Tier {
    pub fn files_gauge(&self) -> &'static LazyLock<IntGauge> {
        match self {
            Tier::Hot => &FILES_TOTAL,
            Tier::Cold => &COLD_FILES_TOTAL,
        }
    }

    pub fn size_gauge(&self) -> &'static LazyLock<IntGauge> {
        match self {
            Tier::Hot => &FILES_TOTAL_SIZE,
            Tier::Cold => &COLD_FILES_TOTAL_SIZE,
        }
    }
}
