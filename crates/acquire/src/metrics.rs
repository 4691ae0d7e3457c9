//! Prometheus metrics for the acquisition cache.
//!
//! Metrics are process-global; [`register`] adds them to a registry owned by
//! the embedding application.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::LazyLock;

pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_cache_hits_total",
        "Resolves answered from an already resolved record",
    )
    .expect("metric creation failed")
});

pub static FLIGHTS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_flights_started_total",
        "Acquisition flights started after a cache miss",
    )
    .expect("metric creation failed")
});

pub static COALESCED_WAITERS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_coalesced_waiters_total",
        "Callers that joined an acquisition already in flight",
    )
    .expect("metric creation failed")
});

pub static FETCH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_fetch_failures_total",
        "Fetch-and-store sequences that failed and were rolled back",
    )
    .expect("metric creation failed")
});

pub static PENDING_TIMEOUTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_pending_timeouts_total",
        "Polls that exhausted their budget on a pending record",
    )
    .expect("metric creation failed")
});

pub static ROLLBACK_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "almanac_rollback_failures_total",
        "Failed attempts to release a claim after a fetch failure",
    )
    .expect("metric creation failed")
});

pub static FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "almanac_fetch_duration_seconds",
            "Time taken to fetch an image upstream and store it",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

/// Register every acquisition metric with `registry`.
pub fn register(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(CACHE_HITS.clone()))?;
    registry.register(Box::new(FLIGHTS_STARTED.clone()))?;
    registry.register(Box::new(COALESCED_WAITERS.clone()))?;
    registry.register(Box::new(FETCH_FAILURES.clone()))?;
    registry.register(Box::new(PENDING_TIMEOUTS.clone()))?;
    registry.register(Box::new(ROLLBACK_FAILURES.clone()))?;
    registry.register(Box::new(FETCH_DURATION.clone()))?;
    Ok(())
}
