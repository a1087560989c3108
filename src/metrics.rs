// Engine metrics module
//
// Lightweight counters for watching how much work validation actually does

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine-wide counters
///
/// Uses atomic operations for thread-safe tracking without locks. One instance is shared
/// (behind an `Arc`) by the validation cache, the validator and the archive introspector.
#[derive(Debug)]
pub struct Metrics {
    /// Full validator runs (cache misses that reached the simulator)
    pub validations_computed: AtomicU64,

    /// Instruction-list replays performed by the simulator
    pub simulations_run: AtomicU64,

    /// Validation results served from the cache
    pub cache_hits: AtomicU64,

    /// Validation lookups that found nothing cached
    pub cache_misses: AtomicU64,

    /// Requests that joined a computation already in flight
    pub in_flight_joins: AtomicU64,

    /// Component buckets evicted from the cache
    pub evictions: AtomicU64,

    /// Archives opened and listed (introspection cache misses)
    pub archives_read: AtomicU64,

    /// Archives that could not be read
    pub introspection_failures: AtomicU64,

    /// Total time spent inside the validator, in milliseconds
    pub total_validation_time_ms: AtomicU64,

    /// Engine start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            validations_computed: AtomicU64::new(0),
            simulations_run: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            in_flight_joins: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            archives_read: AtomicU64::new(0),
            introspection_failures: AtomicU64::new(0),
            total_validation_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_validation(&self, duration: Duration) {
        self.validations_computed.fetch_add(1, Ordering::Relaxed);
        self.total_validation_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_simulation(&self) {
        self.simulations_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_flight_join(&self) {
        self.in_flight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_archive_read(&self) {
        self.archives_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_introspection_failure(&self) {
        self.introspection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of lookups answered from the cache, 0.0 when nothing was looked up
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        }
    }

    /// Average validator time per computed result in milliseconds
    pub fn avg_validation_time_ms(&self) -> f64 {
        let total = self.total_validation_time_ms.load(Ordering::Relaxed);
        let count = self.validations_computed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Engine Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Validations: {} computed (avg {:.2}ms), {} simulations",
            self.validations_computed.load(Ordering::Relaxed),
            self.avg_validation_time_ms(),
            self.simulations_run.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Cache: {} hits, {} misses ({:.0}% hit ratio), {} in-flight joins, {} evictions",
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
            self.cache_hit_ratio() * 100.0,
            self.in_flight_joins.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Archives: {} read, {} unreadable",
            self.archives_read.load(Ordering::Relaxed),
            self.introspection_failures.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
