//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Re-exports for the Prometheus exposition format
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps rate counters to get a
/// consistent interval snapshot.
pub struct Metrics {
    /// Total samples ever acquired (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Samples skipped for image quality (monotonic)
    quality_failures_total: AtomicU64,
    /// Samples that verified against some template (monotonic)
    matches_total: AtomicU64,
    /// Samples that verified against no template (monotonic)
    no_match_total: AtomicU64,
    /// Match events dropped due to channel full (monotonic)
    match_events_dropped: AtomicU64,
    /// Candidate-scan latency histogram buckets (reset on report)
    scan_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of scan latencies in microseconds (reset on report)
    scan_latency_sum_us: AtomicU64,
    /// Max scan latency in microseconds (reset on report)
    scan_latency_max_us: AtomicU64,
    /// Records opened (monotonic)
    entries_total: AtomicU64,
    /// Records closed by check-out (monotonic)
    exits_total: AtomicU64,
    /// Records force-closed by the midnight sweep (monotonic)
    auto_checkouts_total: AtomicU64,
    /// Presence calls for an unknown member id (monotonic)
    unknown_member_total: AtomicU64,
    /// Repository write/read failures surfaced to callers (monotonic)
    storage_errors_total: AtomicU64,
    /// Occupancy snapshots recomputed (monotonic)
    cache_refreshes_total: AtomicU64,
    /// Occupancy snapshots served from cache (monotonic)
    cache_hits_total: AtomicU64,
    /// Current members inside (gauge, set on snapshot recompute)
    members_inside: AtomicU64,
    /// Known members in the roster (gauge, set at startup)
    members_known: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            quality_failures_total: AtomicU64::new(0),
            matches_total: AtomicU64::new(0),
            no_match_total: AtomicU64::new(0),
            match_events_dropped: AtomicU64::new(0),
            scan_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            scan_latency_sum_us: AtomicU64::new(0),
            scan_latency_max_us: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            exits_total: AtomicU64::new(0),
            auto_checkouts_total: AtomicU64::new(0),
            unknown_member_total: AtomicU64::new(0),
            storage_errors_total: AtomicU64::new(0),
            cache_refreshes_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            members_inside: AtomicU64::new(0),
            members_known: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    // Capture loop

    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quality_failure(&self) {
        self.quality_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_match(&self) {
        self.no_match_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match_event_dropped(&self) {
        self.match_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_latency(&self, latency_us: u64) {
        self.scan_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.scan_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.scan_latency_max_us, latency_us);
    }

    // Engine

    pub fn record_entry(&self) {
        self.entries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_checkout(&self) {
        self.auto_checkouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_member(&self) {
        self.unknown_member_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    // Occupancy cache

    pub fn record_cache_refresh(&self) {
        self.cache_refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_members_inside(&self, inside: u64) {
        self.members_inside.store(inside, Ordering::Relaxed);
    }

    pub fn set_members_known(&self, known: u64) {
        self.members_known.store(known, Ordering::Relaxed);
    }

    pub fn members_inside(&self) -> u64 {
        self.members_inside.load(Ordering::Relaxed)
    }

    /// Build an interval summary, resetting the rate counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let samples_interval = self.samples_since_report.swap(0, Ordering::Relaxed);
        let scan_buckets = swap_buckets(&self.scan_latency_buckets);
        let scan_sum_us = self.scan_latency_sum_us.swap(0, Ordering::Relaxed);
        let scan_max_us = self.scan_latency_max_us.swap(0, Ordering::Relaxed);
        let scan_count: u64 = scan_buckets.iter().sum();

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_per_sec: if elapsed_secs > 0.0 {
                samples_interval as f64 / elapsed_secs
            } else {
                0.0
            },
            quality_failures_total: self.quality_failures_total.load(Ordering::Relaxed),
            matches_total: self.matches_total.load(Ordering::Relaxed),
            no_match_total: self.no_match_total.load(Ordering::Relaxed),
            match_events_dropped: self.match_events_dropped.load(Ordering::Relaxed),
            scan_buckets,
            scan_avg_us: if scan_count > 0 { scan_sum_us / scan_count } else { 0 },
            scan_max_us,
            scan_p50_us: percentile_from_buckets(&scan_buckets, 0.50),
            scan_p95_us: percentile_from_buckets(&scan_buckets, 0.95),
            scan_p99_us: percentile_from_buckets(&scan_buckets, 0.99),
            entries_total: self.entries_total.load(Ordering::Relaxed),
            exits_total: self.exits_total.load(Ordering::Relaxed),
            auto_checkouts_total: self.auto_checkouts_total.load(Ordering::Relaxed),
            unknown_member_total: self.unknown_member_total.load(Ordering::Relaxed),
            storage_errors_total: self.storage_errors_total.load(Ordering::Relaxed),
            cache_refreshes_total: self.cache_refreshes_total.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits_total.load(Ordering::Relaxed),
            members_inside: self.members_inside.load(Ordering::Relaxed),
            members_known: self.members_known.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for one reporting interval
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub quality_failures_total: u64,
    pub matches_total: u64,
    pub no_match_total: u64,
    pub match_events_dropped: u64,
    pub scan_buckets: [u64; NUM_BUCKETS],
    pub scan_avg_us: u64,
    pub scan_max_us: u64,
    pub scan_p50_us: u64,
    pub scan_p95_us: u64,
    pub scan_p99_us: u64,
    pub entries_total: u64,
    pub exits_total: u64,
    pub auto_checkouts_total: u64,
    pub unknown_member_total: u64,
    pub storage_errors_total: u64,
    pub cache_refreshes_total: u64,
    pub cache_hits_total: u64,
    pub members_inside: u64,
    pub members_known: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = %format!("{:.2}", self.samples_per_sec),
            quality_failures = %self.quality_failures_total,
            matches = %self.matches_total,
            no_match = %self.no_match_total,
            scan_avg_us = %self.scan_avg_us,
            scan_p99_us = %self.scan_p99_us,
            entries = %self.entries_total,
            exits = %self.exits_total,
            auto_checkouts = %self.auto_checkouts_total,
            unknown_member = %self.unknown_member_total,
            storage_errors = %self.storage_errors_total,
            cache_refreshes = %self.cache_refreshes_total,
            cache_hits = %self.cache_hits_total,
            members_inside = %self.members_inside,
            "metrics_report"
        );
    }
}
