//! Index observability: value-size latency histograms and the live-key gauge.
//!
//! Everything here is lock-free (plain atomics) because readers observe the
//! histograms while holding the tree's shared lock. Registration with an
//! exporter is the surrounding system's job; this module only accumulates
//! and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Duration histogram
// ---------------------------------------------------------------------------

/// Point-in-time copy of one wall-time histogram.
///
/// Bucket fields count samples at or below the named upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyHistogram {
    pub le_1us: u64,
    pub le_10us: u64,
    pub le_100us: u64,
    pub le_1ms: u64,
    pub le_10ms: u64,
    pub gt_10ms: u64,
    /// Total samples recorded.
    pub samples: u64,
    /// Sum of all recorded durations, in nanoseconds.
    pub sum_ns: u64,
}

/// Accumulating histogram backed by atomics.
struct DurationHistogram {
    le_1us: AtomicU64,
    le_10us: AtomicU64,
    le_100us: AtomicU64,
    le_1ms: AtomicU64,
    le_10ms: AtomicU64,
    gt_10ms: AtomicU64,
    samples: AtomicU64,
    sum_ns: AtomicU64,
}

impl DurationHistogram {
    const fn new() -> Self {
        Self {
            le_1us: AtomicU64::new(0),
            le_10us: AtomicU64::new(0),
            le_100us: AtomicU64::new(0),
            le_1ms: AtomicU64::new(0),
            le_10ms: AtomicU64::new(0),
            gt_10ms: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(ns, Ordering::Relaxed);

        let bucket = match ns {
            0..=1_000 => &self.le_1us,
            1_001..=10_000 => &self.le_10us,
            10_001..=100_000 => &self.le_100us,
            100_001..=1_000_000 => &self.le_1ms,
            1_000_001..=10_000_000 => &self.le_10ms,
            _ => &self.gt_10ms,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencyHistogram {
        LatencyHistogram {
            le_1us: self.le_1us.load(Ordering::Relaxed),
            le_10us: self.le_10us.load(Ordering::Relaxed),
            le_100us: self.le_100us.load(Ordering::Relaxed),
            le_1ms: self.le_1ms.load(Ordering::Relaxed),
            le_10ms: self.le_10ms.load(Ordering::Relaxed),
            gt_10ms: self.gt_10ms.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            sum_ns: self.sum_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.le_1us.store(0, Ordering::Relaxed);
        self.le_10us.store(0, Ordering::Relaxed);
        self.le_100us.store(0, Ordering::Relaxed);
        self.le_1ms.store(0, Ordering::Relaxed);
        self.le_10ms.store(0, Ordering::Relaxed);
        self.gt_10ms.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        self.sum_ns.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Globals
// ---------------------------------------------------------------------------

static GET_VALUE_SIZE_DURATION: DurationHistogram = DurationHistogram::new();
static RANGE_VALUE_SIZE_DURATION: DurationHistogram = DurationHistogram::new();
static LIVE_KEYS: AtomicU64 = AtomicU64::new(0);

/// Record the wall time of one `get_value_size` call.
pub fn observe_get_value_size(elapsed: Duration) {
    GET_VALUE_SIZE_DURATION.observe(elapsed);
}

/// Record the wall time of one `range_value_size` call.
pub fn observe_range_value_size(elapsed: Duration) {
    RANGE_VALUE_SIZE_DURATION.observe(elapsed);
}

/// Increment the live-key gauge. Called when a put opens a generation
/// (fresh key or revival after a tombstone).
pub fn record_key_created() {
    LIVE_KEYS.fetch_add(1, Ordering::Relaxed);
}

/// Decrement the live-key gauge (saturating at zero).
pub fn record_key_tombstoned() {
    saturating_dec(&LIVE_KEYS);
}

fn saturating_dec(counter: &AtomicU64) {
    loop {
        let current = counter.load(Ordering::Relaxed);
        if current == 0 {
            return;
        }
        if counter
            .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot / reset
// ---------------------------------------------------------------------------

/// Point-in-time copy of every index metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Wall-time histogram for `get_value_size`.
    pub get_value_size_duration: LatencyHistogram,
    /// Wall-time histogram for `range_value_size`.
    pub range_value_size_duration: LatencyHistogram,
    /// Number of keys with a live (untombstoned) generation.
    pub live_keys: u64,
}

/// Read a point-in-time snapshot of all index metrics.
#[must_use]
pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        get_value_size_duration: GET_VALUE_SIZE_DURATION.snapshot(),
        range_value_size_duration: RANGE_VALUE_SIZE_DURATION.snapshot(),
        live_keys: LIVE_KEYS.load(Ordering::Relaxed),
    }
}

/// Reset all index metrics to zero (tests/diagnostics).
pub fn reset_metrics() {
    GET_VALUE_SIZE_DURATION.reset();
    RANGE_VALUE_SIZE_DURATION.reset();
    LIVE_KEYS.store(0, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
