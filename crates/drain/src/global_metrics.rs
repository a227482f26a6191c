//! System-wide metrics collection.
//!
//! The collector runs on the drain's thread: at most once per interval it
//! walks every active registry slot, samples the rate estimator, captures
//! a snapshot per thread and folds system totals. The interval window is
//! CAS-claimed so a second caller (another observer thread, a test) can
//! never double-collect the same window.

use ada_ringlane::{rate_sample, ThreadMetricsSnapshot, ThreadRegistry};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default collection interval: 100 ms.
pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_millis(100);

/// Accumulated counters across all active threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemTotals {
    pub total_events_written: u64,
    pub total_events_dropped: u64,
    pub total_events_filtered: u64,
    pub total_bytes_written: u64,
    pub active_thread_count: u32,
}

/// Summed per-second rates across all active threads.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SystemRates {
    pub system_events_per_second: f64,
    pub system_bytes_per_second: f64,
    pub last_window_ns: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PrevSwap {
    thread_id: u64,
    swap_count: u64,
    timestamp_ns: u64,
}

/// Periodic walker over the registry's per-thread metrics.
pub struct GlobalMetricsCollector {
    snapshots: Vec<ThreadMetricsSnapshot>,
    snapshot_count: usize,
    enabled: bool,
    interval_ns: u64,
    last_collection_ns: AtomicU64,
    totals: SystemTotals,
    rates: SystemRates,
    prev_swaps: Vec<PrevSwap>,
}

impl GlobalMetricsCollector {
    /// A collector with a snapshot buffer for `capacity` thread slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            snapshots: vec![ThreadMetricsSnapshot::default(); capacity as usize],
            snapshot_count: 0,
            enabled: true,
            interval_ns: DEFAULT_COLLECTION_INTERVAL.as_nanos() as u64,
            last_collection_ns: AtomicU64::new(0),
            totals: SystemTotals::default(),
            rates: SystemRates::default(),
            prev_swaps: vec![PrevSwap::default(); capacity as usize],
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_interval(&mut self, interval: Duration) {
        let ns = interval.as_nanos() as u64;
        if ns > 0 {
            self.interval_ns = ns;
        }
    }

    /// Per-slot swap rate from the collector's previous-swap memory.
    fn swaps_per_second(&mut self, slot: u32, snap: &ThreadMetricsSnapshot, now_ns: u64) -> f64 {
        let Some(prev) = self.prev_swaps.get_mut(slot as usize) else {
            return 0.0;
        };

        // A slot rebound to a new thread restarts the memory.
        if prev.thread_id != snap.thread_id {
            *prev = PrevSwap {
                thread_id: snap.thread_id,
                swap_count: snap.swap_count,
                timestamp_ns: now_ns,
            };
            return 0.0;
        }

        let (prev_count, prev_ts) = (prev.swap_count, prev.timestamp_ns);
        prev.swap_count = snap.swap_count;
        prev.timestamp_ns = now_ns;

        if now_ns <= prev_ts || snap.swap_count <= prev_count {
            return 0.0;
        }
        let delta_count = snap.swap_count - prev_count;
        let delta_ns = now_ns - prev_ts;
        delta_count as f64 * 1_000_000_000.0 / delta_ns as f64
    }

    /// Walks the registry and refreshes snapshots, totals and rates.
    ///
    /// Returns false when disabled or still inside the interval window.
    pub fn collect(&mut self, registry: &ThreadRegistry, now_ns: u64) -> bool {
        if !self.enabled {
            return false;
        }

        let last = self.last_collection_ns.load(Ordering::Acquire);
        if last != 0 && now_ns.saturating_sub(last) < self.interval_ns {
            return false;
        }
        // Claim the window; a concurrent caller loses and skips.
        if self
            .last_collection_ns
            .compare_exchange(last, now_ns, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.totals = SystemTotals::default();
        self.rates = SystemRates::default();
        let mut count = 0usize;

        for i in 0..registry.capacity() {
            let Some(slot) = registry.thread_at(i) else {
                continue;
            };
            if !slot.is_active() || count >= self.snapshots.len() {
                continue;
            }
            let metrics = slot.metrics();

            // Fold current submit depths into the pressure block.
            let depth = slot.index_lane().submit_depth() + slot.detail_lane().submit_depth();
            metrics.observe_queue_depth(depth);

            let events = metrics.events_written.load(Ordering::Relaxed);
            let bytes = metrics.bytes_written.load(Ordering::Relaxed);
            let rate = rate_sample(metrics, now_ns, events, bytes);

            let mut snap = metrics.capture(now_ns);
            snap.apply_rates(rate.events_per_second, rate.bytes_per_second);
            let swap_rate = self.swaps_per_second(snap.slot_index, &snap, now_ns);
            snap.set_swap_rate(swap_rate);

            self.totals.total_events_written += snap.events_written;
            self.totals.total_events_dropped += snap.events_dropped;
            self.totals.total_events_filtered += snap.events_filtered;
            self.totals.total_bytes_written += snap.bytes_written;
            self.totals.active_thread_count += 1;

            self.rates.system_events_per_second += snap.events_per_second;
            self.rates.system_bytes_per_second += snap.bytes_per_second;
            self.rates.last_window_ns = rate.window_duration_ns;

            self.snapshots[count] = snap;
            count += 1;
        }

        self.snapshot_count = count;
        true
    }

    /// Snapshots captured by the most recent collection.
    pub fn snapshots(&self) -> &[ThreadMetricsSnapshot] {
        &self.snapshots[..self.snapshot_count]
    }

    pub fn totals(&self) -> SystemTotals {
        self.totals
    }

    pub fn rates(&self) -> SystemRates {
        self.rates
    }
}
