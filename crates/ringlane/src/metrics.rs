use serde::Serialize;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Samples kept by the sliding-window rate estimator.
pub const RATE_HISTORY: usize = 8;

/// Rate window: samples older than this are evicted (100 ms).
pub const RATE_WINDOW_NS: u64 = 100_000_000;

/// One rate sample: cumulative totals at a point in time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSample {
    pub timestamp_ns: u64,
    pub events: u64,
    pub bytes: u64,
}

/// Mutable state of the rate estimator.
///
/// Written only by the global metrics collector (single writer), which is
/// why it sits behind an `UnsafeCell` rather than atomics.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RateState {
    pub sample_head: u32,
    pub sample_count: u32,
    pub window_duration_ns: u64,
    pub window_events: u64,
    pub window_bytes: u64,
    pub events_per_second: f64,
    pub bytes_per_second: f64,
    pub samples: [RateSample; RATE_HISTORY],
}

impl RateState {
    pub(crate) const fn zeroed() -> Self {
        Self {
            sample_head: 0,
            sample_count: 0,
            window_duration_ns: 0,
            window_events: 0,
            window_bytes: 0,
            events_per_second: 0.0,
            bytes_per_second: 0.0,
            samples: [RateSample {
                timestamp_ns: 0,
                events: 0,
                bytes: 0,
            }; RATE_HISTORY],
        }
    }
}

/// Per-thread metrics embedded in the thread's registry slot.
///
/// Four blocks, each starting on its own cache line so a hot producer does
/// not invalidate the collector's reads of unrelated counters. Hot-path
/// record calls are single Relaxed fetch-adds.
#[repr(C, align(64))]
pub struct ThreadMetricsShared {
    pub thread_id: AtomicU64,
    pub slot_index: AtomicU32,
    _reserved: u32,
    _pad0: [u8; 48],

    // Counters (hot path).
    pub events_written: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_filtered: AtomicU64,
    pub bytes_written: AtomicU64,
    _pad1: [u8; 32],

    // Pressure.
    pub pool_exhaustion_count: AtomicU64,
    pub ring_full_count: AtomicU64,
    pub allocation_failures: AtomicU64,
    pub max_queue_depth: AtomicU64,
    _pad2: [u8; 32],

    // Swaps.
    pub swap_count: AtomicU64,
    pub last_swap_timestamp_ns: AtomicU64,
    pub total_swap_duration_ns: AtomicU64,
    pub rings_in_rotation: AtomicU32,
    _pad3: [u8; 36],

    // Rate estimator state; single writer (the collector).
    pub(crate) rate: UnsafeCell<RateState>,
}

// SAFETY: every field is either atomic or behind the single-writer rate
// discipline (only the global metrics collector mutates `rate`).
unsafe impl Sync for ThreadMetricsShared {}

/// Timing token bracketing one ring swap, returned by
/// [`ThreadMetricsShared::swap_begin`].
#[derive(Debug, Clone, Copy)]
pub struct SwapToken {
    start_ns: u64,
}

impl ThreadMetricsShared {
    /// Writes initial state in place.
    ///
    /// # Safety
    ///
    /// `this` must be valid for writes and not concurrently accessed.
    pub(crate) unsafe fn init(this: *mut Self, thread_id: u64, slot_index: u32) {
        this.write(Self {
            thread_id: AtomicU64::new(thread_id),
            slot_index: AtomicU32::new(slot_index),
            _reserved: 0,
            _pad0: [0; 48],
            events_written: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            _pad1: [0; 32],
            pool_exhaustion_count: AtomicU64::new(0),
            ring_full_count: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            max_queue_depth: AtomicU64::new(0),
            _pad2: [0; 32],
            swap_count: AtomicU64::new(0),
            last_swap_timestamp_ns: AtomicU64::new(0),
            total_swap_duration_ns: AtomicU64::new(0),
            rings_in_rotation: AtomicU32::new(0),
            _pad3: [0; 36],
            rate: UnsafeCell::new(RateState::zeroed()),
        });
    }

    /// Rebinds the slot to a new thread and clears all counters.
    pub fn reset(&self, thread_id: u64, slot_index: u32) {
        self.thread_id.store(thread_id, Ordering::Relaxed);
        self.slot_index.store(slot_index, Ordering::Relaxed);
        self.events_written.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.events_filtered.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.pool_exhaustion_count.store(0, Ordering::Relaxed);
        self.ring_full_count.store(0, Ordering::Relaxed);
        self.allocation_failures.store(0, Ordering::Relaxed);
        self.max_queue_depth.store(0, Ordering::Relaxed);
        self.swap_count.store(0, Ordering::Relaxed);
        self.last_swap_timestamp_ns.store(0, Ordering::Relaxed);
        self.total_swap_duration_ns.store(0, Ordering::Relaxed);
        self.rings_in_rotation.store(0, Ordering::Relaxed);
        // SAFETY: reset happens during slot claim, before any collector can
        // observe the slot as active.
        unsafe {
            *self.rate.get() = RateState::zeroed();
        }
    }

    // -----------------------------------------------------------------
    // Hot-path counters. Must stay a handful of nanoseconds.
    // -----------------------------------------------------------------

    #[inline]
    pub fn record_event_written(&self, bytes: u64) {
        self.events_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_events_written_bulk(&self, events: u64, bytes: u64) {
        if events != 0 {
            self.events_written.fetch_add(events, Ordering::Relaxed);
        }
        if bytes != 0 {
            self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ring_full(&self) {
        self.ring_full_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pool_exhaustion(&self) {
        self.pool_exhaustion_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Monotone max via CAS; concurrent observers only ever raise it.
    pub fn observe_queue_depth(&self, depth: u32) {
        let depth = u64::from(depth);
        let mut current = self.max_queue_depth.load(Ordering::Relaxed);
        while depth > current {
            match self.max_queue_depth.compare_exchange_weak(
                current,
                depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    #[inline]
    pub fn set_rings_in_rotation(&self, rings: u32) {
        self.rings_in_rotation.store(rings, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------
    // Swap tracking
    // -----------------------------------------------------------------

    #[inline]
    pub fn swap_begin(&self, start_ns: u64) -> SwapToken {
        SwapToken { start_ns }
    }

    pub fn swap_end(&self, token: SwapToken, end_ns: u64, rings_in_rotation: u32) {
        self.swap_count.fetch_add(1, Ordering::Relaxed);
        self.last_swap_timestamp_ns.store(end_ns, Ordering::Relaxed);
        self.total_swap_duration_ns
            .fetch_add(end_ns.saturating_sub(token.start_ns), Ordering::Relaxed);
        self.set_rings_in_rotation(rings_in_rotation);
    }

    // -----------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------

    /// Captures a stable view of the counters at `timestamp_ns`.
    ///
    /// Rates are zero until the collector applies them; see
    /// [`ThreadMetricsSnapshot::apply_rates`].
    pub fn capture(&self, timestamp_ns: u64) -> ThreadMetricsSnapshot {
        let events_written = self.events_written.load(Ordering::Relaxed);
        let events_dropped = self.events_dropped.load(Ordering::Relaxed);
        let swap_count = self.swap_count.load(Ordering::Relaxed);
        let total_swap = self.total_swap_duration_ns.load(Ordering::Relaxed);

        let attempted = events_written + events_dropped;
        let drop_rate_percent = if attempted == 0 {
            0.0
        } else {
            events_dropped as f64 * 100.0 / attempted as f64
        };

        ThreadMetricsSnapshot {
            thread_id: self.thread_id.load(Ordering::Relaxed),
            slot_index: self.slot_index.load(Ordering::Relaxed),
            timestamp_ns,
            events_written,
            events_dropped,
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            events_per_second: 0.0,
            bytes_per_second: 0.0,
            drop_rate_percent,
            pool_exhaustion_count: self.pool_exhaustion_count.load(Ordering::Relaxed),
            ring_full_count: self.ring_full_count.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            swap_count,
            swaps_per_second: 0.0,
            avg_swap_duration_ns: if swap_count == 0 {
                0
            } else {
                total_swap / swap_count
            },
            last_swap_timestamp_ns: self.last_swap_timestamp_ns.load(Ordering::Relaxed),
            rings_in_rotation: self.rings_in_rotation.load(Ordering::Relaxed),
        }
    }
}

/// Stable view of one thread's metrics, as captured by the collector.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ThreadMetricsSnapshot {
    pub thread_id: u64,
    pub slot_index: u32,
    pub timestamp_ns: u64,

    pub events_written: u64,
    pub events_dropped: u64,
    pub events_filtered: u64,
    pub bytes_written: u64,

    pub events_per_second: f64,
    pub bytes_per_second: f64,
    pub drop_rate_percent: f64,

    pub pool_exhaustion_count: u64,
    pub ring_full_count: u64,
    pub allocation_failures: u64,
    pub max_queue_depth: u64,

    pub swap_count: u64,
    pub swaps_per_second: f64,
    pub avg_swap_duration_ns: u64,
    pub last_swap_timestamp_ns: u64,
    pub rings_in_rotation: u32,
}

impl ThreadMetricsSnapshot {
    /// Applies window rates computed by the collector.
    pub fn apply_rates(&mut self, events_per_second: f64, bytes_per_second: f64) {
        self.events_per_second = events_per_second;
        self.bytes_per_second = bytes_per_second;
    }

    /// Applies the per-slot swap rate computed by the collector.
    pub fn set_swap_rate(&mut self, swaps_per_second: f64) {
        self.swaps_per_second = swaps_per_second;
    }
}

/// Monotonic nanoseconds for metrics and event timestamps.
///
/// Process-relative; continuity across sleep follows the platform's
/// `Instant` source. Both the producer and the drain use this clock so all
/// timestamps in one session compare.
#[inline]
pub fn now_ns() -> u64 {
    static EPOCH: once_epoch::Epoch = once_epoch::Epoch::new();
    EPOCH.elapsed_ns()
}

mod once_epoch {
    use super::Instant;
    use std::sync::OnceLock;

    pub struct Epoch {
        start: OnceLock<Instant>,
    }

    impl Epoch {
        pub const fn new() -> Self {
            Self {
                start: OnceLock::new(),
            }
        }

        pub fn elapsed_ns(&self) -> u64 {
            let start = self.start.get_or_init(Instant::now);
            u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
        }
    }
}
