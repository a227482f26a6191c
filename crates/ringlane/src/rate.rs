//! Sliding-window rate estimation over per-thread metrics.
//!
//! The estimator keeps up to [`RATE_HISTORY`](crate::metrics::RATE_HISTORY)
//! cumulative samples and reports the slope between the newest and oldest
//! sample inside a 100 ms window. A single sample, a non-positive time
//! delta, or a monotonic-clock violation all yield zero rates, never
//! negatives.

use crate::metrics::{RateSample, RateState, ThreadMetricsShared, RATE_HISTORY, RATE_WINDOW_NS};

/// Rates computed from one sampling pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateResult {
    pub events_per_second: f64,
    pub bytes_per_second: f64,
    pub window_duration_ns: u64,
    pub window_events: u64,
    pub window_bytes: u64,
}

#[inline]
fn oldest_index(state: &RateState) -> u32 {
    if state.sample_count == 0 {
        return 0;
    }
    let capacity = RATE_HISTORY as u32;
    (state.sample_head + capacity - state.sample_count) % capacity
}

/// Inserts a sample and recomputes the windowed rates.
///
/// Called only by the global metrics collector - the rate block has exactly
/// one writer, which is what makes the plain (non-atomic) state sound.
pub fn rate_sample(
    metrics: &ThreadMetricsShared,
    timestamp_ns: u64,
    events: u64,
    bytes: u64,
) -> RateResult {
    // SAFETY: single-writer discipline; only the collector thread calls
    // into the rate state, and &ThreadMetricsShared keeps it mapped.
    let state = unsafe { &mut *metrics.rate.get() };
    rate_sample_state(state, timestamp_ns, events, bytes)
}

fn rate_sample_state(
    state: &mut RateState,
    timestamp_ns: u64,
    events: u64,
    bytes: u64,
) -> RateResult {
    let capacity = RATE_HISTORY as u32;

    // Insert the new sample at head.
    state.samples[state.sample_head as usize] = RateSample {
        timestamp_ns,
        events,
        bytes,
    };
    state.sample_head = (state.sample_head + 1) % capacity;
    if state.sample_count < capacity {
        state.sample_count += 1;
    }

    // Evict samples that fell out of the window, keeping at least one.
    let window_floor = timestamp_ns.saturating_sub(RATE_WINDOW_NS);
    while state.sample_count > 1 {
        let idx = oldest_index(state) as usize;
        if state.samples[idx].timestamp_ns >= window_floor {
            break;
        }
        state.sample_count -= 1;
    }

    state.window_duration_ns = 0;
    state.window_events = 0;
    state.window_bytes = 0;
    state.events_per_second = 0.0;
    state.bytes_per_second = 0.0;

    let result = RateResult::default();
    if state.sample_count == 0 {
        return result;
    }

    let newest_idx = ((state.sample_head + capacity - 1) % capacity) as usize;
    let newest = state.samples[newest_idx];
    let oldest = state.samples[oldest_index(state) as usize];

    if newest.timestamp_ns <= oldest.timestamp_ns {
        return result;
    }

    let delta_ns = newest.timestamp_ns - oldest.timestamp_ns;
    // Saturating: a reset counter must not produce a huge bogus rate.
    let delta_events = newest.events.saturating_sub(oldest.events);
    let delta_bytes = newest.bytes.saturating_sub(oldest.bytes);

    state.window_duration_ns = delta_ns;
    state.window_events = delta_events;
    state.window_bytes = delta_bytes;

    const SCALE: f64 = 1_000_000_000.0; // ns -> seconds
    let denom = delta_ns as f64;
    state.events_per_second = delta_events as f64 * SCALE / denom;
    state.bytes_per_second = delta_bytes as f64 * SCALE / denom;

    RateResult {
        events_per_second: state.events_per_second,
        bytes_per_second: state.bytes_per_second,
        window_duration_ns: delta_ns,
        window_events: delta_events,
        window_bytes: delta_bytes,
    }
}
