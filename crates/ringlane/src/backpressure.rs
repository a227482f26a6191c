//! Producer-side backpressure accounting.
//!
//! One [`BackpressureState`] per lane lives in the producer's TLS block and
//! is sampled after every operation that changes the free-ring depth. The
//! counters feed adaptive behavior (and diagnostics) without any cross-core
//! traffic: the state has a single owner, so the fields are plain integers.

/// Per-lane backpressure counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackpressureState {
    /// Rings in this lane's rotation.
    pub total_rings: u32,
    /// Free-queue depth at the most recent sample.
    pub last_free_rings: u32,
    /// Lowest free-queue depth ever sampled.
    pub min_free_rings: u32,
    /// Pool-exhaustion events (free queue empty at swap time).
    pub exhaustion_count: u64,
    /// Events evicted under exhaustion.
    pub dropped_events: u64,
    /// Bytes evicted under exhaustion.
    pub dropped_bytes: u64,
    /// Timestamp of the most recent sample.
    pub last_sample_ns: u64,
    sampled: bool,
}

impl BackpressureState {
    pub fn new(total_rings: u32) -> Self {
        Self {
            total_rings,
            ..Self::default()
        }
    }

    pub fn set_total_rings(&mut self, total: u32) {
        self.total_rings = total;
    }

    /// Records the current free-ring depth.
    pub fn sample(&mut self, free_rings: u32, now_ns: u64) {
        self.last_free_rings = free_rings;
        if !self.sampled || free_rings < self.min_free_rings {
            self.min_free_rings = free_rings;
        }
        self.sampled = true;
        self.last_sample_ns = now_ns;
    }

    pub fn on_exhaustion(&mut self, now_ns: u64) {
        self.exhaustion_count += 1;
        self.last_sample_ns = now_ns;
    }

    /// Records an eviction. `bytes == 0` counts the attempt without a loss
    /// (the evicted ring was already empty).
    pub fn on_drop(&mut self, bytes: u64, now_ns: u64) {
        if bytes > 0 {
            self.dropped_events += 1;
            self.dropped_bytes += bytes;
        }
        self.last_sample_ns = now_ns;
    }

    /// Fraction of the rotation currently unavailable, 0.0 (all free) to
    /// 1.0 (starved). Zero-ring lanes report full pressure.
    pub fn pressure(&self) -> f32 {
        if self.total_rings == 0 {
            return 1.0;
        }
        1.0 - self.last_free_rings.min(self.total_rings) as f32 / self.total_rings as f32
    }

    /// True when the lane has no free rings left.
    pub fn is_starved(&self) -> bool {
        self.sampled && self.last_free_rings == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_tracks_minimum() {
        let mut bp = BackpressureState::new(4);
        bp.sample(3, 10);
        bp.sample(1, 20);
        bp.sample(2, 30);
        assert_eq!(bp.last_free_rings, 2);
        assert_eq!(bp.min_free_rings, 1);
        assert_eq!(bp.last_sample_ns, 30);
    }

    #[test]
    fn test_pressure_ratio() {
        let mut bp = BackpressureState::new(4);
        bp.sample(4, 0);
        assert_eq!(bp.pressure(), 0.0);
        bp.sample(1, 0);
        assert!((bp.pressure() - 0.75).abs() < f32::EPSILON);
        bp.sample(0, 0);
        assert_eq!(bp.pressure(), 1.0);
        assert!(bp.is_starved());
    }

    #[test]
    fn test_empty_ring_drop_counts_attempt_only() {
        let mut bp = BackpressureState::new(2);
        bp.on_drop(0, 5);
        assert_eq!(bp.dropped_events, 0);
        assert_eq!(bp.dropped_bytes, 0);
        bp.on_drop(32, 6);
        assert_eq!(bp.dropped_events, 1);
        assert_eq!(bp.dropped_bytes, 32);
    }

    #[test]
    fn test_unsampled_state_is_not_starved() {
        let bp = BackpressureState::new(2);
        assert!(!bp.is_starved());
    }
}
