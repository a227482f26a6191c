use crate::backpressure::BackpressureState;
use crate::lane::{Lane, LaneKind, LaneShared};
use crate::metrics::{now_ns, ThreadMetricsShared};
use crate::registry::ThreadSlot;
use crate::ring::RingView;
use std::sync::atomic::Ordering;

/// Producer-side facade over one lane of one thread slot.
///
/// Adds the three things the bare lane does not do: eviction under pool
/// exhaustion, metric wiring around swaps, and backpressure sampling after
/// every free-depth change. One pool per lane lives in the producing
/// thread's TLS block.
///
/// Holds raw pointers into the arena instead of borrows so it can sit in
/// TLS; the agent context keeps the registry mapping alive for the process
/// lifetime, which is what makes that sound.
pub struct RingPool {
    lane: *const LaneShared,
    base: *mut u8,
    metrics: *const ThreadMetricsShared,
    kind: LaneKind,
    backpressure: BackpressureState,
}

// SAFETY: a pool is owned and used by exactly one producer thread; the
// shared structures it points into are themselves thread-safe.
unsafe impl Send for RingPool {}

impl RingPool {
    /// Builds the facade for one lane of `slot`.
    pub fn new(slot: &ThreadSlot<'_>, kind: LaneKind) -> Self {
        let lane_shared = match kind {
            LaneKind::Index => &slot.shared().index_lane,
            LaneKind::Detail => &slot.shared().detail_lane,
        };
        let mut pool = Self {
            lane: lane_shared,
            base: slot.base(),
            metrics: slot.metrics(),
            kind,
            backpressure: BackpressureState::new(lane_shared.ring_count),
        };
        pool.sample_backpressure(now_ns());
        pool
    }

    #[inline]
    fn lane(&self) -> Lane<'static> {
        // SAFETY: the arena mapping outlives the pool (constructor
        // contract); the unbounded lifetime never escapes this module.
        Lane::new(unsafe { &*self.lane }, self.base)
    }

    #[inline]
    fn metrics(&self) -> &ThreadMetricsShared {
        // SAFETY: same mapping-lifetime argument as `lane`.
        unsafe { &*self.metrics }
    }

    /// The stream kind this pool feeds.
    #[inline]
    pub fn kind(&self) -> LaneKind {
        self.kind
    }

    /// Current backpressure counters.
    #[inline]
    pub fn backpressure(&self) -> &BackpressureState {
        &self.backpressure
    }

    fn sample_backpressure(&mut self, at: u64) {
        let free = self.lane().free_depth();
        self.backpressure.sample(free, at);
    }

    /// View over the ring producers currently write into.
    pub fn active_ring(&self) -> Option<RingView> {
        self.lane().active_ring()
    }

    /// Rotates the active ring out for a fresh one.
    ///
    /// Order of preference: free queue, then eviction + one retry, then
    /// oldest-is-current rotation when the lane has more than one ring.
    /// Returns the old active index on success; `None` only for a
    /// single-ring lane with nothing free.
    pub fn swap_active(&mut self) -> Option<u32> {
        let lane = self.lane();
        let shared = lane.shared();
        let started = now_ns();
        self.backpressure.sample(lane.free_depth(), started);
        let token = self.metrics().swap_begin(started);

        let mut new_idx = lane.get_free_ring();
        if new_idx.is_none() {
            self.metrics().record_ring_full();
            if self.handle_exhaustion() {
                new_idx = self.lane().get_free_ring();
            }
        }
        let new_idx = match new_idx {
            Some(idx) => idx,
            None if shared.ring_count > 1 => {
                // Oldest-is-current fallback: keep producing into the next
                // ring in rotation rather than stalling.
                (shared.active_idx.load(Ordering::Acquire) + 1) % shared.ring_count
            }
            None => {
                self.sample_backpressure(now_ns());
                self.metrics()
                    .swap_end(token, now_ns(), shared.ring_count);
                return None;
            }
        };

        let lane = self.lane();
        let old_idx = lane.exchange_active(new_idx);

        if !lane.submit_ring(old_idx) {
            // Submit queue full: the old ring's contents are lost. This is
            // the backstop, not normal operation.
            if let Some(ring) = lane.ring_view(old_idx) {
                let lost = u64::from(ring.available_read());
                if lost > 0 {
                    lane.shared()
                        .events_dropped
                        .fetch_add(lost, Ordering::Relaxed);
                    self.backpressure
                        .on_drop(lost * u64::from(ring.slot_size()), now_ns());
                    log::warn!(
                        "submit queue full on {:?} lane: {lost} events lost with ring {old_idx}",
                        self.kind
                    );
                }
                ring.reset();
            }
            // Keep the ring in rotation; without this it would belong to
            // no set at all.
            let _ = lane.return_ring(old_idx);
        }
        lane.shared().ring_swaps.fetch_add(1, Ordering::Relaxed);

        let finished = now_ns();
        self.sample_backpressure(finished);
        self.metrics().swap_end(token, finished, shared.ring_count);
        Some(old_idx)
    }

    /// Frees one ring by evicting the oldest event of the oldest submitted
    /// ring and recycling that ring.
    ///
    /// Returns true when a ring made it back to the free queue.
    pub fn handle_exhaustion(&mut self) -> bool {
        let at = now_ns();
        self.sample_backpressure(at);
        self.backpressure.on_exhaustion(at);
        self.metrics().record_pool_exhaustion();

        let lane = self.lane();
        lane.shared().pool_exhaustions.fetch_add(1, Ordering::Relaxed);

        let Some(oldest) = lane.take_ring() else {
            self.sample_backpressure(now_ns());
            return false;
        };

        if let Some(ring) = lane.ring_view(oldest) {
            let dropped = ring.drop_oldest();
            self.backpressure.on_drop(
                if dropped { u64::from(ring.slot_size()) } else { 0 },
                now_ns(),
            );
            if dropped {
                self.metrics().record_event_dropped();
                self.metrics().record_ring_full();
                lane.shared().events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        let returned = lane.return_ring(oldest);
        self.sample_backpressure(now_ns());
        returned
    }

    /// Writes one event into the active ring, swapping once on overflow.
    ///
    /// This is the producer hot path: one ring write in the common case,
    /// one swap plus a retry under pressure. Returns false when the event
    /// had to be dropped.
    pub fn write_event(&mut self, record: &[u8]) -> bool {
        let lane = self.lane();
        if let Some(ring) = lane.active_ring() {
            if ring.write(record) {
                self.metrics().record_event_written(record.len() as u64);
                lane.shared().events_written.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }

        if self.swap_active().is_some() {
            let lane = self.lane();
            if let Some(ring) = lane.active_ring() {
                if ring.write(record) {
                    self.metrics().record_event_written(record.len() as u64);
                    lane.shared().events_written.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            }
        }

        self.metrics().record_event_dropped();
        self.lane()
            .shared()
            .events_dropped
            .fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Flags that a triggering event landed in the detail lane's rotation.
    /// No-op (true) on index lanes.
    pub fn mark_detail(&self) -> bool {
        if self.kind != LaneKind::Detail {
            return true;
        }
        self.lane().mark_event();
        true
    }

    /// Whether the detail lane carries an unconsumed mark. Always false on
    /// index lanes.
    pub fn is_detail_marked(&self) -> bool {
        self.kind == LaneKind::Detail && self.lane().has_marked_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ArenaConfig;
    use crate::registry::ThreadRegistry;

    fn two_ring_fixture() -> (ThreadRegistry, u32) {
        // 2 small index rings so exhaustion is cheap to provoke.
        let cfg = ArenaConfig {
            max_threads: 1,
            index_rings: 2,
            index_ring_bytes: 64 + 8 * 32,
            index_queue_depth: 8,
            ..ArenaConfig::default()
        };
        let reg = ThreadRegistry::create_in_process(&cfg).unwrap();
        let slot = reg.register_thread(1).unwrap().slot_index();
        (reg, slot)
    }

    fn fill_active(pool: &RingPool) -> u32 {
        let ring = pool.active_ring().unwrap();
        let mut n = 0;
        while ring.write(&[0u8; 32]) {
            n += 1;
        }
        n
    }

    #[test]
    fn test_swap_uses_free_ring_first() {
        let (reg, slot) = two_ring_fixture();
        let slot = reg.thread_at(slot).unwrap();
        let mut pool = RingPool::new(&slot, LaneKind::Index);

        fill_active(&pool);
        let old = pool.swap_active();
        assert_eq!(old, Some(0));

        let lane = slot.index_lane();
        assert_eq!(lane.shared().active_idx.load(Ordering::Acquire), 1);
        assert_eq!(lane.submit_depth(), 1);
        assert_eq!(slot.metrics().swap_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_exhaustion_drops_oldest_and_recycles() {
        let (reg, slot) = two_ring_fixture();
        let slot = reg.thread_at(slot).unwrap();
        let mut pool = RingPool::new(&slot, LaneKind::Index);

        // Fill ring 0, swap to ring 1, fill it, swap again: free queue is
        // empty, so the pool must evict from submitted ring 0.
        fill_active(&pool);
        pool.swap_active().unwrap();
        fill_active(&pool);
        let old = pool.swap_active();
        assert!(old.is_some());

        let m = slot.metrics();
        assert_eq!(m.pool_exhaustion_count.load(Ordering::Relaxed), 1);
        assert_eq!(m.events_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(pool.backpressure().exhaustion_count, 1);
        assert_eq!(pool.backpressure().dropped_events, 1);
        assert_eq!(pool.backpressure().dropped_bytes, 32);
    }

    #[test]
    fn test_single_ring_lane_swap_fails_clean() {
        let cfg = ArenaConfig {
            max_threads: 1,
            index_rings: 1,
            index_ring_bytes: 64 + 8 * 32,
            index_queue_depth: 4,
            ..ArenaConfig::default()
        };
        let reg = ThreadRegistry::create_in_process(&cfg).unwrap();
        let slot_idx = reg.register_thread(1).unwrap().slot_index();
        let slot = reg.thread_at(slot_idx).unwrap();
        let mut pool = RingPool::new(&slot, LaneKind::Index);

        fill_active(&pool);
        assert!(pool.swap_active().is_none());
    }

    #[test]
    fn test_write_event_swaps_once_on_full() {
        let (reg, slot) = two_ring_fixture();
        let slot = reg.thread_at(slot).unwrap();
        let mut pool = RingPool::new(&slot, LaneKind::Index);
        let usable = pool.active_ring().unwrap().capacity() - 1;

        // Fill the active ring through the facade, then one more: the
        // facade must swap and land the event in the fresh ring.
        for _ in 0..usable {
            assert!(pool.write_event(&[1u8; 32]));
        }
        assert!(pool.write_event(&[2u8; 32]));

        let m = slot.metrics();
        assert_eq!(
            m.events_written.load(Ordering::Relaxed),
            u64::from(usable) + 1
        );
        assert_eq!(m.swap_count.load(Ordering::Relaxed), 1);
        assert_eq!(slot.index_lane().submit_depth(), 1);
    }

    #[test]
    fn test_detail_mark_roundtrip_via_pool() {
        let (reg, slot) = two_ring_fixture();
        let slot = reg.thread_at(slot).unwrap();
        let index_pool = RingPool::new(&slot, LaneKind::Index);
        let detail_pool = RingPool::new(&slot, LaneKind::Detail);

        assert!(!detail_pool.is_detail_marked());
        assert!(detail_pool.mark_detail());
        assert!(detail_pool.is_detail_marked());

        // Index pools never observe or set marks.
        assert!(index_pool.mark_detail());
        assert!(!index_pool.is_detail_marked());
    }

    #[test]
    fn test_backpressure_follows_free_depth() {
        let (reg, slot) = two_ring_fixture();
        let slot = reg.thread_at(slot).unwrap();
        let mut pool = RingPool::new(&slot, LaneKind::Index);
        assert_eq!(pool.backpressure().last_free_rings, 1);

        fill_active(&pool);
        pool.swap_active().unwrap();
        assert_eq!(pool.backpressure().last_free_rings, 0);
        assert!(pool.backpressure().is_starved());
    }
}
