use crate::invariants::debug_assert_ring_index;
use crate::ring::{RingView, RING_HEADER_SIZE};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Which stream a lane carries. The two kinds differ only in geometry
/// (slot size, ring count, queue depth); behavior is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneKind {
    /// Fixed 32-byte index events; always on while tracing.
    Index,
    /// Variable-content detail records; flight-recorder controlled.
    Detail,
}

/// Location of one ring inside the arena.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RingDesc {
    /// Byte offset of the ring header from the arena base.
    pub offset: u64,
    /// Region length in bytes (header + slots).
    pub bytes: u64,
}

const _: () = assert!(std::mem::size_of::<RingDesc>() == 16);

/// Shared-memory state of one lane.
///
/// Lives inside the registry arena; all array references are byte offsets
/// from the arena base so the structure is valid from any mapping. Both
/// queues are SPSC with a sentinel slot: `head` is the consumer cursor,
/// `tail` the producer cursor.
///
/// Queue roles:
/// - submit queue: producer pushes full ring indices, drain pops
/// - free queue:   drain pushes drained ring indices, producer pops
#[repr(C)]
pub struct LaneShared {
    /// Number of rings owned by this lane.
    pub ring_count: u32,
    /// Slot size of every ring in this lane.
    pub slot_size: u32,
    /// Index of the ring producers currently write into.
    pub active_idx: AtomicU32,
    _pad0: u32,

    // Submit queue (producer -> drain).
    pub(crate) submit_head: AtomicU32,
    pub(crate) submit_tail: AtomicU32,
    pub(crate) submit_capacity: u32,
    pub(crate) submit_offset: u32,

    // Free queue (drain -> producer).
    pub(crate) free_head: AtomicU32,
    pub(crate) free_tail: AtomicU32,
    pub(crate) free_capacity: u32,
    pub(crate) free_offset: u32,

    /// Offset of the `[RingDesc; ring_count]` table from the arena base.
    pub(crate) ring_table_offset: u32,
    /// Flight-recorder trigger flag; meaningful on detail lanes only.
    pub(crate) marked_event_seen: AtomicU32,

    // Lane-local counters.
    pub events_written: AtomicU64,
    pub events_dropped: AtomicU64,
    pub ring_swaps: AtomicU32,
    pub pool_exhaustions: AtomicU32,
}

impl LaneShared {
    /// Writes the lane's initial state. Ring 0 becomes active; all other
    /// rings start on the free queue; the submit queue starts empty.
    ///
    /// # Safety
    ///
    /// `base` must be the arena base; the queue arrays and ring table at the
    /// given offsets must be inside the arena and exclusively owned during
    /// initialization.
    #[allow(clippy::too_many_arguments)]
    pub(crate) unsafe fn init(
        this: *mut LaneShared,
        base: *mut u8,
        ring_count: u32,
        slot_size: u32,
        queue_capacity: u32,
        submit_offset: u32,
        free_offset: u32,
        ring_table_offset: u32,
    ) {
        this.write(LaneShared {
            ring_count,
            slot_size,
            active_idx: AtomicU32::new(0),
            _pad0: 0,
            submit_head: AtomicU32::new(0),
            submit_tail: AtomicU32::new(0),
            submit_capacity: queue_capacity,
            submit_offset,
            free_head: AtomicU32::new(0),
            free_tail: AtomicU32::new(0),
            free_capacity: queue_capacity,
            free_offset,
            ring_table_offset,
            marked_event_seen: AtomicU32::new(0),
            events_written: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            ring_swaps: AtomicU32::new(0),
            pool_exhaustions: AtomicU32::new(0),
        });

        // Seed the free queue with every ring except the active one.
        let lane = Lane::new(&*this, base);
        for idx in 1..ring_count {
            let pushed = lane.return_ring(idx);
            debug_assert!(pushed, "free queue must hold ring_count - 1 entries");
        }
    }
}

/// Accessor binding a [`LaneShared`] to the arena base it lives in.
///
/// Cheap to construct; producers and the drain build one per operation
/// (or cache one per thread) rather than storing absolute pointers in
/// shared memory.
#[derive(Clone, Copy)]
pub struct Lane<'a> {
    shared: &'a LaneShared,
    base: *mut u8,
}

impl<'a> Lane<'a> {
    /// Binds lane state to the mapping it was carved from.
    pub fn new(shared: &'a LaneShared, base: *mut u8) -> Self {
        Self { shared, base }
    }

    /// The shared lane state.
    #[inline]
    pub fn shared(&self) -> &'a LaneShared {
        self.shared
    }

    #[inline]
    fn queue_slot(&self, offset: u32, pos: u32, capacity: u32) -> *mut u32 {
        // SAFETY: offsets were produced by the arena layout; pos is taken
        // modulo capacity by the callers.
        unsafe {
            self.base
                .add(offset as usize)
                .cast::<u32>()
                .add((pos % capacity) as usize)
        }
    }

    fn queue_push(
        &self,
        offset: u32,
        capacity: u32,
        head: &AtomicU32,
        tail: &AtomicU32,
        value: u32,
    ) -> bool {
        if capacity < 2 {
            return false;
        }
        let t = tail.load(Ordering::Relaxed);
        let next = (t + 1) % capacity;
        if next == head.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: slot t is not visible to the consumer until the Release
        // store below; only this side writes the tail cursor.
        unsafe {
            *self.queue_slot(offset, t, capacity) = value;
        }
        tail.store(next, Ordering::Release);
        true
    }

    fn queue_pop(
        &self,
        offset: u32,
        capacity: u32,
        head: &AtomicU32,
        tail: &AtomicU32,
    ) -> Option<u32> {
        if capacity < 2 {
            return None;
        }
        let h = head.load(Ordering::Relaxed);
        if h == tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: slot h was published by the peer's Release store on tail.
        let value = unsafe { *self.queue_slot(offset, h, capacity) };
        head.store((h + 1) % capacity, Ordering::Release);
        Some(value)
    }

    fn queue_depth(head: &AtomicU32, tail: &AtomicU32, capacity: u32) -> u32 {
        if capacity == 0 {
            return 0;
        }
        let h = head.load(Ordering::Acquire);
        let t = tail.load(Ordering::Acquire);
        if t >= h {
            t - h
        } else {
            capacity - (h - t)
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// Pops a reusable ring index off the free queue.
    pub fn get_free_ring(&self) -> Option<u32> {
        let idx = self.queue_pop(
            self.shared.free_offset,
            self.shared.free_capacity,
            &self.shared.free_head,
            &self.shared.free_tail,
        )?;
        debug_assert_ring_index!(idx, self.shared.ring_count);
        Some(idx)
    }

    /// Pushes a full ring index onto the submit queue for the drain.
    ///
    /// A full submit queue means the ring is effectively lost (the caller
    /// counts it); that is the backstop, not normal operation.
    pub fn submit_ring(&self, idx: u32) -> bool {
        debug_assert_ring_index!(idx, self.shared.ring_count);
        self.queue_push(
            self.shared.submit_offset,
            self.shared.submit_capacity,
            &self.shared.submit_head,
            &self.shared.submit_tail,
            idx,
        )
    }

    /// Sets the flight-recorder trigger flag.
    pub fn mark_event(&self) {
        self.shared.marked_event_seen.store(1, Ordering::Release);
    }

    /// Reads the trigger flag without clearing it.
    pub fn has_marked_event(&self) -> bool {
        self.shared.marked_event_seen.load(Ordering::Acquire) != 0
    }

    /// Consumes the trigger flag (drain side).
    pub fn take_marked_event(&self) -> bool {
        self.shared.marked_event_seen.swap(0, Ordering::AcqRel) != 0
    }

    // ---------------------------------------------------------------------
    // DRAIN SIDE
    // ---------------------------------------------------------------------

    /// Pops the oldest submitted ring index, if any.
    pub fn take_ring(&self) -> Option<u32> {
        let idx = self.queue_pop(
            self.shared.submit_offset,
            self.shared.submit_capacity,
            &self.shared.submit_head,
            &self.shared.submit_tail,
        )?;
        debug_assert_ring_index!(idx, self.shared.ring_count);
        Some(idx)
    }

    /// Returns a drained ring index to the free queue.
    pub fn return_ring(&self, idx: u32) -> bool {
        debug_assert_ring_index!(idx, self.shared.ring_count);
        self.queue_push(
            self.shared.free_offset,
            self.shared.free_capacity,
            &self.shared.free_head,
            &self.shared.free_tail,
            idx,
        )
    }

    // ---------------------------------------------------------------------
    // GEOMETRY
    // ---------------------------------------------------------------------

    /// Number of indices waiting on the submit queue.
    pub fn submit_depth(&self) -> u32 {
        Self::queue_depth(
            &self.shared.submit_head,
            &self.shared.submit_tail,
            self.shared.submit_capacity,
        )
    }

    /// Number of indices waiting on the free queue.
    pub fn free_depth(&self) -> u32 {
        Self::queue_depth(
            &self.shared.free_head,
            &self.shared.free_tail,
            self.shared.free_capacity,
        )
    }

    /// The descriptor of ring `idx`.
    pub fn ring_desc(&self, idx: u32) -> Option<RingDesc> {
        if idx >= self.shared.ring_count {
            return None;
        }
        // SAFETY: the descriptor table was written by the arena layout and
        // is immutable afterwards.
        let desc = unsafe {
            *self
                .base
                .add(self.shared.ring_table_offset as usize)
                .cast::<RingDesc>()
                .add(idx as usize)
        };
        Some(desc)
    }

    /// Attaches a view over ring `idx`.
    pub fn ring_view(&self, idx: u32) -> Option<RingView> {
        let desc = self.ring_desc(idx)?;
        if (desc.bytes as usize) < RING_HEADER_SIZE {
            return None;
        }
        // SAFETY: the descriptor addresses an initialized ring inside the
        // mapped arena.
        unsafe { RingView::attach(self.base.add(desc.offset as usize), desc.bytes as usize) }
    }

    /// View over the currently active ring.
    pub fn active_ring(&self) -> Option<RingView> {
        self.ring_view(self.shared.active_idx.load(Ordering::Acquire))
    }

    /// Atomically installs a new active ring, returning the previous index.
    pub fn exchange_active(&self, new_idx: u32) -> u32 {
        debug_assert_ring_index!(new_idx, self.shared.ring_count);
        self.shared.active_idx.swap(new_idx, Ordering::AcqRel)
    }
}
