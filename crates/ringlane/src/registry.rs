use crate::invariants::debug_assert_slot_index;
use crate::lane::{Lane, LaneShared};
use crate::layout::{ArenaConfig, ArenaPlan, LayoutError};
use crate::metrics::ThreadMetricsShared;
use crate::ring::RingView;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Magic identifying an initialized registry arena (`"ARG2"` little-endian).
pub const REGISTRY_MAGIC: u32 = 0x3247_5241;

/// Arena schema version.
pub const REGISTRY_VERSION: u32 = 2;

/// Registry header at offset 0 of the arena.
#[repr(C, align(64))]
pub struct RegistryHeader {
    pub magic: u32,
    pub version: u32,
    /// Fixed slot capacity; never changes after init.
    pub capacity: u32,
    _pad0: u32,
    /// Claimed slot count; only grows.
    pub thread_count: AtomicU32,
    /// Cleared when the session stops taking new threads.
    pub accepting_registrations: AtomicU32,
    /// Set once at shutdown; the drain observes it each pass.
    pub shutdown_requested: AtomicU32,
    _pad1: u32,
    /// Total arena length the initializer sized for.
    pub arena_len: u64,
    /// Offset of the slot array from the arena base.
    pub slots_offset: u64,
    /// Stride between consecutive slots.
    pub slot_stride: u64,
    _pad2: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<RegistryHeader>() == 64);

/// Shared-memory state of one thread slot.
///
/// Created once at arena init; a thread claims it at registration and only
/// the `active` flag ever transitions back. Storage is never reclaimed
/// before registry teardown, so raw views handed to the drain stay valid.
#[repr(C, align(64))]
pub struct ThreadSlotShared {
    pub thread_id: AtomicU64,
    pub active: AtomicU32,
    pub slot_index: u32,
    pub events_generated: AtomicU64,
    pub last_event_timestamp: AtomicU64,
    _pad: [u8; 32],
    pub index_lane: LaneShared,
    pub detail_lane: LaneShared,
    pub metrics: ThreadMetricsShared,
}

/// Accessor binding a slot to the mapping it lives in.
#[derive(Clone, Copy)]
pub struct ThreadSlot<'a> {
    shared: &'a ThreadSlotShared,
    base: *mut u8,
}

impl<'a> ThreadSlot<'a> {
    #[inline]
    pub fn shared(&self) -> &'a ThreadSlotShared {
        self.shared
    }

    #[inline]
    pub fn thread_id(&self) -> u64 {
        self.shared.thread_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn slot_index(&self) -> u32 {
        self.shared.slot_index
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire) != 0
    }

    /// Marks the slot inactive; storage is retained until teardown.
    pub fn deactivate(&self) {
        self.shared.active.store(0, Ordering::Release);
    }

    #[inline]
    pub fn index_lane(&self) -> Lane<'a> {
        Lane::new(&self.shared.index_lane, self.base)
    }

    #[inline]
    pub fn detail_lane(&self) -> Lane<'a> {
        Lane::new(&self.shared.detail_lane, self.base)
    }

    #[inline]
    pub fn metrics(&self) -> &'a ThreadMetricsShared {
        &self.shared.metrics
    }

    /// Per-slot event counter used by lifecycle diagnostics.
    #[inline]
    pub fn record_event_generated(&self, timestamp_ns: u64) {
        self.shared.events_generated.fetch_add(1, Ordering::Relaxed);
        self.shared
            .last_event_timestamp
            .store(timestamp_ns, Ordering::Relaxed);
    }

    /// View over the active ring of the given lane kind.
    pub fn active_ring(&self, detail: bool) -> Option<RingView> {
        if detail {
            self.detail_lane().active_ring()
        } else {
            self.index_lane().active_ring()
        }
    }

    /// The arena base this slot was resolved against.
    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }
}

struct OwnedRegion {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        // SAFETY: allocated with this exact layout in `create_in_process`.
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

/// The thread registry: a fixed-capacity table of thread lane sets inside
/// one offset-addressed arena.
///
/// A registry value is a *binding* of the arena to one mapping. The
/// initializing side usually owns the region (in-process arena or the
/// creating end of a shared segment); attachers borrow it.
pub struct ThreadRegistry {
    base: *mut u8,
    len: usize,
    owned: Option<OwnedRegion>,
}

// SAFETY: all shared mutation goes through atomics; slot claim is CAS-based;
// ring and queue storage follow the SPSC single-writer discipline.
unsafe impl Send for ThreadRegistry {}
unsafe impl Sync for ThreadRegistry {}

impl ThreadRegistry {
    /// Allocates a heap arena and initializes it.
    ///
    /// This is the same-process path: producer and drain share the arena
    /// through this object instead of a shared-memory mapping.
    pub fn create_in_process(cfg: &ArenaConfig) -> Result<Self, LayoutError> {
        cfg.validate()?;
        let plan = Self::plan(cfg);
        let layout = std::alloc::Layout::from_size_align(plan.total_len, 64)
            .map_err(|_| LayoutError::BadGeometry("arena length overflow"))?;
        // SAFETY: layout has non-zero size (validated geometry).
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(LayoutError::ArenaTooSmall {
                needed: plan.total_len,
                have: 0,
            });
        }
        let owned = OwnedRegion { ptr, layout };
        // SAFETY: freshly allocated zeroed region of plan.total_len bytes.
        let mut reg = unsafe { Self::init_in_place(ptr, plan.total_len, cfg)? };
        reg.owned = Some(owned);
        Ok(reg)
    }

    /// Initializes a registry arena inside a caller-provided region
    /// (typically the REGISTRY shared-memory segment) and binds to it.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes, 64-byte
    /// aligned, zero-filled, not concurrently accessed during init, and must
    /// stay mapped for the registry's lifetime.
    pub unsafe fn init_in_place(
        base: *mut u8,
        len: usize,
        cfg: &ArenaConfig,
    ) -> Result<Self, LayoutError> {
        cfg.validate()?;
        let plan = Self::plan(cfg);
        if plan.total_len > len {
            return Err(LayoutError::ArenaTooSmall {
                needed: plan.total_len,
                have: len,
            });
        }
        // Queue and table offsets are stored as u32 inside LaneShared.
        if plan.total_len > u32::MAX as usize {
            return Err(LayoutError::BadGeometry("arena exceeds 4 GiB offset space"));
        }

        let header = base.cast::<RegistryHeader>();
        header.write(RegistryHeader {
            magic: REGISTRY_MAGIC,
            version: REGISTRY_VERSION,
            capacity: cfg.max_threads,
            _pad0: 0,
            thread_count: AtomicU32::new(0),
            accepting_registrations: AtomicU32::new(1),
            shutdown_requested: AtomicU32::new(0),
            _pad1: 0,
            arena_len: plan.total_len as u64,
            slots_offset: plan.slots_offset as u64,
            slot_stride: plan.slot_stride as u64,
            _pad2: [0; 8],
        });

        for (i, extents) in plan.slots.iter().enumerate() {
            let slot = base
                .add(plan.slots_offset + i * plan.slot_stride)
                .cast::<ThreadSlotShared>();

            addr_of_mut!((*slot).thread_id).write(AtomicU64::new(0));
            addr_of_mut!((*slot).active).write(AtomicU32::new(0));
            addr_of_mut!((*slot).slot_index).write(i as u32);
            addr_of_mut!((*slot).events_generated).write(AtomicU64::new(0));
            addr_of_mut!((*slot).last_event_timestamp).write(AtomicU64::new(0));
            addr_of_mut!((*slot)._pad).write([0; 32]);

            for (lane_ptr, lane_ext, ring_bytes, slot_size, queue_depth) in [
                (
                    addr_of_mut!((*slot).index_lane),
                    &extents.index,
                    cfg.index_ring_bytes,
                    cfg.index_slot_size,
                    cfg.index_queue_depth,
                ),
                (
                    addr_of_mut!((*slot).detail_lane),
                    &extents.detail,
                    cfg.detail_ring_bytes,
                    cfg.detail_slot_size,
                    cfg.detail_queue_depth,
                ),
            ] {
                // Ring descriptor table first, then the rings themselves.
                let table = base.add(lane_ext.table_offset as usize).cast::<crate::lane::RingDesc>();
                for (r, desc) in lane_ext.rings.iter().enumerate() {
                    table.add(r).write(*desc);
                    let inited =
                        RingView::init(base.add(desc.offset as usize), ring_bytes as usize, slot_size);
                    debug_assert!(inited.is_some(), "validated geometry must carve a ring");
                }

                LaneShared::init(
                    lane_ptr,
                    base,
                    lane_ext.rings.len() as u32,
                    slot_size,
                    queue_depth,
                    lane_ext.submit_offset,
                    lane_ext.free_offset,
                    lane_ext.table_offset,
                );
            }

            ThreadMetricsShared::init(addr_of_mut!((*slot).metrics), 0, i as u32);
        }

        Ok(Self {
            base,
            len,
            owned: None,
        })
    }

    /// Binds to an arena initialized elsewhere (other process or mapping).
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped region of at least `len` bytes that an
    /// initializer set up with the same schema version, and must stay mapped
    /// for the registry's lifetime.
    pub unsafe fn attach(base: *mut u8, len: usize) -> Result<Self, LayoutError> {
        if base.is_null() || len < std::mem::size_of::<RegistryHeader>() {
            return Err(LayoutError::ArenaTooSmall {
                needed: std::mem::size_of::<RegistryHeader>(),
                have: len,
            });
        }
        let header = &*base.cast::<RegistryHeader>();
        if header.magic != REGISTRY_MAGIC {
            return Err(LayoutError::BadMagic);
        }
        if header.version != REGISTRY_VERSION {
            return Err(LayoutError::BadVersion {
                found: header.version,
            });
        }
        if header.arena_len as usize > len {
            return Err(LayoutError::ArenaTooSmall {
                needed: header.arena_len as usize,
                have: len,
            });
        }
        Ok(Self {
            base,
            len,
            owned: None,
        })
    }

    fn plan(cfg: &ArenaConfig) -> ArenaPlan {
        ArenaPlan::compute(
            cfg,
            std::mem::size_of::<RegistryHeader>(),
            std::mem::size_of::<ThreadSlotShared>(),
        )
    }

    /// Total bytes an arena for `cfg` requires.
    pub fn required_len(cfg: &ArenaConfig) -> Result<usize, LayoutError> {
        cfg.validate()?;
        Ok(Self::plan(cfg).total_len)
    }

    #[inline]
    fn header(&self) -> &RegistryHeader {
        // SAFETY: constructor contracts guarantee the header stays mapped.
        unsafe { &*self.base.cast::<RegistryHeader>() }
    }

    /// Arena base pointer; the pool base all ring offsets resolve against.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Mapped arena length.
    #[inline]
    pub fn arena_len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    /// Number of claimed slots; only grows.
    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.header().thread_count.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.header().accepting_registrations.load(Ordering::Acquire) != 0
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.header()
            .accepting_registrations
            .store(u32::from(accepting), Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.header().shutdown_requested.load(Ordering::Acquire) != 0
    }

    pub fn request_shutdown(&self) {
        self.header().shutdown_requested.store(1, Ordering::Release);
    }

    fn slot_at(&self, index: u32) -> ThreadSlot<'_> {
        let h = self.header();
        debug_assert_slot_index!(index, h.capacity);
        // SAFETY: index is bounded by capacity; the slot array was
        // initialized in full at arena init.
        let shared = unsafe {
            &*self
                .base
                .add(h.slots_offset as usize + index as usize * h.slot_stride as usize)
                .cast::<ThreadSlotShared>()
        };
        ThreadSlot {
            shared,
            base: self.base,
        }
    }

    /// Slot accessor for enumeration (the drain and the metrics collector).
    /// Callers filter on [`ThreadSlot::is_active`].
    pub fn thread_at(&self, index: u32) -> Option<ThreadSlot<'_>> {
        if index >= self.capacity() {
            return None;
        }
        Some(self.slot_at(index))
    }

    /// Finds the active slot registered for `thread_id`.
    ///
    /// Linear over claimed slots; producers cache the result in TLS so this
    /// runs once per thread in practice.
    pub fn lookup(&self, thread_id: u64) -> Option<ThreadSlot<'_>> {
        let count = self.thread_count().min(self.capacity());
        for i in 0..count {
            let slot = self.slot_at(i);
            if slot.is_active() && slot.thread_id() == thread_id {
                return Some(slot);
            }
        }
        None
    }

    /// Registers `thread_id`, claiming a fresh slot via CAS on the count.
    ///
    /// Re-registering a live thread returns its existing slot. Returns
    /// `None` at capacity or when registrations are closed - the producer
    /// must silently degrade.
    pub fn register_thread(&self, thread_id: u64) -> Option<ThreadSlot<'_>> {
        let h = self.header();
        if !self.is_accepting() || self.shutdown_requested() {
            return None;
        }

        if let Some(existing) = self.lookup(thread_id) {
            return Some(existing);
        }

        let mut count = h.thread_count.load(Ordering::Acquire);
        let claimed = loop {
            if count >= h.capacity {
                log::debug!(
                    "registry at capacity ({}); thread {thread_id:#x} degrades to no-op",
                    h.capacity
                );
                return None;
            }
            match h.thread_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break count,
                Err(observed) => count = observed,
            }
        };

        let slot = self.slot_at(claimed);
        slot.shared.thread_id.store(thread_id, Ordering::Relaxed);
        slot.shared.metrics.reset(thread_id, claimed);
        slot.shared.active.store(1, Ordering::Release);
        log::debug!("registered thread {thread_id:#x} in slot {claimed}");
        Some(slot)
    }

    /// Deactivates the slot registered for `thread_id`, if any.
    pub fn unregister_thread(&self, thread_id: u64) {
        if let Some(slot) = self.lookup(thread_id) {
            slot.deactivate();
        }
    }
}
