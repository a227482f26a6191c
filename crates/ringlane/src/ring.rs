use crate::invariants::{debug_assert_live_bounded, debug_assert_pow2};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This SPSC ring buffer lives in a raw byte region (heap or shared memory) so
// that both sides of an address-space boundary can operate on it. The header
// layout below is part of the cross-process contract and never changes shape.
//
// ## Cursor Protocol
//
// `write_pos` and `read_pos` advance modulo `capacity`. One slot is reserved
// as a sentinel so that full (`(write+1) & mask == read`) is distinguishable
// from empty (`write == read`). `capacity` is always a power of two.
//
// **Producer (write path):**
// 1. Load `write_pos` with Relaxed (only producer writes it)
// 2. Load `read_pos` with Acquire (synchronizes with the drain's Release)
// 3. If full: bump `overflow_count` (Relaxed, advisory) and fail
// 4. Copy the slot bytes (no ordering needed - protected by protocol)
// 5. Store `write_pos` with Release (publishes the slot to the drain)
//
// **Consumer (read path):**
// 1. Load `read_pos` with Relaxed (only drain writes it)
// 2. Load `write_pos` with Acquire (synchronizes with the producer's Release)
// 3. If empty: fail
// 4. Copy the slot bytes out
// 5. Store `read_pos` with Release (returns the slot to the producer)
//
// ## Single-Writer Invariants
//
// - `write_pos`: written only by the owning producer thread
// - `read_pos`: written only by the drain
// - `slot[i]`: written by the producer between full-check and publish,
//   read by the drain between observe and advance
//
// These invariants are enforced by the lane discipline: every ring is owned
// by exactly one thread slot, and the drain is the single consumer.
//
// =============================================================================

/// Magic value stored in every ring header (`"ARB2"` little-endian).
pub const RING_MAGIC: u32 = 0x3242_5241;

/// Byte size of [`RingHeader`]; slot 0 starts at this offset.
pub const RING_HEADER_SIZE: usize = 64;

/// Ring buffer header at the start of every ring region.
///
/// The header is followed by `capacity * slot_size` bytes of slot storage.
/// All cross-mapping references address the ring by the *region offset* of
/// this header, never by pointer.
#[repr(C)]
pub struct RingHeader {
    /// Identifies an initialized ring ([`RING_MAGIC`]).
    pub magic: u32,
    /// Fixed slot size in bytes.
    pub slot_size: u32,
    /// Slot count; always a power of two, one slot reserved as sentinel.
    pub capacity: u32,
    _reserved: u32,
    /// Producer cursor, advances modulo `capacity`.
    pub write_pos: AtomicU32,
    /// Consumer cursor, advances modulo `capacity`.
    pub read_pos: AtomicU32,
    /// Failed write attempts; monotone, advisory (Relaxed).
    pub overflow_count: AtomicU64,
    _pad: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == RING_HEADER_SIZE);

/// Largest power of two `<= x`, or 0 for `x == 0`.
#[inline]
pub(crate) const fn floor_pow2(x: u32) -> u32 {
    if x == 0 {
        0
    } else {
        1 << (31 - x.leading_zeros())
    }
}

/// Borrowed view over a ring region.
///
/// A `RingView` is how every component touches ring storage: the producer
/// resolves it from the lane's active index, the drain from a submitted
/// index. It never owns the region. Copy is deliberate - the view is two
/// words and producers re-resolve it after every swap.
#[derive(Clone, Copy)]
pub struct RingView {
    header: *mut RingHeader,
}

// SAFETY: all mutation goes through the header's atomics or through slots
// guarded by the SPSC cursor protocol documented above.
unsafe impl Send for RingView {}

impl RingView {
    /// Initializes a ring inside `region` and returns a view over it.
    ///
    /// Carves as many power-of-two slots as fit after the header. Returns
    /// `None` when the region cannot hold a header plus two slots (one live,
    /// one sentinel).
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes of `region_len` bytes,
    /// 8-byte aligned, and not concurrently accessed during initialization.
    pub unsafe fn init(region: *mut u8, region_len: usize, slot_size: u32) -> Option<Self> {
        if region.is_null() || slot_size == 0 || region_len <= RING_HEADER_SIZE {
            return None;
        }
        let raw_slots = ((region_len - RING_HEADER_SIZE) / slot_size as usize) as u32;
        let capacity = floor_pow2(raw_slots);
        if capacity < 2 {
            return None;
        }
        debug_assert_pow2!(capacity);

        let header = region.cast::<RingHeader>();
        header.write(RingHeader {
            magic: RING_MAGIC,
            slot_size,
            capacity,
            _reserved: 0,
            write_pos: AtomicU32::new(0),
            read_pos: AtomicU32::new(0),
            overflow_count: AtomicU64::new(0),
            _pad: [0; 32],
        });
        Some(Self { header })
    }

    /// Attaches to an already-initialized ring without re-initializing it.
    ///
    /// Validates the magic and that the declared geometry fits the region.
    ///
    /// # Safety
    ///
    /// `region` must point to a ring previously set up by [`RingView::init`]
    /// (possibly in another process) and stay mapped for the view's lifetime.
    pub unsafe fn attach(region: *mut u8, region_len: usize) -> Option<Self> {
        if region.is_null() || region_len < RING_HEADER_SIZE {
            return None;
        }
        let header = region.cast::<RingHeader>();
        let h = &*header;
        if h.magic != RING_MAGIC || h.slot_size == 0 {
            return None;
        }
        if !h.capacity.is_power_of_two() {
            return None;
        }
        let needed = RING_HEADER_SIZE + h.capacity as usize * h.slot_size as usize;
        if needed > region_len {
            return None;
        }
        Some(Self { header })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: constructor contracts guarantee the header stays mapped.
        unsafe { &*self.header }
    }

    #[inline]
    fn slot_ptr(&self, pos: u32) -> *mut u8 {
        let h = self.header();
        let idx = (pos & (h.capacity - 1)) as usize;
        // SAFETY: idx is masked to capacity; the region holds capacity slots.
        unsafe {
            self.header
                .cast::<u8>()
                .add(RING_HEADER_SIZE + idx * h.slot_size as usize)
        }
    }

    /// Fixed slot size in bytes.
    #[inline]
    pub fn slot_size(&self) -> u32 {
        self.header().slot_size
    }

    /// Slot capacity (power of two; usable capacity is one less).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    /// Number of slots currently readable.
    #[inline]
    pub fn available_read(&self) -> u32 {
        let h = self.header();
        let w = h.write_pos.load(Ordering::Acquire);
        let r = h.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r) & (h.capacity - 1)
    }

    /// Number of slots currently writable (capacity - 1 - live).
    #[inline]
    pub fn available_write(&self) -> u32 {
        let h = self.header();
        h.capacity - 1 - self.available_read()
    }

    /// Returns true when no slots are readable.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Total failed writes since init.
    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.header().overflow_count.load(Ordering::Relaxed)
    }

    /// Copies one slot into the ring. Returns `false` on overflow.
    ///
    /// Never blocks. `elem` shorter than the slot leaves the tail bytes of
    /// the slot unspecified; longer input is truncated to the slot.
    pub fn write(&self, elem: &[u8]) -> bool {
        let h = self.header();
        let mask = h.capacity - 1;
        let w = h.write_pos.load(Ordering::Relaxed);
        let r = h.read_pos.load(Ordering::Acquire);

        if w.wrapping_add(1) & mask == r & mask {
            h.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let n = elem.len().min(h.slot_size as usize);
        // SAFETY: the slot at `w` is outside [read, write) and therefore not
        // observed by the consumer until the Release store below.
        unsafe {
            std::ptr::copy_nonoverlapping(elem.as_ptr(), self.slot_ptr(w), n);
        }
        h.write_pos
            .store(w.wrapping_add(1) & mask, Ordering::Release);

        debug_assert_live_bounded!(self.available_read(), h.capacity);
        true
    }

    /// Copies one slot out of the ring. Returns `false` when empty.
    pub fn read(&self, out: &mut [u8]) -> bool {
        let h = self.header();
        let mask = h.capacity - 1;
        let r = h.read_pos.load(Ordering::Relaxed);
        let w = h.write_pos.load(Ordering::Acquire);

        if r & mask == w & mask {
            return false;
        }

        let n = out.len().min(h.slot_size as usize);
        // SAFETY: the slot at `r` is inside [read, write): fully written and
        // published by the producer's Release store.
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot_ptr(r), out.as_mut_ptr(), n);
        }
        h.read_pos.store(r.wrapping_add(1) & mask, Ordering::Release);
        true
    }

    /// Drains up to `max_slots` into `out`, returning the number copied.
    ///
    /// `out` must hold `max_slots * slot_size` bytes; shorter buffers bound
    /// the batch. A single Release store publishes the whole batch.
    pub fn read_batch(&self, out: &mut [u8], max_slots: u32) -> u32 {
        let h = self.header();
        let slot = h.slot_size as usize;
        if slot == 0 {
            return 0;
        }
        let mask = h.capacity - 1;
        let r = h.read_pos.load(Ordering::Relaxed);
        let w = h.write_pos.load(Ordering::Acquire);

        let avail = w.wrapping_sub(r) & mask;
        let fits = (out.len() / slot) as u32;
        let n = avail.min(max_slots).min(fits);
        if n == 0 {
            return 0;
        }

        for i in 0..n {
            // SAFETY: every slot in [r, r+n) is inside [read, write).
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.slot_ptr(r.wrapping_add(i)),
                    out.as_mut_ptr().add(i as usize * slot),
                    slot,
                );
            }
        }

        h.read_pos.store(r.wrapping_add(n) & mask, Ordering::Release);
        n
    }

    /// Advances the read cursor one slot without copying.
    ///
    /// Used by the eviction path under pool exhaustion. Returns `false` when
    /// the ring is empty.
    pub fn drop_oldest(&self) -> bool {
        let h = self.header();
        let mask = h.capacity - 1;
        let r = h.read_pos.load(Ordering::Relaxed);
        let w = h.write_pos.load(Ordering::Acquire);
        if r & mask == w & mask {
            return false;
        }
        h.read_pos.store(r.wrapping_add(1) & mask, Ordering::Release);
        true
    }

    /// Zeros both cursors. Only safe while no peer is operating on the ring
    /// (drain-in-hand rings are quiescent by the lane discipline).
    pub fn reset(&self) {
        let h = self.header();
        h.read_pos.store(0, Ordering::Relaxed);
        h.write_pos.store(0, Ordering::Release);
    }

    /// Raw header pointer, for offset computation in arena code.
    #[inline]
    pub(crate) fn header_ptr(&self) -> *mut RingHeader {
        self.header
    }
}

/// Heap-owned ring buffer, for in-process use and tests.
///
/// Owns an aligned region and derefs to a [`RingView`]. The arena never uses
/// this type - arena rings are carved in place and reached through offsets.
pub struct RingBuffer {
    view: RingView,
    region: *mut u8,
    layout: std::alloc::Layout,
}

// SAFETY: same protocol as RingView; the owned region is freed on drop only
// after both sides are done by construction (single owner).
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocates a region of `region_len` bytes and initializes a ring in it.
    ///
    /// Returns `None` when the geometry is unusable (see [`RingView::init`]).
    pub fn new(region_len: usize, slot_size: u32) -> Option<Self> {
        let layout = std::alloc::Layout::from_size_align(region_len.max(1), 64).ok()?;
        // SAFETY: layout has non-zero size.
        let region = unsafe { std::alloc::alloc_zeroed(layout) };
        if region.is_null() {
            return None;
        }
        // SAFETY: freshly allocated, exclusively owned region.
        let view = unsafe { RingView::init(region, region_len, slot_size) };
        match view {
            Some(view) => Some(Self {
                view,
                region,
                layout,
            }),
            None => {
                // SAFETY: region came from alloc_zeroed with this layout.
                unsafe { std::alloc::dealloc(region, layout) };
                None
            }
        }
    }

    /// The view over the owned ring.
    #[inline]
    pub fn view(&self) -> RingView {
        self.view
    }
}

impl std::ops::Deref for RingBuffer {
    type Target = RingView;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: region was allocated with this exact layout in `new`.
        unsafe { std::alloc::dealloc(self.region, self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_carves_pow2_capacity() {
        let ring = RingBuffer::new(64 * 1024, 32).unwrap();
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.slot_size(), 32);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_init_rejects_tiny_region() {
        assert!(RingBuffer::new(64, 32).is_none());
        assert!(RingBuffer::new(80, 32).is_none()); // one slot = sentinel only
        assert!(RingBuffer::new(1024, 0).is_none());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let ring = RingBuffer::new(4096, 8).unwrap();
        assert!(ring.write(&42u64.to_le_bytes()));
        assert!(ring.write(&43u64.to_le_bytes()));
        assert_eq!(ring.available_read(), 2);

        let mut out = [0u8; 8];
        assert!(ring.read(&mut out));
        assert_eq!(u64::from_le_bytes(out), 42);
        assert!(ring.read(&mut out));
        assert_eq!(u64::from_le_bytes(out), 43);
        assert!(!ring.read(&mut out));
    }

    #[test]
    fn test_capacity_minus_one_writes_then_overflow() {
        let ring = RingBuffer::new(64 + 16 * 8, 8).unwrap();
        let cap = ring.capacity();
        assert_eq!(cap, 16);

        for i in 0..cap as u64 - 1 {
            assert!(ring.write(&i.to_le_bytes()), "write {i} should succeed");
        }
        // Sentinel slot: the C-th write overflows.
        assert!(!ring.write(&99u64.to_le_bytes()));
        assert_eq!(ring.overflow_count(), 1);
        assert_eq!(ring.available_read(), cap - 1);
        assert_eq!(ring.available_write(), 0);
    }

    #[test]
    fn test_overflow_storm_counts_every_attempt() {
        let ring = RingBuffer::new(64 + 8 * 8, 8).unwrap();
        let cap = ring.capacity() as u64;

        let mut ok = 0u64;
        for i in 0..10 * cap {
            if ring.write(&i.to_le_bytes()) {
                ok += 1;
            }
        }
        assert_eq!(ok, cap - 1);
        assert_eq!(ring.overflow_count(), 10 * cap - (cap - 1));
    }

    #[test]
    fn test_read_batch_drains_in_order() {
        let ring = RingBuffer::new(4096, 4).unwrap();
        for i in 0..10u32 {
            assert!(ring.write(&i.to_le_bytes()));
        }

        let mut buf = [0u8; 4 * 6];
        let n = ring.read_batch(&mut buf, 6);
        assert_eq!(n, 6);
        for i in 0..6u32 {
            let s = i as usize * 4;
            assert_eq!(u32::from_le_bytes(buf[s..s + 4].try_into().unwrap()), i);
        }
        assert_eq!(ring.available_read(), 4);

        let n = ring.read_batch(&mut buf, 32);
        assert_eq!(n, 4);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_drop_oldest_advances_without_copy() {
        let ring = RingBuffer::new(4096, 4).unwrap();
        assert!(!ring.drop_oldest());

        ring.write(&1u32.to_le_bytes());
        ring.write(&2u32.to_le_bytes());
        assert!(ring.drop_oldest());

        let mut out = [0u8; 4];
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 2);
    }

    #[test]
    fn test_reset_zeros_cursors() {
        let ring = RingBuffer::new(4096, 4).unwrap();
        for i in 0..5u32 {
            ring.write(&i.to_le_bytes());
        }
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.available_write(), ring.capacity() - 1);
    }

    #[test]
    fn test_attach_sees_existing_contents() {
        let ring = RingBuffer::new(4096, 8).unwrap();
        ring.write(&7u64.to_le_bytes());

        // SAFETY: attaching to a live region owned by `ring`.
        let attached =
            unsafe { RingView::attach(ring.header_ptr().cast::<u8>(), 4096) }.unwrap();
        assert_eq!(attached.capacity(), ring.capacity());
        assert_eq!(attached.available_read(), 1);

        let mut out = [0u8; 8];
        assert!(attached.read(&mut out));
        assert_eq!(u64::from_le_bytes(out), 7);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_attach_rejects_bad_magic() {
        let mut region = vec![0u8; 4096];
        // SAFETY: local buffer, no ring initialized in it.
        let attached = unsafe { RingView::attach(region.as_mut_ptr(), region.len()) };
        assert!(attached.is_none());
    }

    #[test]
    fn test_wraparound_preserves_fifo() {
        let ring = RingBuffer::new(64 + 8 * 4, 4).unwrap();
        let cap = ring.capacity();
        let mut next_write = 0u32;
        let mut next_read = 0u32;
        let mut out = [0u8; 4];

        // Cycle several times around the ring.
        for _ in 0..5 {
            while ring.write(&next_write.to_le_bytes()) {
                next_write += 1;
            }
            assert_eq!(ring.available_read(), cap - 1);
            while ring.read(&mut out) {
                assert_eq!(u32::from_le_bytes(out), next_read);
                next_read += 1;
            }
        }
        assert_eq!(next_read, next_write);
    }

    #[test]
    fn test_spsc_threads() {
        use std::sync::Arc;

        let ring = Arc::new(RingBuffer::new(64 + 64 * 8, 8).unwrap());
        const N: u64 = 100_000;

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut i = 0u64;
                while i < N {
                    if ring.write(&i.to_le_bytes()) {
                        i += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut seen = 0u64;
        let mut out = [0u8; 8];
        while seen < N {
            if ring.read(&mut out) {
                assert_eq!(u64::from_le_bytes(out), seen);
                seen += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
