use crate::lane::RingDesc;
use crate::ring::{floor_pow2, RING_HEADER_SIZE};
use thiserror::Error;

/// Geometry of the registry arena.
///
/// Defaults follow the production tuning: 64 thread slots, 4 x 64 KiB index
/// rings and 2 x 256 KiB detail rings per thread, submit/free queue depths
/// of 1024 (index) and 256 (detail).
#[derive(Debug, Clone, Copy)]
pub struct ArenaConfig {
    /// Fixed number of thread slots.
    pub max_threads: u32,
    /// Rings per index lane.
    pub index_rings: u32,
    /// Region bytes per index ring (header + slots).
    pub index_ring_bytes: u32,
    /// Slot size of index rings (one on-disk index event).
    pub index_slot_size: u32,
    /// Submit/free queue capacity for index lanes.
    pub index_queue_depth: u32,
    /// Rings per detail lane.
    pub detail_rings: u32,
    /// Region bytes per detail ring.
    pub detail_ring_bytes: u32,
    /// Slot size of detail rings (one in-ring detail record).
    pub detail_slot_size: u32,
    /// Submit/free queue capacity for detail lanes.
    pub detail_queue_depth: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            max_threads: 64,
            index_rings: 4,
            index_ring_bytes: 64 * 1024,
            index_slot_size: 32,
            index_queue_depth: 1024,
            detail_rings: 2,
            detail_ring_bytes: 256 * 1024,
            // Matches the in-ring detail record carried by the detail lane.
            detail_slot_size: 512,
            detail_queue_depth: 256,
        }
    }
}

/// Arena sizing or validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid arena geometry: {0}")]
    BadGeometry(&'static str),
    #[error("arena region too small: need {needed} bytes, have {have}")]
    ArenaTooSmall { needed: usize, have: usize },
    #[error("arena magic mismatch (not an initialized registry)")]
    BadMagic,
    #[error("arena schema version mismatch (found {found})")]
    BadVersion { found: u32 },
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.max_threads == 0 {
            return Err(LayoutError::BadGeometry("max_threads must be non-zero"));
        }
        if self.index_rings == 0 || self.detail_rings == 0 {
            return Err(LayoutError::BadGeometry("each lane needs at least one ring"));
        }
        // Sentinel slot: a queue of depth d holds d - 1 indices.
        if self.index_queue_depth <= self.index_rings {
            return Err(LayoutError::BadGeometry(
                "index queue depth must exceed ring count",
            ));
        }
        if self.detail_queue_depth <= self.detail_rings {
            return Err(LayoutError::BadGeometry(
                "detail queue depth must exceed ring count",
            ));
        }
        if self.index_slot_size == 0 || self.detail_slot_size == 0 {
            return Err(LayoutError::BadGeometry("slot sizes must be non-zero"));
        }
        let min_index = RING_HEADER_SIZE + 2 * self.index_slot_size as usize;
        let min_detail = RING_HEADER_SIZE + 2 * self.detail_slot_size as usize;
        if (self.index_ring_bytes as usize) < min_index
            || floor_pow2((self.index_ring_bytes as usize - RING_HEADER_SIZE) as u32
                / self.index_slot_size) < 2
        {
            return Err(LayoutError::BadGeometry("index ring region too small"));
        }
        if (self.detail_ring_bytes as usize) < min_detail
            || floor_pow2((self.detail_ring_bytes as usize - RING_HEADER_SIZE) as u32
                / self.detail_slot_size) < 2
        {
            return Err(LayoutError::BadGeometry("detail ring region too small"));
        }
        Ok(())
    }
}

#[inline]
pub(crate) const fn align64(x: usize) -> usize {
    (x + 63) & !63
}

/// Computed placement of one lane's out-of-struct storage.
#[derive(Debug, Clone)]
pub(crate) struct LaneExtents {
    /// Arena offset of the submit queue's `u32` array.
    pub submit_offset: u32,
    /// Arena offset of the free queue's `u32` array.
    pub free_offset: u32,
    /// Arena offset of the `[RingDesc]` table.
    pub table_offset: u32,
    /// Ring regions, in ring-index order.
    pub rings: Vec<RingDesc>,
}

/// Computed placement of one thread slot's lane storage.
#[derive(Debug, Clone)]
pub(crate) struct SlotExtents {
    pub index: LaneExtents,
    pub detail: LaneExtents,
}

/// Full arena plan: header, slot array, then per-slot extents.
///
/// Everything after the slot array is addressed by byte offsets from the
/// arena base so the arena relocates freely between mappings.
#[derive(Debug)]
pub(crate) struct ArenaPlan {
    pub total_len: usize,
    pub slots_offset: usize,
    pub slot_stride: usize,
    pub slots: Vec<SlotExtents>,
}

impl ArenaPlan {
    pub fn compute(cfg: &ArenaConfig, header_len: usize, slot_len: usize) -> ArenaPlan {
        let slots_offset = align64(header_len);
        let slot_stride = align64(slot_len);
        let mut cursor = slots_offset + slot_stride * cfg.max_threads as usize;

        let mut carve = |bytes: usize| -> usize {
            let at = align64(cursor);
            cursor = at + bytes;
            at
        };

        let mut lane_extents = |rings: u32, ring_bytes: u32, queue_depth: u32| -> LaneExtents {
            let submit_offset = carve(queue_depth as usize * 4) as u32;
            let free_offset = carve(queue_depth as usize * 4) as u32;
            let table_offset = carve(rings as usize * std::mem::size_of::<RingDesc>()) as u32;
            let rings = (0..rings)
                .map(|_| RingDesc {
                    offset: carve(ring_bytes as usize) as u64,
                    bytes: u64::from(ring_bytes),
                })
                .collect();
            LaneExtents {
                submit_offset,
                free_offset,
                table_offset,
                rings,
            }
        };

        let slots = (0..cfg.max_threads)
            .map(|_| SlotExtents {
                index: lane_extents(cfg.index_rings, cfg.index_ring_bytes, cfg.index_queue_depth),
                detail: lane_extents(
                    cfg.detail_rings,
                    cfg.detail_ring_bytes,
                    cfg.detail_queue_depth,
                ),
            })
            .collect();

        ArenaPlan {
            total_len: align64(cursor),
            slots_offset,
            slot_stride,
            slots,
        }
    }
}
