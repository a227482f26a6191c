//! Debug assertion macros for ring, lane and registry invariants.
//!
//! Active only in debug builds (`debug_assert!`), so there is zero overhead
//! in release builds. Used across `ring`, `lane`, `layout` and `pool`.

// =============================================================================
// INV-RING-01: Power-of-two capacity
// =============================================================================

/// Assert that a ring capacity is a power of two.
///
/// **Invariant**: `capacity.is_power_of_two()`
macro_rules! debug_assert_pow2 {
    ($capacity:expr) => {
        debug_assert!(
            ($capacity as u32).is_power_of_two(),
            "ring capacity {} is not a power of two",
            $capacity
        )
    };
}

// =============================================================================
// INV-RING-02: Bounded live count
// =============================================================================

/// Assert that the live slot count never reaches capacity.
///
/// **Invariant**: `live(R) <= capacity(R) - 1` (one slot is the sentinel)
macro_rules! debug_assert_live_bounded {
    ($live:expr, $capacity:expr) => {
        debug_assert!(
            $live <= $capacity - 1,
            "live count {} exceeds usable capacity {}",
            $live,
            $capacity - 1
        )
    };
}

// =============================================================================
// INV-LANE-01: Ring index validity
// =============================================================================

/// Assert that a ring index handed through a lane queue is in range.
///
/// **Invariant**: every queued index addresses a ring of this lane
macro_rules! debug_assert_ring_index {
    ($idx:expr, $ring_count:expr) => {
        debug_assert!(
            $idx < $ring_count,
            "ring index {} out of range (lane has {} rings)",
            $idx,
            $ring_count
        )
    };
}

// =============================================================================
// INV-REG-01: Slot index validity
// =============================================================================

/// Assert that a registry slot index is within the fixed capacity.
macro_rules! debug_assert_slot_index {
    ($idx:expr, $capacity:expr) => {
        debug_assert!(
            $idx < $capacity,
            "slot index {} out of range (registry capacity {})",
            $idx,
            $capacity
        )
    };
}

pub(crate) use debug_assert_live_bounded;
pub(crate) use debug_assert_pow2;
pub(crate) use debug_assert_ring_index;
pub(crate) use debug_assert_slot_index;
