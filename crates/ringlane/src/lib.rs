//! ADA RingLane - Per-Thread Ring Pools for the ADA Tracing Backend
//!
//! The event-pipeline core: every traced thread owns two *lanes* (index and
//! detail), each a pool of SPSC ring buffers rotated between the producing
//! thread and the single drain. All state lives inside one offset-addressed
//! arena so producers and the drain can share it across an address-space
//! boundary.
//!
//! # Key Properties
//!
//! - Non-blocking producer path: ring writes, ring swaps and eviction never
//!   take a lock or make a system call
//! - Bounded loss: overflow drops the oldest events and counts every drop
//! - Offset addressing: no absolute pointers inside the arena, so any
//!   mapping (same process or another) can materialize views over it
//!
//! # Example
//!
//! ```
//! use ada_ringlane::{ArenaConfig, LaneKind, RingPool, ThreadRegistry};
//!
//! let registry = ThreadRegistry::create_in_process(&ArenaConfig::default()).unwrap();
//! let slot = registry.register_thread(0x1234).unwrap();
//! let mut pool = RingPool::new(&slot, LaneKind::Index);
//!
//! // Producer side: write fixed-size records into the active ring.
//! assert!(pool.write_event(&[0u8; 32]));
//!
//! // Drain side: swap the active ring out and consume it.
//! pool.swap_active().unwrap();
//! let lane = slot.index_lane();
//! let idx = lane.take_ring().unwrap();
//! let ring = lane.ring_view(idx).unwrap();
//! let mut buf = [0u8; 32];
//! assert!(ring.read(&mut buf));
//! lane.return_ring(idx);
//! ```

mod backpressure;
mod control;
mod invariants;
mod lane;
mod layout;
mod metrics;
mod pool;
mod rate;
mod registry;
mod ring;
mod shm;
mod shmdir;

pub use backpressure::BackpressureState;
pub use control::{ControlBlock, FlightState, ProcessState, CONTROL_BLOCK_SIZE, CONTROL_MAGIC};
pub use lane::{Lane, LaneKind, LaneShared, RingDesc};
pub use layout::{ArenaConfig, LayoutError};
pub use metrics::{
    now_ns, RateSample, RateState, SwapToken, ThreadMetricsShared, ThreadMetricsSnapshot,
    RATE_HISTORY, RATE_WINDOW_NS,
};
pub use pool::RingPool;
pub use rate::{rate_sample, RateResult};
pub use registry::{
    RegistryHeader, ThreadRegistry, ThreadSlot, ThreadSlotShared, REGISTRY_MAGIC, REGISTRY_VERSION,
};
pub use ring::{RingBuffer, RingHeader, RingView, RING_HEADER_SIZE, RING_MAGIC};
#[cfg(unix)]
pub use shm::SharedMemory;
pub use shm::{shm_name, ShmError, ShmRole};
#[cfg(unix)]
pub use shmdir::MappedBases;
pub use shmdir::{
    ShmDirEntry, ShmDirectory, SHM_DIR_MAX_ENTRIES, SHM_DIR_NAME_LEN, SHM_DIR_REGISTRY_SLOT,
    SHM_DIR_SCHEMA_VERSION,
};
