//! The control block: the one well-known region of a session.
//!
//! Lives in the CONTROL segment whose name derives from
//! `(ShmRole::Control, host_pid, session_id)`. Carries the session state
//! machine, the lane enables the producer consults on every hook, the
//! flight-recorder roll windows, and the segment directory.

use crate::shmdir::ShmDirectory;
use std::sync::atomic::{AtomicU32, Ordering};

/// Control block magic (`"ACB2"` little-endian).
pub const CONTROL_MAGIC: u32 = 0x3242_4341;

/// Size of the CONTROL segment.
pub const CONTROL_BLOCK_SIZE: usize = 4096;

/// Session process lifecycle, driven by the controller, observed by the
/// agent.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Uninitialized = 0,
    Initialized = 1,
    Spawning = 2,
    Suspended = 3,
    Attaching = 4,
    Attached = 5,
    Running = 6,
    Detaching = 7,
    Failed = 8,
}

impl ProcessState {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Spawning,
            3 => Self::Suspended,
            4 => Self::Attaching,
            5 => Self::Attached,
            6 => Self::Running,
            7 => Self::Detaching,
            8 => Self::Failed,
            _ => return None,
        })
    }
}

/// Flight-recorder mode of the detail lane.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Idle = 0,
    Recording = 1,
}

/// Shared control state at offset 0 of the CONTROL segment.
#[repr(C)]
pub struct ControlBlock {
    pub magic: u32,
    pub version: u32,
    process_state: AtomicU32,
    flight_state: AtomicU32,
    index_lane_enabled: AtomicU32,
    detail_lane_enabled: AtomicU32,
    capture_stack_snapshot: AtomicU32,
    _pad: u32,
    pub pre_roll_ms: AtomicU32,
    pub post_roll_ms: AtomicU32,
    pub host_pid: u32,
    pub session_id: u32,
    directory: ShmDirectory,
}

const _: () = assert!(std::mem::size_of::<ControlBlock>() <= CONTROL_BLOCK_SIZE);

impl ControlBlock {
    /// Writes the controller-side defaults in place: index lane on, detail
    /// lane off, 1 s roll windows, empty directory.
    ///
    /// # Safety
    ///
    /// `this` must be valid for [`CONTROL_BLOCK_SIZE`] bytes of writes and
    /// not concurrently accessed (the agent attaches only after publish).
    pub unsafe fn init_in_place(this: *mut Self, host_pid: u32, session_id: u32) {
        this.write(Self {
            magic: CONTROL_MAGIC,
            version: 1,
            process_state: AtomicU32::new(ProcessState::Uninitialized as u32),
            flight_state: AtomicU32::new(FlightState::Idle as u32),
            index_lane_enabled: AtomicU32::new(1),
            detail_lane_enabled: AtomicU32::new(0),
            capture_stack_snapshot: AtomicU32::new(0),
            _pad: 0,
            pre_roll_ms: AtomicU32::new(1000),
            post_roll_ms: AtomicU32::new(1000),
            host_pid,
            session_id,
            directory: ShmDirectory::new(),
        });
    }

    /// Validates and borrows a control block from a mapped segment.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped region of at least
    /// [`CONTROL_BLOCK_SIZE`] bytes that stays mapped for `'a`.
    pub unsafe fn attach<'a>(base: *mut u8) -> Option<&'a Self> {
        if base.is_null() {
            return None;
        }
        let block = &*base.cast::<Self>();
        (block.magic == CONTROL_MAGIC).then_some(block)
    }

    pub fn process_state(&self) -> ProcessState {
        ProcessState::from_u32(self.process_state.load(Ordering::Acquire))
            .unwrap_or(ProcessState::Failed)
    }

    pub fn set_process_state(&self, state: ProcessState) {
        self.process_state.store(state as u32, Ordering::Release);
    }

    pub fn flight_state(&self) -> FlightState {
        if self.flight_state.load(Ordering::Acquire) == FlightState::Recording as u32 {
            FlightState::Recording
        } else {
            FlightState::Idle
        }
    }

    pub fn set_flight_state(&self, state: FlightState) {
        self.flight_state.store(state as u32, Ordering::Release);
    }

    pub fn index_lane_enabled(&self) -> bool {
        self.index_lane_enabled.load(Ordering::Relaxed) != 0
    }

    pub fn set_index_lane_enabled(&self, enabled: bool) {
        self.index_lane_enabled
            .store(u32::from(enabled), Ordering::Relaxed);
    }

    pub fn detail_lane_enabled(&self) -> bool {
        self.detail_lane_enabled.load(Ordering::Relaxed) != 0
    }

    pub fn set_detail_lane_enabled(&self, enabled: bool) {
        self.detail_lane_enabled
            .store(u32::from(enabled), Ordering::Relaxed);
    }

    pub fn capture_stack_snapshot(&self) -> bool {
        self.capture_stack_snapshot.load(Ordering::Relaxed) != 0
    }

    pub fn set_capture_stack_snapshot(&self, enabled: bool) {
        self.capture_stack_snapshot
            .store(u32::from(enabled), Ordering::Relaxed);
    }

    /// The segment directory. Immutable once the block is published.
    pub fn directory(&self) -> &ShmDirectory {
        &self.directory
    }

    /// Setup-time mutable access to the directory.
    pub fn directory_mut(&mut self) -> &mut ShmDirectory {
        &mut self.directory
    }
}
