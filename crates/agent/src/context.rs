//! Process-wide agent context.
//!
//! Owns the session attachment: the control block, the mapped segment
//! directory, and the registry binding every producing thread registers
//! through. One context per process; the global slot is set once and the
//! interceptor's upcalls route through it.

use crate::exclude::ExcludeSet;
use crate::hook_registry::HookRegistry;
#[cfg(unix)]
use crate::payload::resolve_session_params;
use crate::symbol_filter::FilterOptions;
use ada_ringlane::{ArenaConfig, ControlBlock, LayoutError, ProcessState, ThreadRegistry};
#[cfg(unix)]
use ada_ringlane::{shm_name, MappedBases, SharedMemory, ShmRole, CONTROL_BLOCK_SIZE};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Agent setup failure. Any of these leaves the agent a no-op.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("host pid / session id unresolved (payload and environment)")]
    SessionUnresolved,
    #[error(transparent)]
    Shm(#[from] ada_ringlane::ShmError),
    #[error("control segment does not hold a control block")]
    BadControlBlock,
    #[error("directory entry 0 (registry arena) is not mapped")]
    NoRegistrySegment,
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("global agent context already installed")]
    AlreadyInstalled,
}

/// One hook's identity, carried by the interceptor into every upcall.
#[derive(Debug, Clone, Copy)]
pub struct HookRef {
    pub function_id: u64,
}

enum ControlOwner {
    Heap(Box<ControlBlock>),
    #[cfg(unix)]
    Segment(SharedMemory),
}

/// Final producer-side statistics, logged at teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub events_emitted: u64,
    pub reentrancy_blocked: u64,
    pub stack_capture_failures: u64,
}

/// The producer agent's process-wide state.
pub struct AgentContext {
    registry: ThreadRegistry,
    control: *const ControlBlock,
    _control_owner: ControlOwner,
    #[cfg(unix)]
    _bases: Option<MappedBases>,
    hook_registry: HookRegistry,
    excludes: ExcludeSet,
    filter: FilterOptions,
    pub(crate) events_emitted: AtomicU64,
    pub(crate) reentrancy_blocked: AtomicU64,
    pub(crate) stack_capture_failures: AtomicU64,
}

// SAFETY: the raw control pointer aims into memory owned by
// `_control_owner`; all shared state behind it is atomic or
// published-then-immutable.
unsafe impl Send for AgentContext {}
unsafe impl Sync for AgentContext {}

static GLOBAL: OnceCell<AgentContext> = OnceCell::new();

impl AgentContext {
    /// Attaches to a live session: resolves `(host_pid, session_id)` from
    /// the payload/environment, opens the control segment, materializes
    /// the directory's local bases and attaches the registry arena.
    ///
    /// On failure after the control block was reachable, the process state
    /// is set to FAILED so the controller can observe the dead agent.
    #[cfg(unix)]
    pub fn attach_session(payload: Option<&str>) -> Result<Self, AgentError> {
        let params = resolve_session_params(payload).ok_or(AgentError::SessionUnresolved)?;

        let control_name = shm_name(ShmRole::Control, params.host_pid, params.session_id);
        let control_seg = SharedMemory::open(&control_name, CONTROL_BLOCK_SIZE)?;
        // SAFETY: the segment stays mapped for the context's lifetime via
        // `_control_owner`.
        let control = unsafe { ControlBlock::attach(control_seg.as_ptr()) }
            .ok_or(AgentError::BadControlBlock)? as *const ControlBlock;

        let fail = |err: AgentError| {
            // SAFETY: same mapping as above.
            unsafe { (*control).set_process_state(ProcessState::Failed) };
            log::warn!("agent attach failed: {err}");
            err
        };

        // SAFETY: control stays mapped; the directory is immutable once
        // the controller published the block.
        let bases = match MappedBases::map(unsafe { (*control).directory() }) {
            Ok(bases) => bases,
            Err(e) => return Err(fail(e.into())),
        };
        let (Some(reg_base), Some(reg_len)) = (bases.registry_base(), bases.size(0)) else {
            return Err(fail(AgentError::NoRegistrySegment));
        };
        // SAFETY: entry 0 maps the registry arena and `_bases` keeps it
        // mapped for the context's lifetime.
        let registry = match unsafe { ThreadRegistry::attach(reg_base, reg_len) } {
            Ok(r) => r,
            Err(e) => return Err(fail(e.into())),
        };

        log::info!(
            "agent attached to session {:08x} of pid {}",
            params.session_id,
            params.host_pid
        );
        Ok(Self {
            registry,
            control,
            _control_owner: ControlOwner::Segment(control_seg),
            _bases: Some(bases),
            hook_registry: HookRegistry::new(),
            excludes: ExcludeSet::default(),
            filter: FilterOptions::from_env(),
            events_emitted: AtomicU64::new(0),
            reentrancy_blocked: AtomicU64::new(0),
            stack_capture_failures: AtomicU64::new(0),
        })
    }

    /// Builds a self-contained context: heap arena, heap control block.
    ///
    /// The same-process configuration - the drain runs in this process and
    /// shares the registry by reference instead of a mapping. Also the
    /// test harness path.
    ///
    /// The context must outlive every thread that produces through it:
    /// per-thread TLS bindings deactivate their registry slot when the
    /// thread exits, which touches the arena. Install it globally (or
    /// leak it) rather than dropping it while producer threads live.
    pub fn create_in_process(cfg: &ArenaConfig) -> Result<Self, AgentError> {
        let registry = ThreadRegistry::create_in_process(cfg)?;

        let layout = std::alloc::Layout::new::<ControlBlock>();
        // SAFETY: fresh allocation, initialized in place before Box owns
        // it.
        let control_box = unsafe {
            let ptr = std::alloc::alloc_zeroed(layout).cast::<ControlBlock>();
            assert!(!ptr.is_null(), "control block allocation failed");
            ControlBlock::init_in_place(ptr, std::process::id(), 0);
            Box::from_raw(ptr)
        };
        control_box.set_process_state(ProcessState::Running);
        let control = std::ptr::addr_of!(*control_box);

        Ok(Self {
            registry,
            control,
            _control_owner: ControlOwner::Heap(control_box),
            #[cfg(unix)]
            _bases: None,
            hook_registry: HookRegistry::new(),
            excludes: ExcludeSet::default(),
            filter: FilterOptions::from_env(),
            events_emitted: AtomicU64::new(0),
            reentrancy_blocked: AtomicU64::new(0),
            stack_capture_failures: AtomicU64::new(0),
        })
    }

    /// Installs `ctx` as the process-wide context. One shot.
    pub fn install_global(ctx: AgentContext) -> Result<&'static AgentContext, AgentError> {
        GLOBAL.set(ctx).map_err(|_| AgentError::AlreadyInstalled)?;
        Ok(GLOBAL.get().expect("just set"))
    }

    /// The installed context, if any.
    pub fn global() -> Option<&'static AgentContext> {
        GLOBAL.get()
    }

    /// The session control block.
    #[inline]
    pub fn control(&self) -> &ControlBlock {
        // SAFETY: `_control_owner` keeps the pointee alive.
        unsafe { &*self.control }
    }

    /// The registry binding this process produces into.
    #[inline]
    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    /// The process-wide hook identity registry.
    pub fn hook_registry(&self) -> &HookRegistry {
        &self.hook_registry
    }

    /// The exclude set used for hook planning.
    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    /// Setup-time mutable access to the exclude set (before hooks go in).
    pub fn excludes_mut(&mut self) -> &mut ExcludeSet {
        &mut self.excludes
    }

    /// Filter options resolved at attach time.
    pub fn filter_options(&self) -> &FilterOptions {
        &self.filter
    }

    /// Producer-side statistics so far.
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            reentrancy_blocked: self.reentrancy_blocked.load(Ordering::Relaxed),
            stack_capture_failures: self.stack_capture_failures.load(Ordering::Relaxed),
        }
    }

    /// Logs final statistics; the agent's destructor-time report.
    pub fn log_final_stats(&self) {
        let stats = self.stats();
        log::info!(
            "agent shutdown: {} events emitted, {} reentrancy attempts blocked, {} stack capture failures",
            stats.events_emitted,
            stats.reentrancy_blocked,
            stats.stack_capture_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_context_defaults() {
        let cfg = ArenaConfig {
            max_threads: 2,
            ..ArenaConfig::default()
        };
        let ctx = AgentContext::create_in_process(&cfg).unwrap();

        assert_eq!(ctx.control().process_state(), ProcessState::Running);
        assert!(ctx.control().index_lane_enabled());
        assert!(!ctx.control().detail_lane_enabled());
        assert_eq!(ctx.registry().capacity(), 2);
        assert!(ctx.excludes().contains("malloc"));
        assert_eq!(ctx.stats(), AgentStats::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_attach_without_session_params_degrades() {
        // Deliberately bogus payload and (very likely) no ADA_SHM_* env.
        let err = AgentContext::attach_session(Some("nothing=1"));
        assert!(matches!(
            err,
            Err(AgentError::SessionUnresolved | AgentError::Shm(_))
        ));
    }
}
