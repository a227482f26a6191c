//! Producer thread-local state.
//!
//! One [`ThreadState`] per traced thread: the reentrancy guard, call
//! depth, the sequence counters linking index and detail events, and the
//! thread's binding to its registry slot (pools over both lanes). The
//! state drops with the thread, deactivating the slot.

use ada_atf::ThreadCounters;
use ada_ringlane::{LaneKind, RingPool, ThreadRegistry, ThreadSlot, ThreadSlotShared};
use std::cell::RefCell;
use std::sync::atomic::Ordering;

/// OS-level identity of the current thread.
pub fn current_thread_id() -> u64 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: plain syscall, no arguments.
        (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        // SAFETY: pthread_self never fails.
        (unsafe { libc::pthread_self() }) as u64
    }
    #[cfg(not(unix))]
    {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut h);
        h.finish()
    }
}

/// The thread's claim on a registry slot: one pool per lane plus the raw
/// slot handle used for per-slot counters and deactivation at thread exit.
pub(crate) struct ThreadBinding {
    pub index_pool: RingPool,
    pub detail_pool: RingPool,
    slot: *const ThreadSlotShared,
}

// The binding moves with its owning thread only (inside TLS).
impl ThreadBinding {
    fn new(slot: &ThreadSlot<'_>) -> Self {
        Self {
            index_pool: RingPool::new(slot, LaneKind::Index),
            detail_pool: RingPool::new(slot, LaneKind::Detail),
            slot: slot.shared(),
        }
    }

    #[inline]
    fn shared(&self) -> &ThreadSlotShared {
        // SAFETY: the agent context keeps the registry mapping alive for
        // the process lifetime; slots are never reclaimed before teardown.
        unsafe { &*self.slot }
    }

    #[inline]
    pub fn metrics(&self) -> &ada_ringlane::ThreadMetricsShared {
        &self.shared().metrics
    }

    #[inline]
    pub fn record_event_generated(&self, timestamp_ns: u64) {
        let shared = self.shared();
        shared.events_generated.fetch_add(1, Ordering::Relaxed);
        shared
            .last_event_timestamp
            .store(timestamp_ns, Ordering::Relaxed);
    }

    fn deactivate(&self) {
        self.shared().active.store(0, Ordering::Release);
    }
}

/// Per-thread producer state. Lives in `PRODUCER_TLS`.
pub(crate) struct ThreadState {
    pub thread_id: u64,
    pub call_depth: u32,
    pub in_handler: bool,
    pub reentrancy_attempts: u64,
    pub counters: ThreadCounters,
    pub binding: Option<ThreadBinding>,
    registration_attempted: bool,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            thread_id: current_thread_id(),
            call_depth: 0,
            in_handler: false,
            reentrancy_attempts: 0,
            counters: ThreadCounters::new(),
            binding: None,
            registration_attempted: false,
        }
    }

    /// Registers with the registry on first use. A failed registration is
    /// final: the thread silently degrades and never produces events.
    pub fn ensure_binding(&mut self, registry: &ThreadRegistry) {
        if self.binding.is_some() || self.registration_attempted {
            return;
        }
        self.registration_attempted = true;
        match registry.register_thread(self.thread_id) {
            Some(slot) => self.binding = Some(ThreadBinding::new(&slot)),
            None => {
                log::debug!(
                    "thread {:#x} could not register; producing nothing",
                    self.thread_id
                );
            }
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        if let Some(binding) = &self.binding {
            binding.deactivate();
        }
    }
}

thread_local! {
    static PRODUCER_TLS: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
}

/// Outcome of a guarded TLS access.
pub(crate) enum TlsAccess {
    /// The closure ran.
    Entered,
    /// The hook re-entered itself (or TLS is tearing down); nothing ran.
    Reentered,
}

/// Runs `f` under the reentrancy guard.
///
/// Returns [`TlsAccess::Reentered`] without running `f` when the current
/// thread is already inside a handler - the guarantee that hook machinery
/// can never re-enter itself, even via a hooked primitive the hook itself
/// calls.
pub(crate) fn with_guarded_tls<F>(f: F) -> TlsAccess
where
    F: FnOnce(&mut ThreadState),
{
    let res = PRODUCER_TLS.try_with(|cell| {
        // A borrow failure is re-entry through the TLS itself.
        let Ok(mut slot) = cell.try_borrow_mut() else {
            return TlsAccess::Reentered;
        };
        let state = slot.get_or_insert_with(ThreadState::new);
        if state.in_handler {
            state.reentrancy_attempts += 1;
            return TlsAccess::Reentered;
        }
        state.in_handler = true;
        f(state);
        state.in_handler = false;
        TlsAccess::Entered
    });
    res.unwrap_or(TlsAccess::Reentered)
}

/// Reads `(call_depth, reentrancy_attempts)` for diagnostics and tests.
pub fn tls_snapshot() -> Option<(u32, u64)> {
    PRODUCER_TLS
        .try_with(|cell| {
            cell.borrow()
                .as_ref()
                .map(|s| (s.call_depth, s.reentrancy_attempts))
        })
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_blocks_nested_entry() {
        let mut outer_ran = false;
        let mut inner_ran = false;

        with_guarded_tls(|_state| {
            outer_ran = true;
            // A hooked primitive calling back into the hook machinery.
            match with_guarded_tls(|_| inner_ran = true) {
                TlsAccess::Reentered => {}
                TlsAccess::Entered => panic!("nested entry must be blocked"),
            }
        });

        assert!(outer_ran);
        assert!(!inner_ran);
        let (_, attempts) = tls_snapshot().unwrap();
        assert!(attempts >= 1);
    }

    #[test]
    fn test_state_is_per_thread() {
        with_guarded_tls(|state| state.call_depth = 7);

        std::thread::spawn(|| {
            with_guarded_tls(|state| {
                assert_eq!(state.call_depth, 0, "fresh thread gets fresh state");
            });
        })
        .join()
        .unwrap();

        let (depth, _) = tls_snapshot().unwrap();
        assert_eq!(depth, 7);
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let a = current_thread_id();
        let b = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(a, b);
    }
}
