//! The hook upcalls: what runs inside every intercepted call and return.
//!
//! This is the hot path. It must never block, never allocate after the
//! thread's first event, and never propagate a failure into the traced
//! program - every fallible step degrades to a counted drop.

use crate::context::{AgentContext, HookRef};
use crate::cpu::{enter_payload, leave_payload, CpuContext};
use crate::stack_probe::capture_stack_window;
use crate::tls::{with_guarded_tls, ThreadState, TlsAccess};
use ada_atf::{DetailRecord, EventKind, IndexEvent};
use ada_ringlane::{now_ns, FlightState};
use std::sync::atomic::Ordering;

impl AgentContext {
    /// Interceptor upcall: a hooked function was entered.
    pub fn on_enter(&self, hook: &HookRef, cpu: &dyn CpuContext) {
        let access = with_guarded_tls(|state| {
            state.call_depth += 1;
            self.emit(state, hook, cpu, EventKind::Call);
        });
        if matches!(access, TlsAccess::Reentered) {
            self.reentrancy_blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Interceptor upcall: a hooked function is returning.
    pub fn on_leave(&self, hook: &HookRef, cpu: &dyn CpuContext) {
        let access = with_guarded_tls(|state| {
            self.emit(state, hook, cpu, EventKind::Return);
            state.call_depth = state.call_depth.saturating_sub(1);
        });
        if matches!(access, TlsAccess::Reentered) {
            self.reentrancy_blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emit(&self, state: &mut ThreadState, hook: &HookRef, cpu: &dyn CpuContext, kind: EventKind) {
        let control = self.control();
        if !control.index_lane_enabled() {
            if let Some(binding) = &state.binding {
                binding.metrics().record_event_filtered();
            }
            return;
        }

        state.ensure_binding(self.registry());
        let Some(binding) = state.binding.as_mut() else {
            // Registry exhausted: silently degrade.
            return;
        };

        let timestamp_ns = now_ns();
        let detail_active = control.detail_lane_enabled()
            && control.flight_state() == FlightState::Recording;
        let (index_seq, detail_seq) = state.counters.reserve(detail_active);

        let event = IndexEvent {
            timestamp_ns,
            function_id: hook.function_id,
            thread_id: state.thread_id as u32,
            event_kind: kind as u32,
            call_depth: state.call_depth,
            detail_seq,
        };
        if binding.index_pool.write_event(&event.encode()) {
            self.events_emitted.fetch_add(1, Ordering::Relaxed);
            binding.record_event_generated(timestamp_ns);
        }

        if detail_active {
            let mut payload = match kind {
                EventKind::Return => leave_payload(cpu, hook.function_id),
                _ => enter_payload(cpu, hook.function_id),
            };

            if kind != EventKind::Return && control.capture_stack_snapshot() {
                let copied = capture_stack_window(payload.sp, &mut payload.stack);
                payload.stack_size = copied as u16;
                if copied == 0 {
                    self.stack_capture_failures.fetch_add(1, Ordering::Relaxed);
                }
            }

            let record = DetailRecord {
                timestamp_ns,
                function_id: hook.function_id,
                thread_id: state.thread_id as u32,
                event_kind: kind as u32,
                call_depth: state.call_depth,
                index_seq,
                payload,
            };
            if binding.detail_pool.write_event(&record.encode()) {
                self.events_emitted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Arms the detail lane's flight-recorder mark for the current thread:
    /// "something interesting landed in this rotation". Consumed by the
    /// drain's flight policy.
    pub fn mark_detail_event(&self) {
        with_guarded_tls(|state| {
            if let Some(binding) = &state.binding {
                binding.detail_pool.mark_detail();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::SavedCpuContext;
    use crate::tls::tls_snapshot;
    use ada_atf::types::NO_DETAIL_SEQ;
    use ada_ringlane::ArenaConfig;

    // Leaked: the TLS destructor of the test thread deactivates its slot
    // after the test body returns, so the arena must stay alive.
    fn test_ctx() -> &'static AgentContext {
        let cfg = ArenaConfig {
            max_threads: 4,
            ..ArenaConfig::default()
        };
        Box::leak(Box::new(AgentContext::create_in_process(&cfg).unwrap()))
    }

    fn drain_index_events(ctx: &AgentContext) -> Vec<IndexEvent> {
        let mut events = Vec::new();
        for i in 0..ctx.registry().capacity() {
            let Some(slot) = ctx.registry().thread_at(i) else { continue };
            if !slot.is_active() {
                continue;
            }
            let lane = slot.index_lane();
            // Active ring still holds the events; read it in place.
            if let Some(ring) = lane.active_ring() {
                let mut buf = [0u8; 32];
                while ring.read(&mut buf) {
                    events.push(IndexEvent::decode(&buf));
                }
            }
        }
        events
    }

    #[test]
    fn test_enter_leave_emit_call_and_return() {
        let ctx = test_ctx();
        let hook = HookRef { function_id: 0xAB };
        let cpu = SavedCpuContext::default();

        ctx.on_enter(&hook, &cpu);
        ctx.on_leave(&hook, &cpu);

        let events = drain_index_events(&ctx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_kind, EventKind::Call as u32);
        assert_eq!(events[0].call_depth, 1);
        assert_eq!(events[0].detail_seq, NO_DETAIL_SEQ);
        assert_eq!(events[1].event_kind, EventKind::Return as u32);
        assert_eq!(events[1].call_depth, 1);
        assert_eq!(ctx.stats().events_emitted, 2);

        let (depth, _) = tls_snapshot().unwrap();
        assert_eq!(depth, 0, "leave restores depth");
    }

    #[test]
    fn test_nested_calls_track_depth() {
        let ctx = test_ctx();
        let outer = HookRef { function_id: 1 };
        let inner = HookRef { function_id: 2 };
        let cpu = SavedCpuContext::default();

        ctx.on_enter(&outer, &cpu);
        ctx.on_enter(&inner, &cpu);
        ctx.on_leave(&inner, &cpu);
        ctx.on_leave(&outer, &cpu);

        let depths: Vec<u32> = drain_index_events(&ctx).iter().map(|e| e.call_depth).collect();
        assert_eq!(depths, vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_depth_never_goes_negative() {
        let ctx = test_ctx();
        let hook = HookRef { function_id: 1 };
        let cpu = SavedCpuContext::default();

        // Unbalanced leave (longjmp-style): floor at zero.
        ctx.on_leave(&hook, &cpu);
        ctx.on_leave(&hook, &cpu);
        let (depth, _) = tls_snapshot().unwrap();
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_index_lane_disabled_counts_filtered() {
        let ctx = test_ctx();
        let hook = HookRef { function_id: 1 };
        let cpu = SavedCpuContext::default();

        // First event registers the thread.
        ctx.on_enter(&hook, &cpu);
        ctx.control().set_index_lane_enabled(false);
        ctx.on_enter(&hook, &cpu);
        ctx.on_enter(&hook, &cpu);

        let slot = ctx.registry().lookup(crate::tls::current_thread_id()).unwrap();
        let snap = slot.metrics().capture(0);
        assert_eq!(snap.events_written, 1);
        assert_eq!(snap.events_filtered, 2);
    }

    #[test]
    fn test_detail_events_reserve_sequence_pairs() {
        let ctx = test_ctx();
        ctx.control().set_detail_lane_enabled(true);
        ctx.control().set_flight_state(FlightState::Recording);

        let hook = HookRef { function_id: 0xC0FFEE };
        let cpu = SavedCpuContext {
            args: [11, 22, 0, 0, 0, 0, 0, 0],
            ret: 99,
            sp: 0,
            ..SavedCpuContext::default()
        };

        ctx.on_enter(&hook, &cpu);
        ctx.on_leave(&hook, &cpu);

        let slot = ctx.registry().lookup(crate::tls::current_thread_id()).unwrap();

        // Index events carry forward links 0 and 1.
        let index_ring = slot.index_lane().active_ring().unwrap();
        let mut buf = [0u8; 32];
        assert!(index_ring.read(&mut buf));
        let call = IndexEvent::decode(&buf);
        assert_eq!(call.detail_seq, 0);
        assert!(index_ring.read(&mut buf));
        let ret = IndexEvent::decode(&buf);
        assert_eq!(ret.detail_seq, 1);

        // Detail records carry back links 0 and 1 and the register file.
        let detail_ring = slot.detail_lane().active_ring().unwrap();
        let mut dbuf = [0u8; ada_atf::DETAIL_RECORD_SIZE];
        assert!(detail_ring.read(&mut dbuf));
        let call_rec = DetailRecord::decode(&dbuf).unwrap();
        assert_eq!(call_rec.index_seq, 0);
        assert_eq!(call_rec.payload.regs[0], 11);
        assert_eq!(call_rec.payload.regs[1], 22);

        assert!(detail_ring.read(&mut dbuf));
        let ret_rec = DetailRecord::decode(&dbuf).unwrap();
        assert_eq!(ret_rec.index_seq, 1);
        assert_eq!(ret_rec.payload.regs[0], 99, "return value in slot 0");
    }

    #[test]
    fn test_detail_requires_recording_state() {
        let ctx = test_ctx();
        ctx.control().set_detail_lane_enabled(true);
        // flight_state stays Idle: no detail events, no detail sequences.

        let hook = HookRef { function_id: 1 };
        let cpu = SavedCpuContext::default();
        ctx.on_enter(&hook, &cpu);

        let events = drain_index_events(&ctx);
        assert_eq!(events[0].detail_seq, NO_DETAIL_SEQ);

        let slot = ctx.registry().lookup(crate::tls::current_thread_id()).unwrap();
        assert!(slot.detail_lane().active_ring().unwrap().is_empty());
    }

    #[test]
    fn test_mark_detail_event_sets_lane_flag() {
        let ctx = test_ctx();
        let hook = HookRef { function_id: 1 };
        let cpu = SavedCpuContext::default();
        ctx.on_enter(&hook, &cpu);

        ctx.mark_detail_event();
        let slot = ctx.registry().lookup(crate::tls::current_thread_id()).unwrap();
        assert!(slot.detail_lane().has_marked_event());
    }

    #[test]
    fn test_stack_snapshot_captured_on_enter() {
        let ctx = test_ctx();
        ctx.control().set_detail_lane_enabled(true);
        ctx.control().set_flight_state(FlightState::Recording);
        ctx.control().set_capture_stack_snapshot(true);

        let stack_bytes = [0xABu8; 512];
        let cpu = SavedCpuContext {
            sp: stack_bytes.as_ptr() as u64,
            ..SavedCpuContext::default()
        };
        let hook = HookRef { function_id: 7 };
        ctx.on_enter(&hook, &cpu);

        let slot = ctx.registry().lookup(crate::tls::current_thread_id()).unwrap();
        let ring = slot.detail_lane().active_ring().unwrap();
        let mut dbuf = [0u8; ada_atf::DETAIL_RECORD_SIZE];
        assert!(ring.read(&mut dbuf));
        let rec = DetailRecord::decode(&dbuf).unwrap();

        #[cfg(unix)]
        {
            assert_eq!(rec.payload.stack_size as usize, ada_atf::MAX_STACK_SNAPSHOT);
            assert!(rec.payload.stack.iter().all(|&b| b == 0xAB));
        }
        #[cfg(not(unix))]
        {
            assert_eq!(rec.payload.stack_size, 0);
        }
    }
}
