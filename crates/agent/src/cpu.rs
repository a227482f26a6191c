//! CPU-context capability.
//!
//! The interceptor owns trampolines and register snapshots; the core only
//! consumes them. It is injected as a [`CpuContext`] so the producer can be
//! driven by a real interceptor upcall or by a test harness alike.

use ada_atf::DetailFunctionPayload;

/// Register view of one intercepted call, provided by the interceptor.
///
/// Slot semantics by architecture:
/// - arm64: `arg(0..8)` are x0-x7, plus lr/fp/sp
/// - x86_64: `arg(0..6)` are rdi,rsi,rdx,rcx,r8,r9; `arg(6)`/`arg(7)`
///   mirror rbp/rsp; lr reads 0
pub trait CpuContext {
    /// Argument register `index` (0-based, up to 8 slots).
    fn arg(&self, index: usize) -> u64;

    /// Return-value register (x0 / rax). Meaningful on leave only.
    fn return_value(&self) -> u64;

    fn stack_pointer(&self) -> u64;

    fn frame_pointer(&self) -> u64;

    /// Link register; 0 where the architecture has none.
    fn link_register(&self) -> u64 {
        0
    }
}

/// A plain saved-register block implementing [`CpuContext`].
///
/// What a real interceptor fills from its trampoline context, and what
/// tests construct directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedCpuContext {
    pub args: [u64; 8],
    pub ret: u64,
    pub sp: u64,
    pub fp: u64,
    pub lr: u64,
}

impl CpuContext for SavedCpuContext {
    fn arg(&self, index: usize) -> u64 {
        self.args.get(index).copied().unwrap_or(0)
    }

    fn return_value(&self) -> u64 {
        self.ret
    }

    fn stack_pointer(&self) -> u64 {
        self.sp
    }

    fn frame_pointer(&self) -> u64 {
        self.fp
    }

    fn link_register(&self) -> u64 {
        self.lr
    }
}

/// Builds the call-side payload: argument registers and frame pointers.
pub(crate) fn enter_payload(cpu: &dyn CpuContext, function_id: u64) -> DetailFunctionPayload {
    let mut payload = DetailFunctionPayload {
        function_id,
        lr: cpu.link_register(),
        fp: cpu.frame_pointer(),
        sp: cpu.stack_pointer(),
        ..DetailFunctionPayload::default()
    };
    for (i, slot) in payload.regs.iter_mut().enumerate() {
        *slot = cpu.arg(i);
    }
    payload
}

/// Builds the return-side payload: the return-value register and sp.
pub(crate) fn leave_payload(cpu: &dyn CpuContext, function_id: u64) -> DetailFunctionPayload {
    let mut payload = DetailFunctionPayload {
        function_id,
        sp: cpu.stack_pointer(),
        ..DetailFunctionPayload::default()
    };
    payload.regs[0] = cpu.return_value();
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_payload_copies_argument_slots() {
        let cpu = SavedCpuContext {
            args: [1, 2, 3, 4, 5, 6, 7, 8],
            sp: 0x7000,
            fp: 0x7100,
            lr: 0x4242,
            ..SavedCpuContext::default()
        };
        let p = enter_payload(&cpu, 0xF1);
        assert_eq!(p.function_id, 0xF1);
        assert_eq!(p.regs, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!((p.sp, p.fp, p.lr), (0x7000, 0x7100, 0x4242));
        assert_eq!(p.stack_size, 0);
    }

    #[test]
    fn test_leave_payload_captures_return_value() {
        let cpu = SavedCpuContext {
            ret: 0xDEAD,
            sp: 0x7000,
            ..SavedCpuContext::default()
        };
        let p = leave_payload(&cpu, 0xF2);
        assert_eq!(p.regs[0], 0xDEAD);
        assert_eq!(p.regs[1], 0);
        assert_eq!(p.sp, 0x7000);
    }

    #[test]
    fn test_out_of_range_arg_reads_zero() {
        let cpu = SavedCpuContext::default();
        assert_eq!(cpu.arg(12), 0);
    }
}
