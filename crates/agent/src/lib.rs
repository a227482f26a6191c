//! ADA Agent - the in-process producer side of the tracing backend.
//!
//! Loaded into the target process by the host, the agent turns interceptor
//! upcalls into ring-buffer event records:
//!
//! - [`AgentContext`] owns the session attachment (control block, segment
//!   directory, registry arena) and exposes the `on_enter` / `on_leave`
//!   callbacks the interceptor drives
//! - TLS carries the reentrancy guard, call depth and sequence counters;
//!   the hook machinery can never re-enter itself
//! - [`ExcludeSet`], [`HookRegistry`] and the symbol-filter predicates
//!   decide which symbols are worth hooking and give each a stable
//!   64-bit identity
//!
//! The hot path is non-blocking by construction and never surfaces an
//! error to the traced program; every failure is a counted drop.

mod context;
mod cpu;
mod exclude;
mod hook_registry;
mod hooks;
mod payload;
mod stack_probe;
mod symbol_filter;
mod tls;

pub use context::{AgentContext, AgentError, AgentStats, HookRef};
pub use cpu::{CpuContext, SavedCpuContext};
pub use exclude::{exclude_hash, ExcludeSet};
pub use hook_registry::{fnv1a32_ci, make_function_id, HookRegistry};
pub use payload::{
    build_profile, parse_init_payload, resolve_session_params, workspace_root, InitPayload,
    SessionParams,
};
pub use stack_probe::capture_stack_window;
pub use symbol_filter::{
    is_stub_section_name, is_swift_compiler_stub, is_swift_section_name, is_swift_symbol_name,
    is_swift_symbolic_metadata, plan_hooks, should_hook_symbol, should_skip_swift_symbols,
    FilterOptions, PlannedHook, SymbolCandidate,
};
pub use tls::{current_thread_id, tls_snapshot};
