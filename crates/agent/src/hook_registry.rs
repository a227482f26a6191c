//! Stable 64-bit function identities.
//!
//! `function_id = (module_id << 32) | symbol_index`: the module half is a
//! case-insensitive FNV-1a-32 of the module path, the low half a per-module
//! counter starting at 1. Identities are stable across re-registration, so
//! every event a symbol ever produces carries the same id.

use std::collections::HashMap;
use std::sync::Mutex;

/// Replacement for a zero module hash (zero reads as "no module" in
/// traces).
const MODULE_ZERO_REMAP: u32 = 0x9e37_79b9;

/// Case-insensitive (ASCII) FNV-1a-32.
pub fn fnv1a32_ci(s: &str) -> u32 {
    const FNV_OFFSET: u32 = 2_166_136_261;
    const FNV_PRIME: u32 = 16_777_619;

    let mut h = FNV_OFFSET;
    for &b in s.as_bytes() {
        let c = if b.is_ascii_uppercase() { b + 32 } else { b };
        h ^= u32::from(c);
        h = h.wrapping_mul(FNV_PRIME);
    }
    if h == 0 {
        MODULE_ZERO_REMAP
    } else {
        h
    }
}

/// Packs a module id and symbol index into one function id.
#[inline]
pub fn make_function_id(module_id: u32, symbol_index: u32) -> u64 {
    (u64::from(module_id) << 32) | u64::from(symbol_index)
}

#[derive(Default)]
struct ModuleEntry {
    module_id: u32,
    next_index: u32,
    name_to_index: HashMap<String, u32>,
}

/// Registry mapping `(module path, symbol)` to stable function ids.
///
/// One mutex guards the whole table: registration happens once per symbol
/// per process during discovery, never on the event hot path.
pub struct HookRegistry {
    modules: Mutex<HashMap<String, ModuleEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or re-resolves) a symbol, returning its function id.
    pub fn register_symbol(&self, module_path: &str, symbol: &str) -> u64 {
        let mut modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        let entry = modules.entry(module_path.to_string()).or_default();
        if entry.module_id == 0 {
            entry.module_id = fnv1a32_ci(module_path);
            entry.next_index = 1;
        }

        if let Some(&idx) = entry.name_to_index.get(symbol) {
            return make_function_id(entry.module_id, idx);
        }
        let idx = entry.next_index;
        entry.next_index += 1;
        entry.name_to_index.insert(symbol.to_string(), idx);
        make_function_id(entry.module_id, idx)
    }

    /// Resolves a previously registered symbol.
    pub fn get_id(&self, module_path: &str, symbol: &str) -> Option<u64> {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        let entry = modules.get(module_path)?;
        let idx = entry.name_to_index.get(symbol)?;
        Some(make_function_id(entry.module_id, *idx))
    }

    /// The module hash for a registered path.
    pub fn module_id(&self, module_path: &str) -> Option<u32> {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules.get(module_path).map(|e| e.module_id)
    }

    /// Registered symbol count for a module.
    pub fn symbol_count(&self, module_path: &str) -> u32 {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules
            .get(module_path)
            .map_or(0, |e| e.name_to_index.len() as u32)
    }

    /// Drops all registrations.
    pub fn clear(&self) {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
