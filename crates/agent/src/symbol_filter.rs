//! Pure predicates deciding whether a candidate symbol is hookable.
//!
//! Swift-heavy binaries are full of compiler-generated machinery - metadata
//! accessors, outlined copies, witness-table plumbing - that fires millions
//! of times a second and tells a trace reader nothing. These predicates
//! classify such symbols by mangling shape so discovery can skip them.
//! They are exported for reuse by symbol discovery and for testing against
//! nm-enumerated fixtures.

use crate::exclude::ExcludeSet;
use crate::hook_registry::HookRegistry;

/// True for Swift-mangled names (`$s…`, `$S…`, `_$s…`, `_$S…`) and Swift
/// runtime entry points (`swift_…` and underscore variants).
pub fn is_swift_symbol_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.starts_with("$s")
        || name.starts_with("$S")
        || name.starts_with("_$s")
        || name.starts_with("_$S")
        || name.starts_with("swift_")
        || name.starts_with("_swift_")
        || name.starts_with("__swift")
}

/// True for Swift symbolic-metadata reflection strings (`symbolic …`).
/// These carry type information, not executable code.
pub fn is_swift_symbolic_metadata(name: &str) -> bool {
    name.starts_with("_symbolic") || name.starts_with("symbolic")
}

/// True for trampoline/stub sections (`__stubs`, `__stub_helper`,
/// `__auth_stubs`). Symbols there are linker-generated jump islands.
pub fn is_stub_section_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.contains("__stub_helper") || name.contains("__auth_stubs") || name.contains("__stubs")
}

/// True for Swift metadata sections (`__swift5_types` and friends).
pub fn is_swift_section_name(name: &str) -> bool {
    !name.is_empty() && name.contains("__swift")
}

/// Matches `<prefix>Xw[a-z]+` suffixes (outlined value witnesses `Ow…`,
/// value-witness table entries `Vw…`): scan backwards for the marker and
/// require only lowercase letters after it. Byte-wise so mangled input can
/// never split a multibyte character.
fn has_witness_suffix(mangled: &str, marker: [u8; 2]) -> bool {
    let bytes = mangled.as_bytes();
    if bytes.len() < 3 {
        return false;
    }
    for i in (0..=bytes.len() - 3).rev() {
        if bytes[i] == marker[0] && bytes[i + 1] == marker[1] {
            let trailing = &bytes[i + 2..];
            return !trailing.is_empty() && trailing.iter().all(u8::is_ascii_lowercase);
        }
    }
    false
}

/// True for compiler-generated Swift stubs that must not be hooked.
///
/// Prefix classes (unmangled): `__swift_`/`___swift_` runtime helpers,
/// `objectdestroy…` SIL destructors, `block_copy_helper`/
/// `block_destroy_helper` block ABI helpers. Suffix classes apply only to
/// `$s`-mangled names: metadata accessors (`Tm`, `Ma`, `Mi`, `Mr`),
/// back-deploy thunks (`Wb`), witness-table lazy accessors (`Wl`/`WL`),
/// outlined retain/release/copy/consume/destroy/init (`Oe` `Oh` `Ob` `Oc`
/// `Od` `Oy`), witness-table copy/accessor/template (`wcp` `wca` `wct`),
/// and the `Ow…`/`Vw…` witness families.
///
/// Protocol-witness thunks (`TW`) are deliberately NOT matched: in release
/// builds they contain inlined implementations worth tracing.
pub fn is_swift_compiler_stub(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // Prefix checks (non-mangled names).
    if name.starts_with("___swift_")
        || name.starts_with("__swift_")
        || name.starts_with("_objectdestroy")
        || name.starts_with("objectdestroy")
        || name.starts_with("block_copy_helper")
        || name.starts_with("block_destroy_helper")
    {
        return true;
    }

    // Suffix checks apply only to `$s`-mangled symbols.
    let mangled = name.strip_prefix("_$s").or_else(|| name.strip_prefix("$s"));
    let Some(mangled) = mangled else {
        return false;
    };
    if mangled.is_empty() {
        return false;
    }

    const TWO_CHAR_SUFFIXES: &[&str] = &[
        "Tm", // type metadata accessor
        "Wb", // back-deploy thunk
        "Mi", // metaclass init
        "Mr", // type metadata completion
        "Ma", // metadata accessor
        "Wl", // witness table lazy accessor
        "WL", // witness table lazy accessor (cache variant)
        "Oe", // outlined retain
        "Oh", // outlined release
        "Ob", // outlined copy
        "Oc", // outlined consume
        "Od", // outlined destroy
        "Oy", // outlined init with copy
    ];
    if TWO_CHAR_SUFFIXES.iter().any(|s| mangled.ends_with(s)) {
        return true;
    }

    const THREE_CHAR_SUFFIXES: &[&str] = &["wcp", "wca", "wct"];
    if THREE_CHAR_SUFFIXES.iter().any(|s| mangled.ends_with(s)) {
        return true;
    }

    if has_witness_suffix(mangled, *b"Ow") || has_witness_suffix(mangled, *b"Vw") {
        return true;
    }

    false
}

/// Hook-planning options, usually built from the environment.
#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    /// Skip everything Swift-mangled, not just stubs. Default on Apple
    /// platforms unless `ADA_HOOK_SWIFT=1`.
    pub skip_swift_symbols: bool,
}

impl FilterOptions {
    pub fn from_env() -> Self {
        Self {
            skip_swift_symbols: should_skip_swift_symbols(),
        }
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Whether the runtime toggle asks to skip Swift symbols entirely.
pub fn should_skip_swift_symbols() -> bool {
    #[cfg(target_vendor = "apple")]
    {
        !matches!(std::env::var("ADA_HOOK_SWIFT").as_deref(), Ok("1"))
    }
    #[cfg(not(target_vendor = "apple"))]
    {
        false
    }
}

/// A candidate symbol as discovery enumerates it.
#[derive(Debug, Clone, Copy)]
pub struct SymbolCandidate<'a> {
    pub name: &'a str,
    /// Containing section, when known.
    pub section: Option<&'a str>,
}

impl<'a> SymbolCandidate<'a> {
    pub fn named(name: &'a str) -> Self {
        Self {
            name,
            section: None,
        }
    }
}

/// The hookability decision: a candidate is hookable only when none of the
/// filter predicates hold.
pub fn should_hook_symbol(
    candidate: &SymbolCandidate<'_>,
    excludes: &ExcludeSet,
    opts: &FilterOptions,
) -> bool {
    let name = candidate.name;
    if name.is_empty() || excludes.contains(name) {
        return false;
    }
    if is_swift_compiler_stub(name) || is_swift_symbolic_metadata(name) {
        return false;
    }
    if let Some(section) = candidate.section {
        if is_stub_section_name(section) || is_swift_section_name(section) {
            return false;
        }
    }
    if opts.skip_swift_symbols && is_swift_symbol_name(name) {
        return false;
    }
    true
}

/// One planned hook: a surviving symbol with its registered identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedHook {
    pub symbol: String,
    pub function_id: u64,
}

/// Filters `candidates` for one module and registers the survivors,
/// returning them in enumeration order with strictly increasing symbol
/// indices.
pub fn plan_hooks(
    module_path: &str,
    candidates: &[SymbolCandidate<'_>],
    excludes: &ExcludeSet,
    registry: &HookRegistry,
    opts: &FilterOptions,
) -> Vec<PlannedHook> {
    let mut planned = Vec::new();
    for c in candidates {
        if !should_hook_symbol(c, excludes, opts) {
            log::trace!("skipping symbol {:?} in {module_path}", c.name);
            continue;
        }
        planned.push(PlannedHook {
            symbol: c.name.to_string(),
            function_id: registry.register_symbol(module_path, c.name),
        });
    }
    log::debug!(
        "planned {}/{} hooks for {module_path}",
        planned.len(),
        candidates.len()
    );
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_swift_skip() -> FilterOptions {
        FilterOptions {
            skip_swift_symbols: false,
        }
    }

    #[test]
    fn test_swift_name_detection() {
        assert!(is_swift_symbol_name("$s5HelloAAC3runyyF"));
        assert!(is_swift_symbol_name("_$S5Hello3fooyyF"));
        assert!(is_swift_symbol_name("swift_retain"));
        assert!(is_swift_symbol_name("_swift_release"));
        assert!(is_swift_symbol_name("__swift_memcpy16_8"));
        assert!(!is_swift_symbol_name("main"));
        assert!(!is_swift_symbol_name(""));
    }

    #[test]
    fn test_runtime_helper_prefixes_are_stubs() {
        assert!(is_swift_compiler_stub("__swift_memcpy16_8"));
        assert!(is_swift_compiler_stub("___swift_noop_void_return"));
        assert!(is_swift_compiler_stub("objectdestroy.14Tm"));
        assert!(is_swift_compiler_stub("_objectdestroy.2"));
        assert!(is_swift_compiler_stub("block_copy_helper.5"));
        assert!(is_swift_compiler_stub("block_destroy_helper.5"));
    }

    #[test]
    fn test_mangled_suffix_classes_are_stubs() {
        for suffix in [
            "Tm", "Wb", "Mi", "Mr", "Ma", "Wl", "WL", "Oe", "Oh", "Ob", "Oc", "Od", "Oy", "wcp",
            "wca", "wct",
        ] {
            let sym = format!("$s5Hello3FooV{suffix}");
            assert!(is_swift_compiler_stub(&sym), "{sym} should be a stub");
            let sym = format!("_$s5Hello3FooV{suffix}");
            assert!(is_swift_compiler_stub(&sym), "{sym} should be a stub");
        }
    }

    #[test]
    fn test_outlined_and_value_witness_families() {
        assert!(is_swift_compiler_stub("$s4main3BarVOwxx"));
        assert!(is_swift_compiler_stub("$s4main3BarVVwet"));
        // Uppercase after the marker is not a witness suffix.
        assert!(!is_swift_compiler_stub("$s4main3BarVOwXX"));
    }

    #[test]
    fn test_protocol_witness_thunks_are_kept() {
        // TW thunks carry inlined implementations in release builds.
        assert!(!is_swift_compiler_stub("$s5Hello3FooVAA1PAAWP1QTW"));
        assert!(!is_swift_compiler_stub("$s4main1XV9hashValueSivgTW"));
    }

    #[test]
    fn test_suffixes_do_not_apply_to_unmangled_names() {
        // Ends with "Ma" but is not a Swift-mangled name.
        assert!(!is_swift_compiler_stub("createPanorama"));
        assert!(!is_swift_compiler_stub("llama"));
        // Old-mangling `$S` prefixes never reach suffix classification.
        assert!(!is_swift_compiler_stub("$S5Hello3FooVMa"));
        assert!(!is_swift_compiler_stub("_$S5Hello3FooVOwxx"));
    }

    #[test]
    fn test_symbolic_metadata_detection() {
        assert!(is_swift_symbolic_metadata("_symbolic _____ 4main1XV"));
        assert!(is_swift_symbolic_metadata("symbolic x"));
        assert!(!is_swift_symbolic_metadata("main"));
    }

    #[test]
    fn test_section_predicates() {
        assert!(is_stub_section_name("__TEXT,__stubs"));
        assert!(is_stub_section_name("__TEXT,__stub_helper"));
        assert!(is_stub_section_name("__TEXT,__auth_stubs"));
        assert!(!is_stub_section_name("__TEXT,__text"));

        assert!(is_swift_section_name("__TEXT,__swift5_types"));
        assert!(!is_swift_section_name("__DATA,__data"));
    }

    #[test]
    fn test_should_hook_composition() {
        let excludes = ExcludeSet::default();
        let opts = no_swift_skip();

        assert!(should_hook_symbol(
            &SymbolCandidate::named("compute_checksum"),
            &excludes,
            &opts
        ));
        // Excluded by the default set.
        assert!(!should_hook_symbol(
            &SymbolCandidate::named("memcpy"),
            &excludes,
            &opts
        ));
        // Stub section.
        assert!(!should_hook_symbol(
            &SymbolCandidate {
                name: "anything",
                section: Some("__TEXT,__stubs"),
            },
            &excludes,
            &opts
        ));
        // Swift toggle.
        let skip = FilterOptions {
            skip_swift_symbols: true,
        };
        assert!(!should_hook_symbol(
            &SymbolCandidate::named("$s5Hello3runyyF"),
            &excludes,
            &skip
        ));
        assert!(should_hook_symbol(
            &SymbolCandidate::named("$s5Hello3runyyF"),
            &excludes,
            &opts
        ));
    }

    #[test]
    fn test_plan_hooks_assigns_increasing_indices() {
        let excludes = ExcludeSet::default();
        let registry = HookRegistry::new();
        let candidates = [
            SymbolCandidate::named("memcpy"),
            SymbolCandidate::named("foo"),
            SymbolCandidate::named("malloc"),
            SymbolCandidate::named("bar"),
        ];

        let planned = plan_hooks("/bin/main", &candidates, &excludes, &registry, &no_swift_skip());
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].symbol, "foo");
        assert_eq!(planned[1].symbol, "bar");

        // Same module half, strictly increasing indices starting at 1.
        assert_eq!(planned[0].function_id >> 32, planned[1].function_id >> 32);
        assert_eq!(planned[0].function_id & 0xFFFF_FFFF, 1);
        assert_eq!(planned[1].function_id & 0xFFFF_FFFF, 2);
    }
}
