//! Filter invariants over realistic symbol populations.
//!
//! The candidate lists mirror what nm enumerates from Swift-heavy
//! binaries: user functions mixed with metadata accessors, outlined
//! helpers and witness plumbing.

use ada_agent::{
    is_swift_compiler_stub, plan_hooks, should_hook_symbol, ExcludeSet, FilterOptions,
    HookRegistry, SymbolCandidate,
};

fn opts() -> FilterOptions {
    let _ = env_logger::builder().is_test(true).try_init();
    FilterOptions {
        skip_swift_symbols: false,
    }
}

// Symbols that must survive filtering: real code a trace reader wants.
const MUST_HOOK: &[&str] = &[
    "main",
    "compute_distance",
    "$s5Hello5GreetV5greetyyF",
    "$s5Hello3FooVAA1PAAWP1QTW", // protocol witness thunk
    "handle_request",
];

// Compiler machinery that must never be hooked.
const MUST_SKIP: &[&str] = &[
    "$s5Hello3FooVMa",
    "$s5Hello3FooVMr",
    "$s5Hello3FooVMi",
    "$s5Hello3FooVTm",
    "$s5Hello3FooVWb",
    "$s5Hello3FooVWl",
    "$s5Hello3FooVWL",
    "$s5Hello3FooVOe",
    "$s5Hello3FooVOh",
    "$s5Hello3FooVOwxx",
    "$s5Hello3FooVVwet",
    "$s5Hello3FooVwcp",
    "__swift_memcpy24_8",
    "objectdestroy.7",
    "block_copy_helper.1",
    "_symbolic _____ 5Hello3FooV",
];

#[test]
fn user_code_survives_machinery_does_not() {
    let excludes = ExcludeSet::default();
    for name in MUST_HOOK {
        assert!(
            should_hook_symbol(&SymbolCandidate::named(name), &excludes, &opts()),
            "{name} should be hookable"
        );
    }
    for name in MUST_SKIP {
        assert!(
            !should_hook_symbol(&SymbolCandidate::named(name), &excludes, &opts()),
            "{name} should be filtered"
        );
    }
}

#[test]
fn stub_predicate_never_matches_witness_thunks() {
    // TW must survive every suffix class; a regression here silently
    // drops real inlined implementations from traces.
    for name in MUST_HOOK {
        assert!(!is_swift_compiler_stub(name), "{name} misclassified");
    }
}

#[test]
fn plan_hooks_composition_is_stable_and_ordered() {
    let excludes = ExcludeSet::default();
    let registry = HookRegistry::new();

    let all: Vec<SymbolCandidate<'_>> = MUST_SKIP
        .iter()
        .chain(MUST_HOOK.iter())
        .map(|n| SymbolCandidate::named(n))
        .collect();

    let planned = plan_hooks("/app/main", &all, &excludes, &registry, &opts());
    let names: Vec<&str> = planned.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(names, MUST_HOOK.to_vec());

    // Strictly increasing indices from 1, one shared module id.
    for (i, hook) in planned.iter().enumerate() {
        assert_eq!(hook.function_id & 0xFFFF_FFFF, i as u64 + 1);
        assert_eq!(hook.function_id >> 32, planned[0].function_id >> 32);
    }

    // Planning again re-resolves the same ids.
    let replanned = plan_hooks("/app/main", &all, &excludes, &registry, &opts());
    assert_eq!(planned, replanned);
}

#[test]
fn swift_toggle_drops_all_mangled_symbols() {
    let excludes = ExcludeSet::default();
    let registry = HookRegistry::new();
    let skip = FilterOptions {
        skip_swift_symbols: true,
    };

    let candidates: Vec<SymbolCandidate<'_>> =
        MUST_HOOK.iter().map(|n| SymbolCandidate::named(n)).collect();
    let planned = plan_hooks("/app/main", &candidates, &excludes, &registry, &skip);

    let names: Vec<&str> = planned.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(names, vec!["main", "compute_distance", "handle_request"]);
}

#[test]
fn section_classification_beats_symbol_name() {
    let excludes = ExcludeSet::default();
    // A perfectly hookable name inside a stub section is a jump island.
    let c = SymbolCandidate {
        name: "interesting_function",
        section: Some("__TEXT,__auth_stubs"),
    };
    assert!(!should_hook_symbol(&c, &excludes, &opts()));

    let c = SymbolCandidate {
        name: "interesting_function",
        section: Some("__TEXT,__text"),
    };
    assert!(should_hook_symbol(&c, &excludes, &opts()));
}
