//! Full pipeline: agent hooks -> ring pools -> drain -> ATF files.

use ada_agent::{AgentContext, HookRef, SavedCpuContext};
use ada_atf::{
    DetailEventHeader, DetailHeader, EventKind, IndexEvent, IndexHeader, NO_DETAIL_SEQ,
};
use ada_drain::{validate_thread_isolation, Drain, DrainConfig};
use ada_ringlane::{ArenaConfig, FlightState, ThreadRegistry};
use std::io::Read;
use std::path::Path;

fn read_all(path: &Path) -> Vec<u8> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    bytes
}

fn index_events(bytes: &[u8]) -> Vec<IndexEvent> {
    let header = IndexHeader::decode(bytes[0..64].try_into().unwrap()).unwrap();
    (0..header.event_count as usize)
        .map(|i| {
            let s = 64 + i * 32;
            IndexEvent::decode(bytes[s..s + 32].try_into().unwrap())
        })
        .collect()
}

fn session_threads(session_dir: &Path) -> Vec<std::path::PathBuf> {
    let mut dirs: Vec<_> = std::fs::read_dir(session_dir)
        .unwrap()
        .filter_map(|e| {
            let path = e.unwrap().path();
            path.file_name()?.to_str()?.starts_with("thread_").then_some(path)
        })
        .collect();
    dirs.sort();
    dirs
}

// Contexts are leaked: TLS bindings of producing threads touch the arena
// from their thread-exit destructors, so it must stay alive.
fn leaked_ctx(max_threads: u32) -> &'static AgentContext {
    Box::leak(Box::new(
        AgentContext::create_in_process(&ArenaConfig {
            max_threads,
            ..ArenaConfig::default()
        })
        .unwrap(),
    ))
}

#[test]
fn hooked_calls_reach_disk_with_detail_links() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = leaked_ctx(4);
    ctx.control().set_detail_lane_enabled(true);
    ctx.control().set_flight_state(FlightState::Recording);

    let hook = HookRef { function_id: (7u64 << 32) | 1 };
    let cpu = SavedCpuContext {
        args: [41, 42, 0, 0, 0, 0, 0, 0],
        ret: 43,
        ..SavedCpuContext::default()
    };
    for _ in 0..10 {
        ctx.on_enter(&hook, &cpu);
        ctx.on_leave(&hook, &cpu);
    }

    // SAFETY: `ctx` (and so the arena) outlives the drain, joined below.
    let binding = unsafe {
        ThreadRegistry::attach(ctx.registry().base_ptr(), ctx.registry().arena_len())
    }
    .unwrap();
    let stats = Drain::new(binding, DrainConfig::new(dir.path())).spawn().shutdown();

    // 20 index events + 20 detail events.
    assert_eq!(stats.events_written, 40);
    assert_eq!(stats.io_errors, 0);

    let threads = session_threads(dir.path());
    assert_eq!(threads.len(), 1);

    let idx = read_all(&threads[0].join("index.atf"));
    let header = IndexHeader::decode(idx[0..64].try_into().unwrap()).unwrap();
    assert_eq!(header.event_count, 20);
    assert_eq!(header.flags & 1, 1, "has-detail flag set");
    assert!(header.time_start_ns <= header.time_end_ns);

    let events = index_events(&idx);
    // Every event carries a detail link; links are 0..20 in order.
    for (i, e) in events.iter().enumerate() {
        assert_eq!(e.detail_seq, i as u32);
        assert_eq!(e.function_id, (7u64 << 32) | 1);
    }

    // Detail stream: back links name the index ordinals, timestamps match.
    let det = read_all(&threads[0].join("detail.atf"));
    let det_header = DetailHeader::decode(det[0..64].try_into().unwrap()).unwrap();
    assert_eq!(det_header.event_count, 20);
    assert_eq!(det_header.index_seq_start, 0);
    assert_eq!(det_header.index_seq_end, 19);

    let mut at = 64usize;
    for (i, e) in events.iter().enumerate() {
        let dh = DetailEventHeader::decode(det[at..at + 24].try_into().unwrap());
        assert_eq!(dh.index_seq, i as u32);
        assert_eq!(dh.timestamp_ns, e.timestamp_ns);
        at += dh.total_length as usize;
    }
}

#[test]
fn concurrent_producers_keep_program_order() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = leaked_ctx(8);

    // SAFETY: `ctx` outlives the drain, joined below.
    let binding = unsafe {
        ThreadRegistry::attach(ctx.registry().base_ptr(), ctx.registry().arena_len())
    }
    .unwrap();
    let drain = Drain::new(binding, DrainConfig::new(dir.path())).spawn();

    // 1000 events per thread: fits one index ring even if the drain never
    // gets scheduled, so no drop can break the alternation asserted below.
    const CALLS: usize = 500;
    std::thread::scope(|scope| {
        for p in 0..3u64 {
            scope.spawn(move || {
                let hook = HookRef { function_id: p + 1 };
                let cpu = SavedCpuContext::default();
                for _ in 0..CALLS {
                    ctx.on_enter(&hook, &cpu);
                    ctx.on_leave(&hook, &cpu);
                }
            });
        }
    });

    let stats = drain.shutdown();
    assert!(stats.events_written > 0);

    let threads = session_threads(dir.path());
    assert_eq!(threads.len(), 3);

    let mut merged = Vec::new();
    for thread_dir in &threads {
        let events = index_events(&read_all(&thread_dir.join("index.atf")));
        assert!(!events.is_empty());

        // Per-thread program order: call/return alternate and timestamps
        // never regress.
        let mut last_ts = 0;
        for (i, e) in events.iter().enumerate() {
            let expected = if i % 2 == 0 { EventKind::Call } else { EventKind::Return };
            assert_eq!(e.event_kind, expected as u32);
            assert_eq!(e.detail_seq, NO_DETAIL_SEQ);
            assert!(e.timestamp_ns >= last_ts, "time regressed within thread");
            last_ts = e.timestamp_ns;
        }
        merged.extend(events);
    }

    // The merged stream passes the isolation validator (no lifecycle
    // thread present at all).
    validate_thread_isolation(&merged, u32::MAX).unwrap();
}
