//! End-to-end pipeline demo: multi-threaded producers, one drain, ATF
//! files on disk.
//!
//! Run with `cargo run --bin trace_demo`. Writes a session directory under
//! the system temp dir and prints the collected metrics as JSON.

use ada_atf::{EventKind, IndexEvent, NO_DETAIL_SEQ};
use ada_drain::{Drain, DrainConfig, GlobalMetricsCollector};
use ada_ringlane::{now_ns, ArenaConfig, LaneKind, RingPool, ThreadRegistry};
use anyhow::{Context, Result};
use std::sync::Arc;

const PRODUCERS: u64 = 4;
const EVENTS_PER_PRODUCER: u64 = 50_000;

fn main() -> Result<()> {
    env_logger::init();

    let session_dir = std::env::temp_dir().join(format!("ada_demo_{}", std::process::id()));
    let registry = Arc::new(
        ThreadRegistry::create_in_process(&ArenaConfig::default())
            .context("arena allocation failed")?,
    );

    // SAFETY: `registry` is kept alive past the drain's join below.
    let drain_binding =
        unsafe { ThreadRegistry::attach(registry.base_ptr(), registry.arena_len()) }
            .context("drain attach failed")?;
    let drain = Drain::new(drain_binding, DrainConfig::new(&session_dir)).spawn();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let tid = 1000 + p;
                let slot = registry.register_thread(tid).expect("registry slot");
                let mut pool = RingPool::new(&slot, LaneKind::Index);

                let mut written = 0u64;
                for i in 0..EVENTS_PER_PRODUCER {
                    let event = IndexEvent {
                        timestamp_ns: now_ns(),
                        function_id: (p << 32) | 1,
                        thread_id: tid as u32,
                        event_kind: if i % 2 == 0 {
                            EventKind::Call as u32
                        } else {
                            EventKind::Return as u32
                        },
                        call_depth: 1,
                        detail_seq: NO_DETAIL_SEQ,
                    };
                    if pool.write_event(&event.encode()) {
                        written += 1;
                    }
                }
                written
            })
        })
        .collect();

    let mut produced = 0u64;
    for handle in producers {
        produced += handle.join().expect("producer panicked");
    }

    // One collection pass for the report, then stop the drain.
    let mut collector = GlobalMetricsCollector::new(registry.capacity());
    collector.collect(&registry, now_ns());
    let stats = drain.shutdown();

    println!("session dir: {}", session_dir.display());
    println!("produced:    {produced}");
    println!("drain stats: {}", serde_json::to_string_pretty(&stats)?);
    println!(
        "totals:      {}",
        serde_json::to_string_pretty(&collector.totals())?
    );
    for snap in collector.snapshots() {
        println!("thread:      {}", serde_json::to_string(snap)?);
    }

    Ok(())
}
