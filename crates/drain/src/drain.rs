use crate::flight::{EmitAll, FlightPolicy};
use crate::global_metrics::GlobalMetricsCollector;
use ada_atf::{
    default_clock_type, ClockType, DetailRecord, IndexEvent, ThreadWriter, DETAIL_RECORD_SIZE,
    INDEX_EVENT_SIZE,
};
use ada_ringlane::{now_ns, LaneKind, RingView, ThreadRegistry, ThreadSlot};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest batch buffer a single drain pass reads into (stack-friendly).
const DRAIN_BUF_BYTES: usize = 8192;

/// Drain configuration.
pub struct DrainConfig {
    /// Session directory; per-thread files land in `thread_<tid>/`.
    pub session_dir: PathBuf,
    /// Clock id stamped into file headers.
    pub clock_type: ClockType,
    /// Sleep after a pass that moved events (busy floor).
    pub min_sleep: Duration,
    /// Idle ceiling; the sleep doubles toward this while nothing flows.
    pub max_sleep: Duration,
    /// Detail-lane emission policy.
    pub flight_policy: Box<dyn FlightPolicy>,
}

impl DrainConfig {
    /// Defaults: adaptive 1 ms - 100 ms sleep, emit-all flight policy.
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            clock_type: default_clock_type(),
            min_sleep: Duration::from_millis(1),
            max_sleep: Duration::from_millis(100),
            flight_policy: Box::new(EmitAll),
        }
    }
}

/// Counters reported when the drain exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Events written to ATF files.
    pub events_written: u64,
    /// Detail events discarded by the flight policy.
    pub events_discarded: u64,
    /// Rings taken from submit queues and recycled.
    pub rings_drained: u64,
    /// Writer I/O failures (affected thread files are best-effort).
    pub io_errors: u64,
    /// Drain loop iterations.
    pub passes: u64,
}

/// Per-pass working state: writers, policy and counters.
///
/// Split from [`Drain`] so lane draining can borrow the registry's slots
/// immutably while this side mutates.
struct DrainWorker {
    config: DrainConfig,
    writers: HashMap<u32, ThreadWriter>,
    failed_writers: HashSet<u32>,
    stats: DrainStats,
}

impl DrainWorker {
    fn drain_lane(&mut self, slot: &ThreadSlot<'_>, kind: LaneKind, final_pass: bool) -> u64 {
        let lane = match kind {
            LaneKind::Index => slot.index_lane(),
            LaneKind::Detail => slot.detail_lane(),
        };

        let emit = match kind {
            LaneKind::Index => true,
            LaneKind::Detail => self.config.flight_policy.should_emit(&lane),
        };

        let mut moved = 0u64;
        while let Some(idx) = lane.take_ring() {
            if let Some(ring) = lane.ring_view(idx) {
                moved += self.drain_ring(slot, kind, ring, emit);
            }
            self.stats.rings_drained += 1;
            if !lane.return_ring(idx) {
                log::warn!("free queue refused ring {idx}; ring leaves rotation");
            }
        }

        if final_pass {
            // Producers have quiesced by the shutdown contract, so the
            // active ring's in-flight events are completions, not races.
            if let Some(ring) = lane.active_ring() {
                moved += self.drain_ring(slot, kind, ring, emit);
            }
        }
        moved
    }

    fn drain_ring(
        &mut self,
        slot: &ThreadSlot<'_>,
        kind: LaneKind,
        ring: RingView,
        emit: bool,
    ) -> u64 {
        let slot_size = ring.slot_size() as usize;
        if slot_size == 0 || slot_size > DRAIN_BUF_BYTES {
            return 0;
        }
        let mut buf = [0u8; DRAIN_BUF_BYTES];
        let batch_slots = (DRAIN_BUF_BYTES / slot_size) as u32;
        let mut moved = 0u64;

        loop {
            let n = ring.read_batch(&mut buf, batch_slots);
            if n == 0 {
                break;
            }
            moved += u64::from(n);

            if !emit {
                self.stats.events_discarded += u64::from(n);
                continue;
            }

            for rec in 0..n as usize {
                let bytes = &buf[rec * slot_size..(rec + 1) * slot_size];
                self.write_record(slot, kind, bytes);
            }
        }
        moved
    }

    fn write_record(&mut self, slot: &ThreadSlot<'_>, kind: LaneKind, bytes: &[u8]) {
        let thread_id = slot.thread_id() as u32;
        let slot_index = slot.slot_index();

        if self.failed_writers.contains(&slot_index) {
            return;
        }
        let writer = match self.writers.entry(slot_index) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                match ThreadWriter::create(&self.config.session_dir, thread_id, self.config.clock_type)
                {
                    Ok(w) => e.insert(w),
                    Err(err) => {
                        log::warn!("writer for thread {thread_id} failed to open: {err}");
                        self.failed_writers.insert(slot_index);
                        self.stats.io_errors += 1;
                        return;
                    }
                }
            }
        };

        let result = match kind {
            LaneKind::Index if bytes.len() >= INDEX_EVENT_SIZE => {
                let event =
                    IndexEvent::decode(bytes[..INDEX_EVENT_SIZE].try_into().expect("sized"));
                writer.write_index_record(&event)
            }
            LaneKind::Detail if bytes.len() >= DETAIL_RECORD_SIZE => {
                match DetailRecord::decode(bytes[..DETAIL_RECORD_SIZE].try_into().expect("sized"))
                {
                    Some(record) => writer.write_detail_record(&record),
                    None => return,
                }
            }
            _ => return,
        };

        match result {
            Ok(()) => self.stats.events_written += 1,
            Err(err) => {
                // Best-effort per thread: drop this thread's file, keep
                // draining everyone else.
                log::warn!("write failed for thread {thread_id}: {err}");
                self.stats.io_errors += 1;
                self.failed_writers.insert(slot_index);
            }
        }
    }

    fn finalize_writers(&mut self) {
        for (slot_index, writer) in &mut self.writers {
            if let Err(err) = writer.finalize() {
                log::warn!("finalize failed for slot {slot_index}: {err}");
                self.stats.io_errors += 1;
            }
        }
        self.writers.clear();
    }
}

/// The single consumer for all threads' lanes.
///
/// Owns its registry *binding* (an attach or the in-process owner), the
/// per-thread ATF writers and the global metrics collector. Runs on a
/// dedicated thread via [`Drain::spawn`].
pub struct Drain {
    registry: ThreadRegistry,
    collector: GlobalMetricsCollector,
    worker: DrainWorker,
}

impl Drain {
    pub fn new(registry: ThreadRegistry, config: DrainConfig) -> Self {
        let capacity = registry.capacity();
        Self {
            registry,
            collector: GlobalMetricsCollector::new(capacity),
            worker: DrainWorker {
                config,
                writers: HashMap::new(),
                failed_writers: HashSet::new(),
                stats: DrainStats::default(),
            },
        }
    }

    /// Starts the drain on its own thread and returns the stop handle.
    pub fn spawn(self) -> DrainHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_inner = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("ada-drain".into())
            .spawn(move || self.run(&stop_inner))
            .expect("spawn drain thread");
        DrainHandle { join, stop }
    }

    /// The drain loop: pass, collect, adaptive sleep, repeat until a stop
    /// request; then one final pass and writer finalization.
    fn run(mut self, stop: &AtomicBool) -> DrainStats {
        log::info!(
            "drain started (session dir {})",
            self.worker.config.session_dir.display()
        );
        let mut sleep = self.worker.config.min_sleep;

        loop {
            let stopping = stop.load(Ordering::Acquire) || self.registry.shutdown_requested();

            let mut moved = 0u64;
            let claimed = self.registry.thread_count().min(self.registry.capacity());
            for i in 0..claimed {
                let Some(slot) = self.registry.thread_at(i) else {
                    continue;
                };
                moved += self.worker.drain_lane(&slot, LaneKind::Index, stopping);
                moved += self.worker.drain_lane(&slot, LaneKind::Detail, stopping);
            }
            self.worker.stats.passes += 1;
            self.collector.collect(&self.registry, now_ns());

            if stopping {
                break;
            }
            if moved > 0 {
                sleep = self.worker.config.min_sleep;
            } else {
                sleep = (sleep * 2).min(self.worker.config.max_sleep);
            }
            std::thread::sleep(sleep);
        }

        self.worker.finalize_writers();
        let stats = self.worker.stats;
        log::info!(
            "drain stopped: {} events written, {} discarded, {} rings, {} io errors",
            stats.events_written,
            stats.events_discarded,
            stats.rings_drained,
            stats.io_errors
        );
        stats
    }
}

/// Stop handle for a spawned drain.
pub struct DrainHandle {
    join: std::thread::JoinHandle<DrainStats>,
    stop: Arc<AtomicBool>,
}

impl DrainHandle {
    /// Requests a stop without waiting.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops the drain and waits for the final pass and finalization.
    pub fn shutdown(self) -> DrainStats {
        self.stop.store(true, Ordering::Release);
        self.join.join().unwrap_or_else(|_| {
            log::error!("drain thread panicked");
            DrainStats::default()
        })
    }
}
