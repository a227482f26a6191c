//! ADA Drain - the single consumer of the event pipeline.
//!
//! One background thread polls every registered thread's lanes, writes
//! submitted rings out as ATF v2 files, recycles the rings, and
//! periodically folds per-thread metrics into system totals. Scheduling is
//! adaptive: 1 ms between passes under load, backing off to 100 ms when
//! idle.
//!
//! Within one thread, file order is that thread's program order (the ring
//! protocol and the submit queue both preserve it). Across threads only
//! timestamps order; the drain does not merge-sort.

mod drain;
mod flight;
mod global_metrics;
mod validate;

pub use drain::{Drain, DrainConfig, DrainHandle, DrainStats};
pub use flight::{EmitAll, FlightPolicy, OnMark};
pub use global_metrics::{
    GlobalMetricsCollector, SystemRates, SystemTotals, DEFAULT_COLLECTION_INTERVAL,
};
pub use validate::{validate_thread_isolation, IsolationViolation};
