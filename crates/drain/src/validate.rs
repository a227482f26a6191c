//! Trace stream validation helpers.
//!
//! Consumers merge per-thread streams by timestamp for display; these
//! checks catch the two ways a merged stream can lie: a thread's own
//! events out of program order, and lifecycle-thread events (the reserved
//! synthetic thread id) splicing themselves into the middle of another
//! thread's run.

use ada_atf::IndexEvent;
use thiserror::Error;

/// A thread-isolation violation at a stream position.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IsolationViolation {
    #[error("thread {thread_id} went back in time at stream position {position}")]
    NonMonotonicThread { thread_id: u32, position: usize },
    #[error(
        "lifecycle event at stream position {position} interleaves thread {thread_id}'s run"
    )]
    LifecycleInterleaved { thread_id: u32, position: usize },
}

/// Validates a merged event stream against the isolation rules:
///
/// - every non-lifecycle thread's subsequence is timestamp-monotone
/// - no lifecycle event (thread id `lifecycle_thread_id`) sits between two
///   adjacent events of the same other thread
pub fn validate_thread_isolation(
    events: &[IndexEvent],
    lifecycle_thread_id: u32,
) -> Result<(), IsolationViolation> {
    use std::collections::HashMap;

    let mut last_ts: HashMap<u32, u64> = HashMap::new();

    for (position, event) in events.iter().enumerate() {
        if event.thread_id == lifecycle_thread_id {
            // Nearest real events on both sides must belong to different
            // threads; otherwise the lifecycle event split a run.
            let before = events[..position]
                .iter()
                .rev()
                .find(|e| e.thread_id != lifecycle_thread_id);
            let after = events[position + 1..]
                .iter()
                .find(|e| e.thread_id != lifecycle_thread_id);
            if let (Some(b), Some(a)) = (before, after) {
                if b.thread_id == a.thread_id {
                    return Err(IsolationViolation::LifecycleInterleaved {
                        thread_id: b.thread_id,
                        position,
                    });
                }
            }
            continue;
        }

        let last = last_ts.entry(event.thread_id).or_insert(0);
        if event.timestamp_ns < *last {
            return Err(IsolationViolation::NonMonotonicThread {
                thread_id: event.thread_id,
                position,
            });
        }
        *last = event.timestamp_ns;
    }
    Ok(())
}
