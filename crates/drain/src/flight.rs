//! Flight-recorder emission policy.
//!
//! The detail lane records continuously; whether its rings reach disk is a
//! policy decision. Producers arm a per-lane mark when something
//! interesting happens; the drain consults a [`FlightPolicy`] per detail
//! lane pass to decide between emitting and discarding (recycling the
//! rings either way keeps the bounded window rolling).

use ada_ringlane::Lane;

/// Decides, once per detail-lane drain pass, whether that lane's
/// submitted rings are written out or discarded.
pub trait FlightPolicy: Send {
    fn should_emit(&mut self, lane: &Lane<'_>) -> bool;
}

/// Emit everything the detail lane produces. The default: when the
/// controller enables the detail lane it usually wants all of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmitAll;

impl FlightPolicy for EmitAll {
    fn should_emit(&mut self, _lane: &Lane<'_>) -> bool {
        true
    }
}

/// Emit only when the lane carries an unconsumed mark; consuming it
/// re-arms the window. Everything drained without a mark is discarded -
/// that discard IS the flight-recorder window.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnMark;

impl FlightPolicy for OnMark {
    fn should_emit(&mut self, lane: &Lane<'_>) -> bool {
        lane.take_marked_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ada_ringlane::{ArenaConfig, ThreadRegistry};

    #[test]
    fn test_emit_all_always_emits() {
        let reg = ThreadRegistry::create_in_process(&ArenaConfig {
            max_threads: 1,
            ..ArenaConfig::default()
        })
        .unwrap();
        let slot = reg.register_thread(1).unwrap();
        let lane = slot.detail_lane();

        let mut policy = EmitAll;
        assert!(policy.should_emit(&lane));
        assert!(policy.should_emit(&lane));
    }

    #[test]
    fn test_on_mark_consumes_the_mark() {
        let reg = ThreadRegistry::create_in_process(&ArenaConfig {
            max_threads: 1,
            ..ArenaConfig::default()
        })
        .unwrap();
        let slot = reg.register_thread(1).unwrap();
        let lane = slot.detail_lane();

        let mut policy = OnMark;
        assert!(!policy.should_emit(&lane), "unmarked lane is discarded");

        lane.mark_event();
        assert!(policy.should_emit(&lane), "mark triggers one emission");
        assert!(!policy.should_emit(&lane), "mark was consumed");
    }
}
