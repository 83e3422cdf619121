//! Local/peer procedure counter bookkeeping.
//!
//! The tracker remembers the most recent procedure each side finished and the
//! procedure the local side abandoned. [`CounterTracker::aligned`] is the only
//! gate the orchestrator uses before asking the peer for its ranging data.

use crate::procedure::ProcedureCounter;

/// Most recent local and peer procedure counters plus the dropped marker.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CounterTracker {
    most_recent_local: Option<ProcedureCounter>,
    most_recent_peer: Option<ProcedureCounter>,
    last_overwritten: Option<ProcedureCounter>,
    dropped: Option<ProcedureCounter>,
}

impl CounterTracker {
    /// Creates a tracker with no counters designated.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            most_recent_local: None,
            most_recent_peer: None,
            last_overwritten: None,
            dropped: None,
        }
    }

    /// Records that the local controller finished `counter`.
    pub fn record_local_complete(&mut self, counter: ProcedureCounter) {
        self.most_recent_local = Some(counter);
    }

    /// Records that the peer announced ranging data for `counter`.
    pub fn record_peer_ready(&mut self, counter: ProcedureCounter) {
        self.most_recent_peer = Some(counter);
    }

    /// Records that the peer overwrote its stored ranging data for `counter`.
    pub fn record_peer_overwritten(&mut self, counter: ProcedureCounter) {
        self.last_overwritten = Some(counter);
    }

    /// Marks `counter` as abandoned locally.
    pub fn mark_dropped(&mut self, counter: ProcedureCounter) {
        self.dropped = Some(counter);
    }

    /// Clears the dropped marker.
    pub fn clear_dropped(&mut self) {
        self.dropped = None;
    }

    /// Returns `true` only when `counter` is exactly the dropped procedure.
    #[must_use]
    pub fn is_dropped(&self, counter: ProcedureCounter) -> bool {
        self.dropped == Some(counter)
    }

    /// Returns `true` when both sides reported the same most recent procedure.
    #[must_use]
    pub fn aligned(&self) -> bool {
        match (self.most_recent_local, self.most_recent_peer) {
            (Some(local), Some(peer)) => local == peer,
            _ => false,
        }
    }

    /// Most recent procedure the local controller completed.
    #[must_use]
    pub const fn most_recent_local(&self) -> Option<ProcedureCounter> {
        self.most_recent_local
    }

    /// Most recent procedure the peer reported ready.
    #[must_use]
    pub const fn most_recent_peer(&self) -> Option<ProcedureCounter> {
        self.most_recent_peer
    }

    /// Last procedure the peer reported as overwritten.
    #[must_use]
    pub const fn last_overwritten(&self) -> Option<ProcedureCounter> {
        self.last_overwritten
    }

    /// Procedure currently marked as dropped.
    #[must_use]
    pub const fn dropped(&self) -> Option<ProcedureCounter> {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(value: u16) -> ProcedureCounter {
        ProcedureCounter::new(value)
    }

    #[test]
    fn fresh_tracker_is_not_aligned() {
        let tracker = CounterTracker::new();
        assert!(!tracker.aligned());
        assert!(tracker.dropped().is_none());
    }

    #[test]
    fn one_sided_counter_is_not_aligned() {
        let mut tracker = CounterTracker::new();
        tracker.record_local_complete(counter(4));
        assert!(!tracker.aligned());

        let mut tracker = CounterTracker::new();
        tracker.record_peer_ready(counter(4));
        assert!(!tracker.aligned());
    }

    #[test]
    fn alignment_ignores_arrival_order() {
        let mut local_first = CounterTracker::new();
        local_first.record_local_complete(counter(5));
        local_first.record_peer_ready(counter(5));

        let mut peer_first = CounterTracker::new();
        peer_first.record_peer_ready(counter(5));
        peer_first.record_local_complete(counter(5));

        assert!(local_first.aligned());
        assert_eq!(local_first.aligned(), peer_first.aligned());
    }

    #[test]
    fn stale_peer_counter_is_not_aligned() {
        let mut tracker = CounterTracker::new();
        tracker.record_local_complete(counter(7));
        tracker.record_peer_ready(counter(6));
        assert!(!tracker.aligned());

        tracker.record_peer_ready(counter(7));
        assert!(tracker.aligned());
    }

    #[test]
    fn dropped_query_requires_exact_match() {
        let mut tracker = CounterTracker::new();
        tracker.mark_dropped(counter(9));

        assert!(tracker.is_dropped(counter(9)));
        assert!(!tracker.is_dropped(counter(8)));
        assert!(!tracker.is_dropped(counter(10)));

        tracker.clear_dropped();
        assert!(!tracker.is_dropped(counter(9)));
    }

    #[test]
    fn overwritten_notice_does_not_affect_alignment() {
        let mut tracker = CounterTracker::new();
        tracker.record_local_complete(counter(2));
        tracker.record_peer_ready(counter(2));
        tracker.record_peer_overwritten(counter(1));

        assert!(tracker.aligned());
        assert_eq!(tracker.last_overwritten(), Some(counter(1)));
    }
}
