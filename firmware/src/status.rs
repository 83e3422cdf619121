//! Lock-free status counters for a ranging session.
//!
//! The ranging loop publishes its state and tallies here so diagnostics can
//! read them from any context without touching the session mutex.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use ranging_core::orchestrator::{CycleOutcome, CycleStats, RangingState, RetryReason};
use ranging_core::procedure::ProcedureCounter;

const UNKNOWN_COUNTER: u32 = 0;

fn encode_counter(counter: Option<ProcedureCounter>) -> u32 {
    counter.map_or(UNKNOWN_COUNTER, |counter| u32::from(counter.value()) + 1)
}

fn decode_counter(raw: u32) -> Option<ProcedureCounter> {
    let value = raw.checked_sub(1)?;
    u16::try_from(value).ok().map(ProcedureCounter::new)
}

const fn encode_state(state: RangingState) -> u8 {
    match state {
        RangingState::Idle => 0,
        RangingState::AwaitingLocalComplete => 1,
        RangingState::AwaitingPeerReady => 2,
        RangingState::FetchingPeerData => 3,
        RangingState::Estimating => 4,
    }
}

const fn decode_state(raw: u8) -> RangingState {
    match raw {
        1 => RangingState::AwaitingLocalComplete,
        2 => RangingState::AwaitingPeerReady,
        3 => RangingState::FetchingPeerData,
        4 => RangingState::Estimating,
        _ => RangingState::Idle,
    }
}

/// Atomic mirror of the ranging loop's progress.
#[derive(Debug)]
pub struct SessionStatus {
    state: AtomicU8,
    /// Counter of the last estimated procedure (+1, 0 == none).
    last_estimated: AtomicU32,
    attempts: AtomicU32,
    estimates: AtomicU32,
    estimate_failures: AtomicU32,
    retries: [AtomicU32; RetryReason::COUNT],
    link_up: AtomicBool,
}

impl SessionStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(encode_state(RangingState::Idle)),
            last_estimated: AtomicU32::new(UNKNOWN_COUNTER),
            attempts: AtomicU32::new(0),
            estimates: AtomicU32::new(0),
            estimate_failures: AtomicU32::new(0),
            retries: [const { AtomicU32::new(0) }; RetryReason::COUNT],
            link_up: AtomicBool::new(true),
        }
    }

    pub fn record_state(&self, state: RangingState) {
        self.state.store(encode_state(state), Ordering::Relaxed);
    }

    #[must_use]
    pub fn state(&self) -> RangingState {
        decode_state(self.state.load(Ordering::Relaxed))
    }

    pub fn record_cycle_started(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Tallies the outcome of a finished cycle.
    pub fn record_outcome(&self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Estimated { counter, .. } => {
                self.estimates.fetch_add(1, Ordering::Relaxed);
                self.last_estimated
                    .store(encode_counter(Some(*counter)), Ordering::Relaxed);
            }
            CycleOutcome::EstimateFailed { .. } => {
                self.estimate_failures.fetch_add(1, Ordering::Relaxed);
            }
            CycleOutcome::Retry(reason) => {
                self.retries[reason.index()].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.record_state(RangingState::Idle);
    }

    pub fn record_link_lost(&self) {
        self.link_up.store(false, Ordering::Relaxed);
        self.record_state(RangingState::Idle);
    }

    #[must_use]
    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    /// Counter of the most recent procedure that produced an estimate.
    #[must_use]
    pub fn last_estimated(&self) -> Option<ProcedureCounter> {
        decode_counter(self.last_estimated.load(Ordering::Relaxed))
    }

    /// Reassembles the tallies into [`CycleStats`].
    #[must_use]
    pub fn stats(&self) -> CycleStats {
        let mut retries = [0; RetryReason::COUNT];
        for (slot, counter) in retries.iter_mut().zip(&self.retries) {
            *slot = counter.load(Ordering::Relaxed);
        }
        CycleStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            estimates: self.estimates.load(Ordering::Relaxed),
            estimate_failures: self.estimate_failures.load(Ordering::Relaxed),
            retries,
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ranging_core::estimator::DistanceEstimate;

    #[test]
    fn counter_encoding_reserves_zero_for_none() {
        assert_eq!(encode_counter(None), 0);
        assert_eq!(decode_counter(0), None);
        let max = ProcedureCounter::new(u16::MAX);
        assert_eq!(decode_counter(encode_counter(Some(max))), Some(max));
    }

    #[test]
    fn outcomes_accumulate_into_stats() {
        let status = SessionStatus::new();
        status.record_cycle_started();
        status.record_state(RangingState::FetchingPeerData);
        assert_eq!(status.state(), RangingState::FetchingPeerData);

        status.record_outcome(&CycleOutcome::Estimated {
            counter: ProcedureCounter::new(5),
            estimate: DistanceEstimate::default(),
        });
        status.record_cycle_started();
        status.record_outcome(&CycleOutcome::Retry(RetryReason::FetchTimeout));

        let stats = status.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.estimates, 1);
        assert_eq!(stats.retries_for(&RetryReason::FetchTimeout), 1);
        assert_eq!(stats.total_retries(), 1);
        assert_eq!(status.last_estimated(), Some(ProcedureCounter::new(5)));
        assert_eq!(status.state(), RangingState::Idle);
        assert!(status.link_up());
    }
}
