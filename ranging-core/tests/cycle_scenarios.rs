use core::ops::Add;
use core::time::Duration;

use ranging_core::config::RangingTimeouts;
use ranging_core::estimator::{DistanceEstimate, DistanceEstimator, EstimateError};
use ranging_core::ingest::IngestOutcome;
use ranging_core::orchestrator::{
    CycleOutcome, PeerReadyDecision, RangingCycle, RangingState, RetryReason,
};
use ranging_core::procedure::{ProcedureCounter, Role, SubeventResult};
use ranging_core::retriever::{FetchCompletion, SegmentOutcome};
use ranging_core::state::{ProcedureState, StepBuffers};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MockInstant(u64);

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_millis()).expect("test durations fit"))
    }
}

#[derive(Default)]
struct CountingEstimator {
    calls: usize,
    local_len: usize,
    peer_len: usize,
    paths: u8,
}

impl DistanceEstimator for CountingEstimator {
    fn estimate(
        &mut self,
        local_steps: &[u8],
        peer_steps: &[u8],
        antenna_paths: u8,
        role: Role,
    ) -> Result<DistanceEstimate, EstimateError> {
        assert_eq!(role, Role::Initiator);
        self.calls += 1;
        self.local_len = local_steps.len();
        self.peer_len = peer_steps.len();
        self.paths = antenna_paths;
        Ok(DistanceEstimate {
            ifft: Some(1.0),
            phase_slope: None,
            rtt: None,
        })
    }
}

type Steps = StepBuffers<64, 64>;

fn counter(value: u16) -> ProcedureCounter {
    ProcedureCounter::new(value)
}

#[test]
fn aligned_counter_flows_through_to_estimator() {
    let mut state = ProcedureState::new();
    let mut steps = Steps::new();
    let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
    let mut estimator = CountingEstimator::default();

    cycle.begin(MockInstant(0)).expect("begin");

    let chunk = [0xAAu8; 10];
    for _ in 0..2 {
        state.ingest_subevent(&mut steps, &SubeventResult::continuing(counter(5), 4, &chunk));
    }
    let outcome =
        state.ingest_subevent(&mut steps, &SubeventResult::complete(counter(5), 4, &chunk));
    assert_eq!(outcome, IngestOutcome::ProcedureComplete(counter(5)));

    cycle
        .local_complete(counter(5), MockInstant(300))
        .expect("local complete");
    state.record_peer_ready(counter(5));

    let PeerReadyDecision::Fetch { counter: fetch, .. } = cycle
        .peer_ready(state.tracker(), MockInstant(400))
        .expect("peer ready")
    else {
        panic!("expected fetch decision");
    };
    state.begin_fetch(&mut steps, fetch).expect("fetch slot free");

    assert_eq!(
        state.append_peer_segment(&mut steps, &[1; 20]),
        SegmentOutcome::Appended(counter(5))
    );
    let completion = state
        .complete_fetch(FetchCompletion::success(counter(5)))
        .expect("matching completion");
    assert!(cycle.fetch_completed(&completion).expect("fetch").is_none());

    let result = steps.estimate(&mut estimator, state.antenna_paths(), Role::Initiator);
    let outcome = cycle.finish_estimate(result).expect("finish");
    state.reset_for_retry(&mut steps);

    assert!(matches!(
        outcome,
        CycleOutcome::Estimated { counter: c, .. } if c == counter(5)
    ));
    assert_eq!(estimator.calls, 1);
    assert_eq!(estimator.local_len, 30);
    assert_eq!(estimator.peer_len, 20);
    assert_eq!(estimator.paths, 4);
    assert!(steps.local_steps().is_empty());
    assert!(steps.peer_steps().is_empty());
}

#[test]
fn stale_peer_counter_never_fetches() {
    let mut state = ProcedureState::new();
    let mut steps = Steps::new();
    let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);

    cycle.begin(MockInstant(0)).expect("begin");
    state.ingest_subevent(&mut steps, &SubeventResult::complete(counter(7), 1, &[1, 2, 3]));
    cycle
        .local_complete(counter(7), MockInstant(10))
        .expect("local complete");
    state.record_peer_ready(counter(6));

    let decision = cycle
        .peer_ready(state.tracker(), MockInstant(20))
        .expect("peer ready");
    assert_eq!(
        decision,
        PeerReadyDecision::Retry(RetryReason::CounterMismatch {
            local: Some(counter(7)),
            peer: Some(counter(6)),
        })
    );
    state.reset_for_retry(&mut steps);

    assert!(state.retriever().outstanding().is_none());
    assert!(steps.local_steps().is_empty());
    assert!(steps.peer_steps().is_empty());
    assert_eq!(cycle.state(), RangingState::Idle);
}

#[test]
fn overflow_surfaces_as_local_timeout() {
    let mut state = ProcedureState::new();
    let mut steps = Steps::new();
    let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
    let deadline = cycle.begin(MockInstant(0)).expect("begin");

    state.ingest_subevent(&mut steps, &SubeventResult::continuing(counter(9), 1, &[0; 40]));
    let overflow =
        state.ingest_subevent(&mut steps, &SubeventResult::continuing(counter(9), 1, &[0; 40]));
    assert!(matches!(overflow, IngestOutcome::Overflow { .. }));
    let late =
        state.ingest_subevent(&mut steps, &SubeventResult::complete(counter(9), 1, &[0; 4]));
    assert_eq!(late, IngestOutcome::Ignored(counter(9)));

    assert!(cycle.is_expired(deadline));
    assert!(state.tracker().most_recent_local().is_none());
    let reason = cycle.retry(RetryReason::LocalTimeout);
    state.reset_for_retry(&mut steps);

    assert_eq!(reason, RetryReason::LocalTimeout);
    assert_eq!(cycle.stats().retries_for(&RetryReason::LocalTimeout), 1);
    assert!(steps.local_steps().is_empty());
}

#[test]
fn fetch_timeout_skips_estimator_and_frees_slot() {
    let mut state = ProcedureState::new();
    let mut steps = Steps::new();
    let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
    let estimator = CountingEstimator::default();

    cycle.begin(MockInstant(0)).expect("begin");
    state.ingest_subevent(&mut steps, &SubeventResult::complete(counter(3), 1, &[5; 8]));
    cycle.local_complete(counter(3), MockInstant(1)).expect("local");
    state.record_peer_ready(counter(3));
    let decision = cycle
        .peer_ready(state.tracker(), MockInstant(2))
        .expect("peer ready");
    let PeerReadyDecision::Fetch { deadline, .. } = decision else {
        panic!("expected fetch decision");
    };
    state.begin_fetch(&mut steps, counter(3)).expect("fetch");
    state.append_peer_segment(&mut steps, &[1, 2]);

    assert_eq!(deadline, MockInstant(5_002));
    assert!(cycle.is_expired(MockInstant(5_002)));
    cycle.retry(RetryReason::FetchTimeout);
    let reset = state.reset_for_retry(&mut steps);

    assert_eq!(reset.cancelled_fetch, Some(counter(3)));
    assert_eq!(estimator.calls, 0);
    assert!(steps.peer_steps().is_empty());
    assert_eq!(
        state.append_peer_segment(&mut steps, &[9]),
        SegmentOutcome::Stray,
        "late segments after the retry edge are dropped"
    );
    state.begin_fetch(&mut steps, counter(4)).expect("slot released");
}

#[test]
fn back_to_back_procedures_keep_the_completed_steps() {
    let mut state = ProcedureState::new();
    let mut steps = Steps::new();
    let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
    let mut estimator = CountingEstimator::default();

    cycle.begin(MockInstant(0)).expect("begin");
    state.ingest_subevent(&mut steps, &SubeventResult::complete(counter(5), 1, &[1; 30]));
    let next =
        state.ingest_subevent(&mut steps, &SubeventResult::continuing(counter(6), 1, &[2; 20]));
    assert_eq!(
        next,
        IngestOutcome::BufferHeld {
            counter: counter(6),
            held: counter(5),
        }
    );

    cycle.local_complete(counter(5), MockInstant(1)).expect("local");
    state.record_peer_ready(counter(5));
    let PeerReadyDecision::Fetch { counter: fetch, .. } = cycle
        .peer_ready(state.tracker(), MockInstant(2))
        .expect("peer ready")
    else {
        panic!("expected fetch decision");
    };
    state.begin_fetch(&mut steps, fetch).expect("fetch");
    state.append_peer_segment(&mut steps, &[3; 10]);
    let completion = state
        .complete_fetch(FetchCompletion::success(fetch))
        .expect("matching completion");
    assert!(cycle.fetch_completed(&completion).expect("fetch").is_none());

    let result = steps.estimate(&mut estimator, state.antenna_paths(), Role::Initiator);
    cycle.finish_estimate(result).expect("finish");
    let reset = state.reset_for_retry(&mut steps);

    assert_eq!(estimator.local_len, 30);
    assert_eq!(reset.released, Some(counter(5)));
    assert_eq!(reset.dropped, Some(counter(6)));
}
