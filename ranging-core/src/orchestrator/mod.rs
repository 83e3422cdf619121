//! Ranging cycle state machine shared between firmware and host targets.
//!
//! A cycle enables one run of procedures, waits for the local controller to
//! finish, waits for the peer to announce the same procedure, fetches the
//! peer's ranging data and hands both step sets to the estimator. Any failed
//! wait routes back to [`RangingState::Idle`] through the retry edge.
//!
//! [`RangingCycle`] only validates transitions and computes deadlines from an
//! abstract instant type. The runtime owns the actual waits and the shared
//! procedure state.

use core::{fmt, ops::Add, time::Duration};

use crate::config::RangingTimeouts;
use crate::controller::ControllerError;
use crate::counters::CounterTracker;
use crate::estimator::{DistanceEstimate, EstimateError};
use crate::procedure::ProcedureCounter;
use crate::retriever::{FetchCompletion, TransferError};

/// Phases of a ranging cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangingState {
    Idle,
    AwaitingLocalComplete,
    AwaitingPeerReady,
    FetchingPeerData,
    Estimating,
}

impl RangingState {
    /// Returns `true` while the cycle is waiting on the controller or the peer.
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(
            self,
            RangingState::AwaitingLocalComplete
                | RangingState::AwaitingPeerReady
                | RangingState::FetchingPeerData
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RangingState::Idle => "idle",
            RangingState::AwaitingLocalComplete => "awaiting-local",
            RangingState::AwaitingPeerReady => "awaiting-peer",
            RangingState::FetchingPeerData => "fetching",
            RangingState::Estimating => "estimating",
        }
    }

    /// Returns `true` when `next` is a legal successor of `self`.
    ///
    /// Every state may fall back to `Idle`; otherwise the cycle only moves
    /// forward one phase at a time.
    #[must_use]
    pub const fn can_transition_to(self, next: RangingState) -> bool {
        matches!(
            (self, next),
            (RangingState::Idle, RangingState::AwaitingLocalComplete)
                | (
                    RangingState::AwaitingLocalComplete,
                    RangingState::AwaitingPeerReady
                )
                | (RangingState::AwaitingPeerReady, RangingState::FetchingPeerData)
                | (RangingState::FetchingPeerData, RangingState::Estimating)
                | (_, RangingState::Idle)
        )
    }
}

impl fmt::Display for RangingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a cycle took the retry edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetryReason {
    /// The local controller did not finish a procedure in time.
    LocalTimeout,
    /// The peer did not announce ranging data in time.
    PeerReadyTimeout,
    /// Local and peer counters disagree.
    CounterMismatch {
        local: Option<ProcedureCounter>,
        peer: Option<ProcedureCounter>,
    },
    /// The controller refused to enable procedures.
    EnableFailed(ControllerError),
    /// The transport refused the ranging-data request.
    FetchRequestFailed(TransferError),
    /// The transfer finished with an error.
    FetchFailed(TransferError),
    /// The transfer did not finish in time.
    FetchTimeout,
}

impl RetryReason {
    /// Number of distinct reasons tracked by [`CycleStats`].
    pub const COUNT: usize = 7;

    /// Stable index used for per-reason counters.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            RetryReason::LocalTimeout => 0,
            RetryReason::PeerReadyTimeout => 1,
            RetryReason::CounterMismatch { .. } => 2,
            RetryReason::EnableFailed(_) => 3,
            RetryReason::FetchRequestFailed(_) => 4,
            RetryReason::FetchFailed(_) => 5,
            RetryReason::FetchTimeout => 6,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            RetryReason::LocalTimeout => "local-timeout",
            RetryReason::PeerReadyTimeout => "peer-ready-timeout",
            RetryReason::CounterMismatch { .. } => "counter-mismatch",
            RetryReason::EnableFailed(_) => "enable-failed",
            RetryReason::FetchRequestFailed(_) => "fetch-request-failed",
            RetryReason::FetchFailed(_) => "fetch-failed",
            RetryReason::FetchTimeout => "fetch-timeout",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::CounterMismatch { local, peer } => {
                f.write_str("counter mismatch (local ")?;
                write_counter(f, *local)?;
                f.write_str(", peer ")?;
                write_counter(f, *peer)?;
                f.write_str(")")
            }
            RetryReason::EnableFailed(err) => write!(f, "enable failed: {err}"),
            RetryReason::FetchRequestFailed(err) => write!(f, "fetch request failed: {err}"),
            RetryReason::FetchFailed(err) => write!(f, "fetch failed: {err}"),
            other => f.write_str(other.label()),
        }
    }
}

fn write_counter(f: &mut fmt::Formatter<'_>, counter: Option<ProcedureCounter>) -> fmt::Result {
    match counter {
        Some(counter) => write!(f, "{counter}"),
        None => f.write_str("none"),
    }
}

/// Result of one completed cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Both step sets reached the estimator and it produced figures.
    Estimated {
        counter: ProcedureCounter,
        estimate: DistanceEstimate,
    },
    /// Both step sets reached the estimator but it declined. Not retried.
    EstimateFailed {
        counter: ProcedureCounter,
        error: EstimateError,
    },
    /// The cycle took the retry edge.
    Retry(RetryReason),
}

impl CycleOutcome {
    /// Returns `true` when the estimator was invoked.
    #[must_use]
    pub const fn reached_estimator(&self) -> bool {
        !matches!(self, CycleOutcome::Retry(_))
    }
}

/// What to do after the peer announced its ranging data.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeerReadyDecision<I> {
    /// Counters are aligned; request `counter` and wait until `deadline`.
    Fetch {
        counter: ProcedureCounter,
        deadline: I,
    },
    /// Counters disagree; the cycle is back at `Idle`.
    Retry(RetryReason),
}

/// Failure reported when attempting an invalid cycle transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransitionError {
    pub from: RangingState,
    pub to: RangingState,
}

impl TransitionError {
    #[must_use]
    pub const fn new(from: RangingState, to: RangingState) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ranging transition {} -> {}", self.from, self.to)
    }
}

/// Setup operations, in the order the session performs them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupStep {
    DefaultSettings,
    SubscribeOverwritten,
    SubscribeReady,
    SubscribeOnDemand,
    SubscribeControlPoint,
    RemoteCapabilities,
    CreateConfig,
    EnableSecurity,
    ProcedureParameters,
}

impl SetupStep {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SetupStep::DefaultSettings => "default settings",
            SetupStep::SubscribeOverwritten => "ranging data overwritten subscribe",
            SetupStep::SubscribeReady => "ranging data ready subscribe",
            SetupStep::SubscribeOnDemand => "on-demand ranging data subscribe",
            SetupStep::SubscribeControlPoint => "control point subscribe",
            SetupStep::RemoteCapabilities => "remote capabilities",
            SetupStep::CreateConfig => "create config",
            SetupStep::EnableSecurity => "security enable",
            SetupStep::ProcedureParameters => "procedure parameters",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Underlying failure of a setup step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupError {
    Controller(ControllerError),
    Transfer(TransferError),
}

impl From<ControllerError> for SetupError {
    fn from(value: ControllerError) -> Self {
        SetupError::Controller(value)
    }
}

impl From<TransferError> for SetupError {
    fn from(value: TransferError) -> Self {
        SetupError::Transfer(value)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Controller(err) => write!(f, "{err}"),
            SetupError::Transfer(err) => write!(f, "{err}"),
        }
    }
}

/// Fatal session errors. Everything else is handled by the retry edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionError {
    /// A setup step failed.
    Setup(SetupStep, SetupError),
    /// The connection to the peer went away during the loop.
    LinkLost,
    /// The configured timeouts cannot drive the loop.
    InvalidTimeouts,
    /// The loop attempted an invalid cycle transition.
    Transition(TransitionError),
}

impl From<TransitionError> for SessionError {
    fn from(value: TransitionError) -> Self {
        SessionError::Transition(value)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Setup(step, err) => write!(f, "{step} failed: {err}"),
            SessionError::LinkLost => f.write_str("link lost"),
            SessionError::InvalidTimeouts => f.write_str("invalid ranging timeouts"),
            SessionError::Transition(err) => write!(f, "{err}"),
        }
    }
}

/// Cumulative counters across cycles.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleStats {
    pub attempts: u32,
    pub estimates: u32,
    pub estimate_failures: u32,
    pub retries: [u32; RetryReason::COUNT],
}

impl CycleStats {
    /// Total retries across every reason.
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.retries.iter().fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    /// Retries recorded for the reason sharing `reason`'s index.
    #[must_use]
    pub const fn retries_for(&self, reason: &RetryReason) -> u32 {
        self.retries[reason.index()]
    }
}

/// Deadline bookkeeping and transition validation for the ranging loop.
#[derive(Clone, Debug)]
pub struct RangingCycle<I> {
    state: RangingState,
    timeouts: RangingTimeouts,
    started_at: Option<I>,
    deadline: Option<I>,
    counter: Option<ProcedureCounter>,
    stats: CycleStats,
}

impl<I> RangingCycle<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    #[must_use]
    pub const fn new(timeouts: RangingTimeouts) -> Self {
        Self {
            state: RangingState::Idle,
            timeouts,
            started_at: None,
            deadline: None,
            counter: None,
            stats: CycleStats {
                attempts: 0,
                estimates: 0,
                estimate_failures: 0,
                retries: [0; RetryReason::COUNT],
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> RangingState {
        self.state
    }

    #[must_use]
    pub const fn timeouts(&self) -> &RangingTimeouts {
        &self.timeouts
    }

    /// Deadline of the active wait, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<I> {
        self.deadline
    }

    /// When the current cycle began.
    #[must_use]
    pub const fn started_at(&self) -> Option<I> {
        self.started_at
    }

    /// Procedure the cycle settled on, once local completion was observed.
    #[must_use]
    pub const fn counter(&self) -> Option<ProcedureCounter> {
        self.counter
    }

    #[must_use]
    pub const fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Returns `true` when the active wait's deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: I) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    fn transition(&mut self, next: RangingState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::new(self.state, next));
        }
        self.state = next;
        Ok(())
    }

    /// Starts a cycle after procedures were enabled. Returns the local
    /// completion deadline.
    pub fn begin(&mut self, now: I) -> Result<I, TransitionError> {
        self.transition(RangingState::AwaitingLocalComplete)?;
        self.stats.attempts = self.stats.attempts.saturating_add(1);
        self.started_at = Some(now);
        self.counter = None;
        let deadline = now + self.timeouts.local_complete;
        self.deadline = Some(deadline);
        Ok(deadline)
    }

    /// Records local completion of `counter`. Returns the peer-ready deadline.
    pub fn local_complete(
        &mut self,
        counter: ProcedureCounter,
        now: I,
    ) -> Result<I, TransitionError> {
        self.transition(RangingState::AwaitingPeerReady)?;
        self.counter = Some(counter);
        let deadline = now + self.timeouts.peer_ready;
        self.deadline = Some(deadline);
        Ok(deadline)
    }

    /// Deadline of the realignment wait that follows a local timeout, or
    /// `None` when the grace window is disabled.
    pub fn realignment_deadline(&mut self, now: I) -> Result<Option<I>, TransitionError> {
        if self.state != RangingState::AwaitingLocalComplete {
            return Err(TransitionError::new(self.state, RangingState::Idle));
        }
        if self.timeouts.realignment_grace.is_zero() {
            self.deadline = None;
            return Ok(None);
        }
        let deadline = now + self.timeouts.realignment_grace;
        self.deadline = Some(deadline);
        Ok(Some(deadline))
    }

    /// Evaluates counter alignment after the peer announced its data.
    pub fn peer_ready(
        &mut self,
        tracker: &CounterTracker,
        now: I,
    ) -> Result<PeerReadyDecision<I>, TransitionError> {
        if self.state != RangingState::AwaitingPeerReady {
            return Err(TransitionError::new(
                self.state,
                RangingState::FetchingPeerData,
            ));
        }

        match tracker.most_recent_local() {
            Some(counter) if tracker.aligned() => {
                self.transition(RangingState::FetchingPeerData)?;
                self.counter = Some(counter);
                let deadline = now + self.timeouts.fetch;
                self.deadline = Some(deadline);
                Ok(PeerReadyDecision::Fetch { counter, deadline })
            }
            local => {
                let reason = RetryReason::CounterMismatch {
                    local,
                    peer: tracker.most_recent_peer(),
                };
                Ok(PeerReadyDecision::Retry(self.retry(reason)))
            }
        }
    }

    /// Records the final status of the fetch.
    ///
    /// A successful transfer moves the cycle to `Estimating` and returns
    /// `None`; a failed one takes the retry edge and returns the reason.
    pub fn fetch_completed(
        &mut self,
        completion: &FetchCompletion,
    ) -> Result<Option<RetryReason>, TransitionError> {
        if self.state != RangingState::FetchingPeerData {
            return Err(TransitionError::new(self.state, RangingState::Estimating));
        }

        match completion.result {
            Ok(()) => {
                self.transition(RangingState::Estimating)?;
                self.deadline = None;
                Ok(None)
            }
            Err(err) => Ok(Some(self.retry(RetryReason::FetchFailed(err)))),
        }
    }

    /// Closes an `Estimating` cycle with the estimator's result.
    pub fn finish_estimate(
        &mut self,
        result: Result<DistanceEstimate, EstimateError>,
    ) -> Result<CycleOutcome, TransitionError> {
        let (RangingState::Estimating, Some(counter)) = (self.state, self.counter) else {
            return Err(TransitionError::new(self.state, RangingState::Idle));
        };

        self.transition(RangingState::Idle)?;
        self.clear_cycle();
        let outcome = match result {
            Ok(estimate) => {
                self.stats.estimates = self.stats.estimates.saturating_add(1);
                CycleOutcome::Estimated { counter, estimate }
            }
            Err(error) => {
                self.stats.estimate_failures = self.stats.estimate_failures.saturating_add(1);
                CycleOutcome::EstimateFailed { counter, error }
            }
        };
        Ok(outcome)
    }

    /// Takes the retry edge from any state.
    pub fn retry(&mut self, reason: RetryReason) -> RetryReason {
        self.state = RangingState::Idle;
        self.clear_cycle();
        let slot = &mut self.stats.retries[reason.index()];
        *slot = slot.saturating_add(1);
        reason
    }

    fn clear_cycle(&mut self) {
        self.started_at = None;
        self.deadline = None;
        self.counter = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct MockInstant(u64);

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX))
        }
    }

    fn counter(value: u16) -> ProcedureCounter {
        ProcedureCounter::new(value)
    }

    fn aligned_tracker(value: u16) -> CounterTracker {
        let mut tracker = CounterTracker::new();
        tracker.record_local_complete(counter(value));
        tracker.record_peer_ready(counter(value));
        tracker
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);

        assert_eq!(cycle.begin(MockInstant(0)), Ok(MockInstant(1_000)));
        assert_eq!(cycle.state(), RangingState::AwaitingLocalComplete);

        assert_eq!(
            cycle.local_complete(counter(5), MockInstant(400)),
            Ok(MockInstant(1_400))
        );

        let decision = cycle
            .peer_ready(&aligned_tracker(5), MockInstant(500))
            .expect("valid transition");
        assert_eq!(
            decision,
            PeerReadyDecision::Fetch {
                counter: counter(5),
                deadline: MockInstant(5_500)
            }
        );

        let retry = cycle
            .fetch_completed(&FetchCompletion::success(counter(5)))
            .expect("valid transition");
        assert!(retry.is_none());
        assert_eq!(cycle.state(), RangingState::Estimating);

        let outcome = cycle
            .finish_estimate(Ok(DistanceEstimate::default()))
            .expect("valid transition");
        assert_eq!(
            outcome,
            CycleOutcome::Estimated {
                counter: counter(5),
                estimate: DistanceEstimate::default()
            }
        );
        assert_eq!(cycle.state(), RangingState::Idle);
        assert_eq!(cycle.stats().estimates, 1);
        assert_eq!(cycle.stats().total_retries(), 0);
    }

    #[test]
    fn mismatched_counters_take_retry_edge() {
        let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
        cycle.begin(MockInstant(0)).expect("begin");
        cycle
            .local_complete(counter(7), MockInstant(10))
            .expect("local");

        let mut tracker = CounterTracker::new();
        tracker.record_local_complete(counter(7));
        tracker.record_peer_ready(counter(6));

        let decision = cycle
            .peer_ready(&tracker, MockInstant(20))
            .expect("valid transition");
        let expected = RetryReason::CounterMismatch {
            local: Some(counter(7)),
            peer: Some(counter(6)),
        };
        assert_eq!(decision, PeerReadyDecision::Retry(expected));
        assert_eq!(cycle.state(), RangingState::Idle);
        assert_eq!(cycle.stats().retries_for(&expected), 1);
    }

    #[test]
    fn failed_fetch_counts_as_retry() {
        let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
        cycle.begin(MockInstant(0)).expect("begin");
        cycle.local_complete(counter(2), MockInstant(0)).expect("local");
        cycle
            .peer_ready(&aligned_tracker(2), MockInstant(0))
            .expect("peer");

        let reason = cycle
            .fetch_completed(&FetchCompletion::failure(
                counter(2),
                TransferError::Rejected(-5),
            ))
            .expect("valid transition");
        assert_eq!(
            reason,
            Some(RetryReason::FetchFailed(TransferError::Rejected(-5)))
        );
        assert_eq!(cycle.state(), RangingState::Idle);
        assert!(cycle.deadline().is_none());
    }

    #[test]
    fn estimate_failure_is_not_a_retry() {
        let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
        cycle.begin(MockInstant(0)).expect("begin");
        cycle.local_complete(counter(3), MockInstant(0)).expect("local");
        cycle
            .peer_ready(&aligned_tracker(3), MockInstant(0))
            .expect("peer");
        cycle
            .fetch_completed(&FetchCompletion::success(counter(3)))
            .expect("fetch");

        let outcome = cycle
            .finish_estimate(Err(EstimateError::NoSteps))
            .expect("valid transition");
        assert!(outcome.reached_estimator());
        assert_eq!(cycle.stats().estimate_failures, 1);
        assert_eq!(cycle.stats().total_retries(), 0);
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut cycle = RangingCycle::<MockInstant>::new(RangingTimeouts::DEFAULT);

        assert_eq!(
            cycle.local_complete(counter(1), MockInstant(0)),
            Err(TransitionError::new(
                RangingState::Idle,
                RangingState::AwaitingPeerReady
            ))
        );
        assert!(
            cycle
                .fetch_completed(&FetchCompletion::success(counter(1)))
                .is_err()
        );
        assert!(cycle.finish_estimate(Ok(DistanceEstimate::default())).is_err());

        cycle.begin(MockInstant(0)).expect("begin");
        assert!(cycle.begin(MockInstant(1)).is_err());
    }

    #[test]
    fn realignment_window_follows_local_timeout() {
        let mut cycle = RangingCycle::new(RangingTimeouts::DEFAULT);
        cycle.begin(MockInstant(0)).expect("begin");
        assert!(cycle.is_expired(MockInstant(1_000)));

        assert_eq!(
            cycle.realignment_deadline(MockInstant(1_000)),
            Ok(Some(MockInstant(2_000)))
        );
        cycle.retry(RetryReason::LocalTimeout);
        assert_eq!(cycle.stats().retries_for(&RetryReason::LocalTimeout), 1);
        assert_eq!(cycle.stats().attempts, 1);

        let no_grace = RangingTimeouts {
            realignment_grace: Duration::ZERO,
            ..RangingTimeouts::DEFAULT
        };
        let mut cycle = RangingCycle::new(no_grace);
        cycle.begin(MockInstant(0)).expect("begin");
        assert_eq!(cycle.realignment_deadline(MockInstant(1_000)), Ok(None));
    }

    #[test]
    fn every_state_can_fall_back_to_idle() {
        for state in [
            RangingState::Idle,
            RangingState::AwaitingLocalComplete,
            RangingState::AwaitingPeerReady,
            RangingState::FetchingPeerData,
            RangingState::Estimating,
        ] {
            assert!(state.can_transition_to(RangingState::Idle));
        }
        assert!(!RangingState::Idle.can_transition_to(RangingState::Estimating));
    }
}
