//! Shared per-session procedure state.
//!
//! [`ProcedureState`] holds the counters and fetch bookkeeping that
//! notification handlers and the ranging loop both update; every method
//! completes without blocking. The step data lives apart in [`StepBuffers`]
//! so the runtime can guard the two separately and run the estimator without
//! holding the bookkeeping lock.

use crate::buffer::{LOCAL_PROCEDURE_MEM, PEER_PROCEDURE_MEM, StepBuffer};
use crate::counters::CounterTracker;
use crate::estimator::{DistanceEstimate, DistanceEstimator, EstimateError};
use crate::ingest::{IngestOutcome, LocalProgress, ingest_subevent, refuse_subevent};
use crate::procedure::{ProcedureCounter, Role, SubeventResult};
use crate::retriever::{FetchCompletion, PeerDataRetriever, SegmentOutcome, TransferError};

/// Bookkeeping cleared by [`ProcedureState::reset_for_retry`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReset {
    /// Procedure that was still accumulating and is now marked dropped.
    pub dropped: Option<ProcedureCounter>,
    /// Completed procedure whose steps were released from the local buffer.
    pub released: Option<ProcedureCounter>,
    /// Fetch that was outstanding and has been abandoned.
    pub cancelled_fetch: Option<ProcedureCounter>,
}

/// Local and peer step data of one ranging session.
#[derive(Clone, Debug)]
pub struct StepBuffers<
    const LOCAL: usize = LOCAL_PROCEDURE_MEM,
    const PEER: usize = PEER_PROCEDURE_MEM,
> {
    local: StepBuffer<LOCAL>,
    peer: StepBuffer<PEER>,
}

impl<const LOCAL: usize, const PEER: usize> StepBuffers<LOCAL, PEER> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            local: StepBuffer::new(),
            peer: StepBuffer::new(),
        }
    }

    #[must_use]
    pub fn local_steps(&self) -> &[u8] {
        self.local.snapshot()
    }

    #[must_use]
    pub fn peer_steps(&self) -> &[u8] {
        self.peer.snapshot()
    }

    /// Empties both buffers.
    pub fn reset(&mut self) {
        self.local.reset();
        self.peer.reset();
    }

    /// Runs `estimator` over the buffered step sets.
    pub fn estimate<E>(
        &self,
        estimator: &mut E,
        antenna_paths: u8,
        role: Role,
    ) -> Result<DistanceEstimate, EstimateError>
    where
        E: DistanceEstimator,
    {
        estimator.estimate(
            self.local.snapshot(),
            self.peer.snapshot(),
            antenna_paths,
            role,
        )
    }
}

impl<const LOCAL: usize, const PEER: usize> Default for StepBuffers<LOCAL, PEER> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and fetch bookkeeping of one ranging session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcedureState {
    tracker: CounterTracker,
    progress: LocalProgress,
    retriever: PeerDataRetriever,
}

impl ProcedureState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tracker: CounterTracker::new(),
            progress: LocalProgress::new(),
            retriever: PeerDataRetriever::new(),
        }
    }

    /// Feeds a local subevent result into the local step buffer.
    pub fn ingest_subevent<const LOCAL: usize, const PEER: usize>(
        &mut self,
        steps: &mut StepBuffers<LOCAL, PEER>,
        result: &SubeventResult<'_>,
    ) -> IngestOutcome {
        ingest_subevent(
            &mut steps.local,
            &mut self.tracker,
            &mut self.progress,
            result,
        )
    }

    /// Accounts for a subevent that arrived while the step buffers were
    /// unavailable.
    pub fn refuse_subevent(&mut self, result: &SubeventResult<'_>) -> IngestOutcome {
        refuse_subevent(&mut self.tracker, &self.progress, result.counter)
    }

    pub fn record_peer_ready(&mut self, counter: ProcedureCounter) {
        self.tracker.record_peer_ready(counter);
    }

    pub fn record_peer_overwritten(&mut self, counter: ProcedureCounter) {
        self.tracker.record_peer_overwritten(counter);
    }

    /// Reserves the fetch slot for `counter` and clears the peer buffer.
    pub fn begin_fetch<const LOCAL: usize, const PEER: usize>(
        &mut self,
        steps: &mut StepBuffers<LOCAL, PEER>,
        counter: ProcedureCounter,
    ) -> Result<(), TransferError> {
        self.retriever.begin_fetch(counter)?;
        steps.peer.reset();
        Ok(())
    }

    /// Releases the fetch slot after the transport refused the request.
    ///
    /// Partial peer data stays until the next fetch or the retry edge clears
    /// it.
    pub fn abort_fetch(&mut self) -> Option<ProcedureCounter> {
        self.retriever.cancel()
    }

    /// Appends a reassembled segment of the peer's ranging data.
    pub fn append_peer_segment<const LOCAL: usize, const PEER: usize>(
        &mut self,
        steps: &mut StepBuffers<LOCAL, PEER>,
        segment: &[u8],
    ) -> SegmentOutcome {
        self.retriever.accept_segment(&mut steps.peer, segment)
    }

    /// Accounts for a segment that arrived while the step buffers were
    /// unavailable.
    pub fn refuse_peer_segment(&mut self) -> SegmentOutcome {
        self.retriever.lose_segment()
    }

    /// Closes the outstanding fetch; see [`PeerDataRetriever::complete`].
    ///
    /// The peer buffer of a failed fetch is cleared by the next
    /// [`begin_fetch`](Self::begin_fetch) or the retry edge.
    pub fn complete_fetch(&mut self, completion: FetchCompletion) -> Option<FetchCompletion> {
        self.retriever.complete(completion)
    }

    /// Returns the session to a clean slate between cycles.
    ///
    /// Both buffers are emptied, the held procedure is released and any
    /// outstanding fetch is forgotten. A procedure that was still accumulating,
    /// or that was turned away while the buffer was held, stays marked dropped
    /// so its remaining subevents cannot refill the fresh buffer; otherwise the
    /// dropped marker is cleared.
    pub fn reset_for_retry<const LOCAL: usize, const PEER: usize>(
        &mut self,
        steps: &mut StepBuffers<LOCAL, PEER>,
    ) -> CycleReset {
        steps.reset();

        let cancelled_fetch = self.retriever.cancel();
        let released = self.progress.take_completed();
        let dropped = self
            .progress
            .take_in_flight()
            .or_else(|| released.and(self.tracker.dropped()));
        match dropped {
            Some(counter) => self.tracker.mark_dropped(counter),
            None => self.tracker.clear_dropped(),
        }

        CycleReset {
            dropped,
            released,
            cancelled_fetch,
        }
    }

    #[must_use]
    pub const fn antenna_paths(&self) -> u8 {
        self.progress.antenna_paths()
    }

    #[must_use]
    pub const fn tracker(&self) -> &CounterTracker {
        &self.tracker
    }

    #[must_use]
    pub const fn progress(&self) -> &LocalProgress {
        &self.progress
    }

    #[must_use]
    pub const fn retriever(&self) -> &PeerDataRetriever {
        &self.retriever
    }
}
