//! Per-subevent handling of local controller results.
//!
//! One aborted subevent or one overflowing append invalidates the whole
//! procedure: the buffer is cleared and the counter marked dropped so the
//! remaining subevents of that procedure are ignored. A completed procedure
//! holds the buffer until the retry edge releases it; subevents of any later
//! procedure are turned away in the meantime. The function never blocks and
//! never logs; callers inspect the returned [`IngestOutcome`].

use crate::buffer::{BufferOverflow, StepBuffer};
use crate::counters::CounterTracker;
use crate::procedure::{ProcedureCounter, ProcedureStatus, SubeventResult, SubeventStatus};

/// Local procedure progress carried between subevent notifications.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LocalProgress {
    antenna_paths: u8,
    in_flight: Option<ProcedureCounter>,
    completed: Option<ProcedureCounter>,
}

impl LocalProgress {
    /// Creates progress state with no procedure accumulating.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            antenna_paths: 0,
            in_flight: None,
            completed: None,
        }
    }

    /// Antenna path count from the most recent accepted subevent.
    #[must_use]
    pub const fn antenna_paths(&self) -> u8 {
        self.antenna_paths
    }

    /// Procedure whose subevents are accumulating but has not finished yet.
    #[must_use]
    pub const fn in_flight(&self) -> Option<ProcedureCounter> {
        self.in_flight
    }

    /// Forgets the procedure currently accumulating, returning it.
    pub fn take_in_flight(&mut self) -> Option<ProcedureCounter> {
        self.in_flight.take()
    }

    /// Completed procedure whose steps are held in the buffer.
    #[must_use]
    pub const fn completed(&self) -> Option<ProcedureCounter> {
        self.completed
    }

    /// Releases the held procedure, returning it.
    pub fn take_completed(&mut self) -> Option<ProcedureCounter> {
        self.completed.take()
    }
}

/// Result of feeding one subevent into the local step buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// The subevent was aborted; the procedure is dropped.
    SubeventAborted(ProcedureCounter),
    /// The subevent belongs to an already dropped procedure.
    Ignored(ProcedureCounter),
    /// The buffer still holds the completed `held` procedure; `counter` is
    /// dropped without touching it.
    BufferHeld {
        counter: ProcedureCounter,
        held: ProcedureCounter,
    },
    /// The local buffer was unavailable; the procedure is dropped.
    BufferBusy(ProcedureCounter),
    /// The step data did not fit; the procedure is dropped.
    Overflow {
        counter: ProcedureCounter,
        overflow: BufferOverflow,
    },
    /// Step data was appended and more subevents are expected.
    Accumulated {
        counter: ProcedureCounter,
        buffered: usize,
    },
    /// The procedure finished; the orchestrator should be signalled.
    ProcedureComplete(ProcedureCounter),
    /// The controller aborted the procedure; its steps were discarded.
    ProcedureAborted(ProcedureCounter),
}

impl IngestOutcome {
    /// Counter the subevent was reported for.
    #[must_use]
    pub const fn counter(&self) -> ProcedureCounter {
        match self {
            IngestOutcome::SubeventAborted(counter)
            | IngestOutcome::Ignored(counter)
            | IngestOutcome::BufferBusy(counter)
            | IngestOutcome::ProcedureComplete(counter)
            | IngestOutcome::ProcedureAborted(counter)
            | IngestOutcome::BufferHeld { counter, .. }
            | IngestOutcome::Overflow { counter, .. }
            | IngestOutcome::Accumulated { counter, .. } => *counter,
        }
    }

    /// Returns `true` when the local procedure finished and should be paired.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, IngestOutcome::ProcedureComplete(_))
    }
}

/// Feeds one subevent result into `buffer`, updating `tracker` and `progress`.
pub fn ingest_subevent<const CAPACITY: usize>(
    buffer: &mut StepBuffer<CAPACITY>,
    tracker: &mut CounterTracker,
    progress: &mut LocalProgress,
    result: &SubeventResult<'_>,
) -> IngestOutcome {
    let counter = result.counter;

    if let Some(outcome) = turn_away_while_held(tracker, progress, counter) {
        return outcome;
    }

    if result.subevent_status == SubeventStatus::Aborted {
        abandon(buffer, tracker, progress, counter);
        return IngestOutcome::SubeventAborted(counter);
    }

    if tracker.is_dropped(counter) {
        return IngestOutcome::Ignored(counter);
    }

    // Leftovers from a procedure that never reported completion must not mix
    // with the steps of a newer one.
    if let Some(previous) = progress.in_flight
        && previous != counter
    {
        buffer.reset();
    }

    if let Some(step_data) = result.step_data
        && let Err(overflow) = buffer.append(step_data)
    {
        abandon(buffer, tracker, progress, counter);
        return IngestOutcome::Overflow { counter, overflow };
    }

    tracker.clear_dropped();
    progress.antenna_paths = result.antenna_paths;

    match result.procedure_status {
        ProcedureStatus::Continuing => {
            progress.in_flight = Some(counter);
            IngestOutcome::Accumulated {
                counter,
                buffered: buffer.len(),
            }
        }
        ProcedureStatus::Complete => {
            progress.in_flight = None;
            progress.completed = Some(counter);
            tracker.record_local_complete(counter);
            IngestOutcome::ProcedureComplete(counter)
        }
        ProcedureStatus::Aborted => {
            progress.in_flight = None;
            buffer.reset();
            IngestOutcome::ProcedureAborted(counter)
        }
    }
}

/// Accounts for a subevent whose step data could not reach the buffer.
///
/// The procedure is marked dropped so none of its later subevents complete
/// it. A procedure already accumulating keeps its in-flight marker; the next
/// accepted procedure or the retry edge clears its partial steps.
pub fn refuse_subevent(
    tracker: &mut CounterTracker,
    progress: &LocalProgress,
    counter: ProcedureCounter,
) -> IngestOutcome {
    if let Some(outcome) = turn_away_while_held(tracker, progress, counter) {
        return outcome;
    }
    if tracker.is_dropped(counter) {
        return IngestOutcome::Ignored(counter);
    }
    tracker.mark_dropped(counter);
    IngestOutcome::BufferBusy(counter)
}

fn turn_away_while_held(
    tracker: &mut CounterTracker,
    progress: &LocalProgress,
    counter: ProcedureCounter,
) -> Option<IngestOutcome> {
    let held = progress.completed?;
    if tracker.is_dropped(counter) {
        return Some(IngestOutcome::Ignored(counter));
    }
    if held != counter {
        tracker.mark_dropped(counter);
    }
    Some(IngestOutcome::BufferHeld { counter, held })
}

fn abandon<const CAPACITY: usize>(
    buffer: &mut StepBuffer<CAPACITY>,
    tracker: &mut CounterTracker,
    progress: &mut LocalProgress,
    counter: ProcedureCounter,
) {
    tracker.mark_dropped(counter);
    buffer.reset();
    progress.in_flight = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        buffer: StepBuffer<16>,
        tracker: CounterTracker,
        progress: LocalProgress,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                buffer: StepBuffer::new(),
                tracker: CounterTracker::new(),
                progress: LocalProgress::new(),
            }
        }

        fn feed(&mut self, result: SubeventResult<'_>) -> IngestOutcome {
            ingest_subevent(
                &mut self.buffer,
                &mut self.tracker,
                &mut self.progress,
                &result,
            )
        }
    }

    fn counter(value: u16) -> ProcedureCounter {
        ProcedureCounter::new(value)
    }

    #[test]
    fn multi_subevent_procedure_completes() {
        let mut fx = Fixture::new();

        assert_eq!(
            fx.feed(SubeventResult::continuing(counter(5), 2, &[1, 2, 3])),
            IngestOutcome::Accumulated {
                counter: counter(5),
                buffered: 3
            }
        );
        assert_eq!(fx.progress.in_flight(), Some(counter(5)));

        let outcome = fx.feed(SubeventResult::complete(counter(5), 4, &[4, 5]));
        assert_eq!(outcome, IngestOutcome::ProcedureComplete(counter(5)));
        assert_eq!(fx.buffer.snapshot(), &[1, 2, 3, 4, 5]);
        assert_eq!(fx.tracker.most_recent_local(), Some(counter(5)));
        assert_eq!(fx.progress.antenna_paths(), 4);
        assert!(fx.progress.in_flight().is_none());
        assert_eq!(fx.progress.completed(), Some(counter(5)));
    }

    #[test]
    fn back_to_back_procedure_leaves_completed_steps_intact() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::complete(counter(5), 1, &[1, 2]));

        assert_eq!(
            fx.feed(SubeventResult::continuing(counter(6), 1, &[3])),
            IngestOutcome::BufferHeld {
                counter: counter(6),
                held: counter(5)
            }
        );
        assert!(fx.tracker.is_dropped(counter(6)));
        assert_eq!(
            fx.feed(SubeventResult::aborted(counter(6))),
            IngestOutcome::Ignored(counter(6))
        );
        assert_eq!(
            fx.feed(SubeventResult::complete(counter(6), 1, &[4])),
            IngestOutcome::Ignored(counter(6))
        );

        assert_eq!(fx.buffer.snapshot(), &[1, 2]);
        assert_eq!(fx.tracker.most_recent_local(), Some(counter(5)));
    }

    #[test]
    fn released_buffer_accepts_next_procedure() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::complete(counter(5), 1, &[1, 2]));
        fx.buffer.reset();
        assert_eq!(fx.progress.take_completed(), Some(counter(5)));

        let outcome = fx.feed(SubeventResult::complete(counter(6), 1, &[3, 4]));
        assert_eq!(outcome, IngestOutcome::ProcedureComplete(counter(6)));
        assert_eq!(fx.buffer.snapshot(), &[3, 4]);
    }

    #[test]
    fn aborted_subevent_drops_procedure() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::continuing(counter(3), 1, &[1, 2]));

        assert_eq!(
            fx.feed(SubeventResult::aborted(counter(3))),
            IngestOutcome::SubeventAborted(counter(3))
        );
        assert!(fx.buffer.is_empty());
        assert!(fx.tracker.is_dropped(counter(3)));

        assert_eq!(
            fx.feed(SubeventResult::continuing(counter(3), 1, &[9])),
            IngestOutcome::Ignored(counter(3))
        );
        assert_eq!(
            fx.feed(SubeventResult::complete(counter(3), 1, &[9])),
            IngestOutcome::Ignored(counter(3))
        );
        assert!(fx.buffer.is_empty());
        assert!(fx.tracker.most_recent_local().is_none());
    }

    #[test]
    fn overflow_drops_procedure_and_ignores_rest() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::continuing(counter(8), 1, &[0; 12]));

        let outcome = fx.feed(SubeventResult::continuing(counter(8), 1, &[0; 8]));
        assert_eq!(
            outcome,
            IngestOutcome::Overflow {
                counter: counter(8),
                overflow: BufferOverflow {
                    requested: 8,
                    available: 4
                }
            }
        );
        assert!(fx.buffer.is_empty());
        assert!(fx.tracker.is_dropped(counter(8)));

        assert_eq!(
            fx.feed(SubeventResult::complete(counter(8), 1, &[1])),
            IngestOutcome::Ignored(counter(8))
        );
        assert!(fx.tracker.most_recent_local().is_none());
    }

    #[test]
    fn next_procedure_clears_dropped_marker() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::aborted(counter(1)));
        assert!(fx.tracker.is_dropped(counter(1)));

        let outcome = fx.feed(SubeventResult::complete(counter(2), 1, &[7]));
        assert_eq!(outcome, IngestOutcome::ProcedureComplete(counter(2)));
        assert!(fx.tracker.dropped().is_none());
        assert_eq!(fx.buffer.snapshot(), &[7]);
    }

    #[test]
    fn procedure_abort_discards_steps_without_recording() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::continuing(counter(4), 1, &[1, 2]));

        let aborted = SubeventResult {
            procedure_status: ProcedureStatus::Aborted,
            ..SubeventResult::continuing(counter(4), 1, &[3])
        };
        assert_eq!(fx.feed(aborted), IngestOutcome::ProcedureAborted(counter(4)));
        assert!(fx.buffer.is_empty());
        assert!(fx.tracker.most_recent_local().is_none());
        assert!(!fx.tracker.is_dropped(counter(4)));
    }

    #[test]
    fn unfinished_procedure_is_superseded_by_newer_counter() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::continuing(counter(10), 1, &[1, 1, 1]));

        let outcome = fx.feed(SubeventResult::complete(counter(11), 1, &[2, 2]));
        assert_eq!(outcome, IngestOutcome::ProcedureComplete(counter(11)));
        assert_eq!(fx.buffer.snapshot(), &[2, 2]);
    }

    #[test]
    fn refused_subevent_drops_its_procedure() {
        let mut fx = Fixture::new();
        fx.feed(SubeventResult::continuing(counter(9), 1, &[1, 2]));

        assert_eq!(
            refuse_subevent(&mut fx.tracker, &fx.progress, counter(9)),
            IngestOutcome::BufferBusy(counter(9))
        );
        assert_eq!(
            fx.feed(SubeventResult::complete(counter(9), 1, &[3])),
            IngestOutcome::Ignored(counter(9))
        );
        assert!(fx.tracker.most_recent_local().is_none());

        fx.feed(SubeventResult::complete(counter(10), 1, &[4]));
        assert_eq!(fx.buffer.snapshot(), &[4]);
    }

    #[test]
    fn subevent_without_steps_still_completes() {
        let mut fx = Fixture::new();
        let result = SubeventResult {
            step_data: None,
            ..SubeventResult::complete(counter(6), 3, &[])
        };

        assert_eq!(fx.feed(result), IngestOutcome::ProcedureComplete(counter(6)));
        assert_eq!(fx.progress.antenna_paths(), 3);
    }
}
