//! Point-in-time view of a ranging session for diagnostics.

use core::fmt;

use crate::orchestrator::{CycleStats, RangingState, RetryReason};
use crate::procedure::ProcedureCounter;
use crate::state::{ProcedureState, StepBuffers};

/// Counters, buffer fill levels and cycle statistics of one session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub state: Option<RangingState>,
    pub most_recent_local: Option<ProcedureCounter>,
    pub most_recent_peer: Option<ProcedureCounter>,
    pub dropped: Option<ProcedureCounter>,
    pub last_overwritten: Option<ProcedureCounter>,
    pub outstanding_fetch: Option<ProcedureCounter>,
    pub local_bytes: usize,
    pub peer_bytes: usize,
    pub antenna_paths: u8,
    pub stats: CycleStats,
    pub last_retry: Option<RetryReason>,
}

impl SessionSnapshot {
    /// Captures the counter and fetch bookkeeping of a snapshot.
    #[must_use]
    pub fn capture(state: &ProcedureState) -> Self {
        let tracker = state.tracker();
        Self {
            state: None,
            most_recent_local: tracker.most_recent_local(),
            most_recent_peer: tracker.most_recent_peer(),
            dropped: tracker.dropped(),
            last_overwritten: tracker.last_overwritten(),
            outstanding_fetch: state.retriever().outstanding(),
            local_bytes: 0,
            peer_bytes: 0,
            antenna_paths: state.antenna_paths(),
            stats: CycleStats::default(),
            last_retry: None,
        }
    }

    /// Attaches the buffer fill levels.
    #[must_use]
    pub fn with_buffers<const LOCAL: usize, const PEER: usize>(
        mut self,
        steps: &StepBuffers<LOCAL, PEER>,
    ) -> Self {
        self.local_bytes = steps.local_steps().len();
        self.peer_bytes = steps.peer_steps().len();
        self
    }

    /// Attaches the loop-side half of a snapshot.
    #[must_use]
    pub const fn with_cycle(
        mut self,
        state: RangingState,
        stats: CycleStats,
        last_retry: Option<RetryReason>,
    ) -> Self {
        self.state = Some(state);
        self.stats = stats;
        self.last_retry = last_retry;
        self
    }

    /// Writes the counter line (e.g. `counters local=5 peer=5 dropped=none`).
    pub fn write_counters_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("counters local=")?;
        write_counter(writer, self.most_recent_local)?;
        writer.write_str(" peer=")?;
        write_counter(writer, self.most_recent_peer)?;
        writer.write_str(" dropped=")?;
        write_counter(writer, self.dropped)?;
        writer.write_str(" overwritten=")?;
        write_counter(writer, self.last_overwritten)?;
        writer.write_str(" fetch=")?;
        write_counter(writer, self.outstanding_fetch)
    }

    /// Writes the buffer line (e.g. `buffers local=120B peer=96B paths=4`).
    pub fn write_buffers_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "buffers local={}B peer={}B paths={}",
            self.local_bytes, self.peer_bytes, self.antenna_paths
        )
    }

    /// Writes the cycle line (e.g. `cycle state=idle attempts=3 estimates=2 retries=1`).
    pub fn write_cycle_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("cycle state=")?;
        writer.write_str(self.state.map_or("unknown", RangingState::label))?;
        write!(
            writer,
            " attempts={} estimates={} retries={}",
            self.stats.attempts,
            self.stats.estimates,
            self.stats.total_retries()
        )?;
        if let Some(reason) = self.last_retry {
            write!(writer, " last-retry={}", reason.label())?;
        }
        Ok(())
    }
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_cycle_line(f)?;
        f.write_str("\n")?;
        self.write_counters_line(f)?;
        f.write_str("\n")?;
        self.write_buffers_line(f)
    }
}

fn write_counter<W: fmt::Write>(writer: &mut W, counter: Option<ProcedureCounter>) -> fmt::Result {
    match counter {
        Some(counter) => write!(writer, "{counter}"),
        None => writer.write_str("none"),
    }
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;
    use crate::procedure::SubeventResult;

    #[test]
    fn renders_captured_state() {
        let mut state = ProcedureState::new();
        let mut steps = StepBuffers::<16, 16>::new();
        state.ingest_subevent(
            &mut steps,
            &SubeventResult::complete(ProcedureCounter::new(5), 2, &[1, 2, 3]),
        );
        state.record_peer_ready(ProcedureCounter::new(4));

        let stats = CycleStats {
            attempts: 3,
            estimates: 1,
            ..CycleStats::default()
        };
        let snapshot = SessionSnapshot::capture(&state).with_buffers(&steps).with_cycle(
            RangingState::AwaitingPeerReady,
            stats,
            Some(RetryReason::LocalTimeout),
        );

        let mut line: String<96> = String::new();
        snapshot.write_counters_line(&mut line).expect("fits");
        assert_eq!(
            line.as_str(),
            "counters local=5 peer=4 dropped=none overwritten=none fetch=none"
        );

        line.clear();
        snapshot.write_buffers_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "buffers local=3B peer=0B paths=2");

        line.clear();
        snapshot.write_cycle_line(&mut line).expect("fits");
        assert_eq!(
            line.as_str(),
            "cycle state=awaiting-peer attempts=3 estimates=1 retries=0 last-retry=local-timeout"
        );
    }
}
