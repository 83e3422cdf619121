//! Ranging telemetry catalog and ring buffer.
//!
//! Event kinds encode to compact `u16` codes so they can be mirrored over
//! a diagnostics channel. The recorder keeps the most recent events in a
//! fixed-size ring and stamps procedure events with the time elapsed since
//! the cycle began.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::HistoryBuf;

use crate::orchestrator::RetryReason;
use crate::procedure::ProcedureCounter;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Ranging events shared across all targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangingEventKind {
    SetupComplete,
    CycleStarted,
    LocalComplete,
    PeerReady,
    PeerOverwritten,
    FetchStarted,
    FetchComplete,
    Estimated,
    EstimateFailed,
    /// Retry edge taken; carries the [`RetryReason::index`].
    Retry(u8),
    LinkLost,
    Custom(u16),
}

impl fmt::Display for RangingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangingEventKind::SetupComplete => f.write_str("setup-complete"),
            RangingEventKind::CycleStarted => f.write_str("cycle-started"),
            RangingEventKind::LocalComplete => f.write_str("local-complete"),
            RangingEventKind::PeerReady => f.write_str("peer-ready"),
            RangingEventKind::PeerOverwritten => f.write_str("peer-overwritten"),
            RangingEventKind::FetchStarted => f.write_str("fetch-started"),
            RangingEventKind::FetchComplete => f.write_str("fetch-complete"),
            RangingEventKind::Estimated => f.write_str("estimated"),
            RangingEventKind::EstimateFailed => f.write_str("estimate-failed"),
            RangingEventKind::Retry(index) => write!(f, "retry({index})"),
            RangingEventKind::LinkLost => f.write_str("link-lost"),
            RangingEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl RangingEventKind {
    const SETUP_COMPLETE_CODE: u16 = 0x0001;
    const CYCLE_STARTED_CODE: u16 = 0x0002;
    const LOCAL_COMPLETE_CODE: u16 = 0x0003;
    const PEER_READY_CODE: u16 = 0x0004;
    const PEER_OVERWRITTEN_CODE: u16 = 0x0005;
    const FETCH_STARTED_CODE: u16 = 0x0006;
    const FETCH_COMPLETE_CODE: u16 = 0x0007;
    const ESTIMATED_CODE: u16 = 0x0008;
    const ESTIMATE_FAILED_CODE: u16 = 0x0009;
    const LINK_LOST_CODE: u16 = 0x000A;
    const RETRY_BASE: u16 = 0x0010;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            RangingEventKind::SetupComplete => Self::SETUP_COMPLETE_CODE,
            RangingEventKind::CycleStarted => Self::CYCLE_STARTED_CODE,
            RangingEventKind::LocalComplete => Self::LOCAL_COMPLETE_CODE,
            RangingEventKind::PeerReady => Self::PEER_READY_CODE,
            RangingEventKind::PeerOverwritten => Self::PEER_OVERWRITTEN_CODE,
            RangingEventKind::FetchStarted => Self::FETCH_STARTED_CODE,
            RangingEventKind::FetchComplete => Self::FETCH_COMPLETE_CODE,
            RangingEventKind::Estimated => Self::ESTIMATED_CODE,
            RangingEventKind::EstimateFailed => Self::ESTIMATE_FAILED_CODE,
            RangingEventKind::LinkLost => Self::LINK_LOST_CODE,
            RangingEventKind::Retry(index) => Self::RETRY_BASE + index as u16,
            RangingEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`RangingEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::SETUP_COMPLETE_CODE => RangingEventKind::SetupComplete,
            Self::CYCLE_STARTED_CODE => RangingEventKind::CycleStarted,
            Self::LOCAL_COMPLETE_CODE => RangingEventKind::LocalComplete,
            Self::PEER_READY_CODE => RangingEventKind::PeerReady,
            Self::PEER_OVERWRITTEN_CODE => RangingEventKind::PeerOverwritten,
            Self::FETCH_STARTED_CODE => RangingEventKind::FetchStarted,
            Self::FETCH_COMPLETE_CODE => RangingEventKind::FetchComplete,
            Self::ESTIMATED_CODE => RangingEventKind::Estimated,
            Self::ESTIMATE_FAILED_CODE => RangingEventKind::EstimateFailed,
            Self::LINK_LOST_CODE => RangingEventKind::LinkLost,
            value
                if value >= Self::RETRY_BASE
                    && usize::from(value - Self::RETRY_BASE) < RetryReason::COUNT =>
            {
                u8::try_from(value - Self::RETRY_BASE)
                    .map_or(RangingEventKind::Custom(value), RangingEventKind::Retry)
            }
            other => RangingEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside ranging events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Procedure(ProcedureTelemetry),
    Retry(RetryReason),
}

/// Procedure-scoped payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcedureTelemetry {
    pub counter: ProcedureCounter,
    /// Bytes buffered for the procedure when the event fired.
    pub buffered: u16,
    pub since_cycle_start: Option<Duration>,
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic instant used to timestamp telemetry.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: RangingEventKind,
    pub details: TelemetryPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records ranging events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    cycle_started_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            cycle_started_at: None,
            next_event_id: 0,
        }
    }

    /// Iterates the recorded events in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> + '_ {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Marks the start of a cycle; later procedure events report their
    /// offset from it.
    pub fn record_cycle_started(&mut self, timestamp: TInstant) -> EventId {
        self.cycle_started_at = Some(timestamp);
        self.record(
            RangingEventKind::CycleStarted,
            TelemetryPayload::None,
            timestamp,
        )
    }

    /// Records a procedure-scoped event such as local completion or a
    /// finished fetch.
    pub fn record_procedure(
        &mut self,
        event: RangingEventKind,
        counter: ProcedureCounter,
        buffered: usize,
        timestamp: TInstant,
    ) -> EventId {
        let since_cycle_start = self
            .cycle_started_at
            .map(|start| timestamp.saturating_duration_since(start));
        let payload = TelemetryPayload::Procedure(ProcedureTelemetry {
            counter,
            buffered: truncate_len(buffered),
            since_cycle_start,
        });
        self.record(event, payload, timestamp)
    }

    /// Records the retry edge and closes the current cycle.
    pub fn record_retry(&mut self, reason: RetryReason, timestamp: TInstant) -> EventId {
        self.cycle_started_at = None;
        self.record(
            RangingEventKind::Retry(truncate_index(reason.index())),
            TelemetryPayload::Retry(reason),
            timestamp,
        )
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: RangingEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn truncate_index(index: usize) -> u8 {
    u8::try_from(index).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn event_codes_decode_to_the_same_kind() {
        let kinds = [
            RangingEventKind::SetupComplete,
            RangingEventKind::CycleStarted,
            RangingEventKind::LocalComplete,
            RangingEventKind::PeerReady,
            RangingEventKind::PeerOverwritten,
            RangingEventKind::FetchStarted,
            RangingEventKind::FetchComplete,
            RangingEventKind::Estimated,
            RangingEventKind::EstimateFailed,
            RangingEventKind::LinkLost,
            RangingEventKind::Retry(0),
            RangingEventKind::Retry(6),
        ];
        for kind in kinds {
            assert_eq!(RangingEventKind::from_raw(kind.to_raw()), kind);
        }
        assert_eq!(
            RangingEventKind::from_raw(0x0017),
            RangingEventKind::Custom(0x0017)
        );
    }

    #[test]
    fn procedure_events_report_offset_from_cycle_start() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 8>::new();
        recorder.record_cycle_started(MicrosInstant(1_000));

        let id = recorder.record_procedure(
            RangingEventKind::LocalComplete,
            ProcedureCounter::new(4),
            120,
            MicrosInstant(1_750),
        );
        assert_eq!(id, 1);

        let record = recorder.latest().copied().expect("recorded");
        match record.details {
            TelemetryPayload::Procedure(details) => {
                assert_eq!(details.counter, ProcedureCounter::new(4));
                assert_eq!(details.buffered, 120);
                assert_eq!(details.since_cycle_start, Some(Duration::from_micros(750)));
            }
            other => panic!("expected procedure payload, got {other:?}"),
        }
    }

    #[test]
    fn retry_closes_the_cycle() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 8>::new();
        recorder.record_cycle_started(MicrosInstant(0));
        recorder.record_retry(RetryReason::FetchTimeout, MicrosInstant(10));

        let latest = recorder.latest().copied().expect("recorded");
        assert_eq!(latest.event, RangingEventKind::Retry(6));

        recorder.record_procedure(
            RangingEventKind::PeerReady,
            ProcedureCounter::new(1),
            0,
            MicrosInstant(20),
        );
        match recorder.latest().map(|record| record.details) {
            Some(TelemetryPayload::Procedure(details)) => {
                assert!(details.since_cycle_start.is_none());
            }
            other => panic!("expected procedure payload, got {other:?}"),
        }
    }

    #[test]
    fn ring_keeps_most_recent_events_in_order() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 3>::new();
        for tick in 0..5u64 {
            recorder.record(
                RangingEventKind::Custom(0x100),
                TelemetryPayload::None,
                MicrosInstant(tick),
            );
        }

        assert_eq!(recorder.len(), 3);
        let ids: heapless::Vec<EventId, 3> =
            recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4]);
    }
}
