//! Peer ranging-data retrieval bookkeeping.
//!
//! The transport reassembles the peer's ranging data and pushes it to the
//! session in segments, followed by a completion. [`PeerDataRetriever`] keeps
//! the single outstanding request and decides which of those deliveries are
//! accepted into the peer step buffer.

use core::fmt;

use crate::buffer::{BufferOverflow, StepBuffer};
use crate::procedure::ProcedureCounter;

/// Failure reported by the ranging-data transfer path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferError {
    /// A fetch is already outstanding for this session.
    Busy,
    /// The peer or the local stack rejected the request with a status code.
    Rejected(i16),
    /// The reassembled data did not fit the peer step buffer.
    Overflow,
    /// The transfer did not finish in time.
    Timeout,
    /// The link to the peer went away.
    Disconnected,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Busy => f.write_str("ranging data fetch already outstanding"),
            TransferError::Rejected(code) => write!(f, "ranging data request rejected ({code})"),
            TransferError::Overflow => f.write_str("ranging data exceeds the peer buffer"),
            TransferError::Timeout => f.write_str("ranging data transfer timed out"),
            TransferError::Disconnected => f.write_str("peer disconnected"),
        }
    }
}

/// Final status of a ranging-data fetch, delivered through the completion wait
/// point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FetchCompletion {
    pub counter: ProcedureCounter,
    pub result: Result<(), TransferError>,
}

impl FetchCompletion {
    /// Completion for a fetch that delivered every segment.
    #[must_use]
    pub const fn success(counter: ProcedureCounter) -> Self {
        Self {
            counter,
            result: Ok(()),
        }
    }

    /// Completion for a fetch that failed with `error`.
    #[must_use]
    pub const fn failure(counter: ProcedureCounter, error: TransferError) -> Self {
        Self {
            counter,
            result: Err(error),
        }
    }

    /// Returns `true` when the transfer succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Client half of the ranging-data transfer protocol.
///
/// Implementations only start operations. Notifications, segments and
/// completions flow back through the session's entry points.
pub trait RangingDataTransport {
    /// Subscribes to "ranging data ready" notifications.
    fn subscribe_ready(&mut self) -> Result<(), TransferError>;

    /// Subscribes to "ranging data overwritten" notifications.
    fn subscribe_overwritten(&mut self) -> Result<(), TransferError>;

    /// Subscribes to on-demand ranging data delivery.
    fn subscribe_on_demand(&mut self) -> Result<(), TransferError>;

    /// Subscribes to the control-point response channel.
    fn subscribe_control_point(&mut self) -> Result<(), TransferError>;

    /// Requests the peer's ranging data for `counter`.
    fn request_ranging_data(&mut self, counter: ProcedureCounter) -> Result<(), TransferError>;
}

/// How a delivered segment was handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SegmentOutcome {
    /// Appended to the peer buffer for the outstanding fetch.
    Appended(ProcedureCounter),
    /// No fetch is outstanding; the segment was dropped.
    Stray,
    /// The segment did not fit in the peer buffer.
    Overflow {
        counter: ProcedureCounter,
        overflow: BufferOverflow,
    },
    /// The peer buffer was unavailable; the fetch for this counter was
    /// abandoned.
    Lost(ProcedureCounter),
}

/// Tracks the single outstanding fetch of a session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PeerDataRetriever {
    outstanding: Option<ProcedureCounter>,
    overflowed: bool,
}

impl PeerDataRetriever {
    /// Creates a retriever with no outstanding fetch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outstanding: None,
            overflowed: false,
        }
    }

    /// Counter of the fetch currently outstanding, if any.
    #[must_use]
    pub const fn outstanding(&self) -> Option<ProcedureCounter> {
        self.outstanding
    }

    /// Reserves the fetch slot for `counter`.
    pub fn begin_fetch(&mut self, counter: ProcedureCounter) -> Result<(), TransferError> {
        if self.outstanding.is_some() {
            return Err(TransferError::Busy);
        }
        self.outstanding = Some(counter);
        self.overflowed = false;
        Ok(())
    }

    /// Appends `segment` to `buffer` when it belongs to the outstanding fetch.
    pub fn accept_segment<const CAPACITY: usize>(
        &mut self,
        buffer: &mut StepBuffer<CAPACITY>,
        segment: &[u8],
    ) -> SegmentOutcome {
        let Some(counter) = self.outstanding else {
            return SegmentOutcome::Stray;
        };

        if self.overflowed {
            return SegmentOutcome::Overflow {
                counter,
                overflow: BufferOverflow {
                    requested: segment.len(),
                    available: buffer.remaining(),
                },
            };
        }

        match buffer.append(segment) {
            Ok(()) => SegmentOutcome::Appended(counter),
            Err(overflow) => {
                self.overflowed = true;
                SegmentOutcome::Overflow { counter, overflow }
            }
        }
    }

    /// Closes the outstanding fetch when `completion` matches it.
    ///
    /// Returns the completion to forward to the orchestrator, with a
    /// successful transfer downgraded to [`TransferError::Overflow`] when a
    /// segment overflowed the peer buffer. Completions for any other counter
    /// return `None` and leave the outstanding fetch untouched.
    pub fn complete(&mut self, completion: FetchCompletion) -> Option<FetchCompletion> {
        if self.outstanding != Some(completion.counter) {
            return None;
        }

        self.outstanding = None;
        if self.overflowed && completion.is_success() {
            self.overflowed = false;
            return Some(FetchCompletion::failure(
                completion.counter,
                TransferError::Overflow,
            ));
        }
        self.overflowed = false;
        Some(completion)
    }

    /// Drops the outstanding fetch without waiting for its completion.
    pub fn cancel(&mut self) -> Option<ProcedureCounter> {
        self.overflowed = false;
        self.outstanding.take()
    }

    /// Handles a segment that could not reach the peer buffer.
    ///
    /// The outstanding fetch can no longer deliver complete data, so it is
    /// abandoned and its completion will be ignored.
    pub fn lose_segment(&mut self) -> SegmentOutcome {
        match self.cancel() {
            Some(counter) => SegmentOutcome::Lost(counter),
            None => SegmentOutcome::Stray,
        }
    }
}
