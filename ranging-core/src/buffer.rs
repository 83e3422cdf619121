//! Fixed-capacity step accumulators.
//!
//! A [`StepBuffer`] holds one procedure's worth of step data. Appends are all
//! or nothing: a slice that does not fit is rejected and the buffer keeps its
//! previous contents, leaving the caller to abandon the procedure.

use core::fmt;

use heapless::Vec;

/// Maximum number of CS steps in a single procedure.
pub const MAX_STEPS_PER_PROCEDURE: usize = 256;
/// Largest per-step measurement payload reported by the controller.
pub const MAX_STEP_DATA_LEN: usize = 35;
/// Per-step header preceding local step data (mode, channel, length).
pub const STEP_HEADER_LEN: usize = 3;
/// Header prefixing the peer's reassembled ranging data.
pub const RANGING_HEADER_LEN: usize = 4;
/// Header prefixing each subevent inside the peer's ranging data.
pub const SUBEVENT_HEADER_LEN: usize = 8;
/// Maximum number of subevents carried in one peer procedure.
pub const MAX_SUBEVENTS_PER_PROCEDURE: usize = 32;
/// Mode byte preceding each step inside the peer's ranging data.
pub const STEP_MODE_LEN: usize = 1;

/// Capacity of the local step buffer.
pub const LOCAL_PROCEDURE_MEM: usize =
    MAX_STEPS_PER_PROCEDURE * STEP_HEADER_LEN + MAX_STEPS_PER_PROCEDURE * MAX_STEP_DATA_LEN;

/// Capacity of the peer ranging-data buffer.
pub const PEER_PROCEDURE_MEM: usize = RANGING_HEADER_LEN
    + MAX_SUBEVENTS_PER_PROCEDURE * SUBEVENT_HEADER_LEN
    + MAX_STEPS_PER_PROCEDURE * STEP_MODE_LEN
    + MAX_STEPS_PER_PROCEDURE * MAX_STEP_DATA_LEN;

/// Local step buffer sized for the largest procedure the controller can report.
pub type LocalStepBuffer = StepBuffer<LOCAL_PROCEDURE_MEM>;

/// Peer step buffer sized for the largest reassembled ranging-data payload.
pub type PeerStepBuffer = StepBuffer<PEER_PROCEDURE_MEM>;

/// Rejection reported when an append would exceed the buffer capacity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferOverflow {
    /// Length of the slice that was rejected.
    pub requested: usize,
    /// Bytes still free when the append was attempted.
    pub available: usize,
}

impl fmt::Display for BufferOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step buffer overflow ({} bytes requested, {} available)",
            self.requested, self.available
        )
    }
}

/// Append-only byte accumulator with a compile-time capacity.
#[derive(Clone, Debug, Default)]
pub struct StepBuffer<const CAPACITY: usize> {
    bytes: Vec<u8, CAPACITY>,
}

impl<const CAPACITY: usize> StepBuffer<CAPACITY> {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Appends `data` in full, or leaves the buffer untouched and reports
    /// [`BufferOverflow`].
    pub fn append(&mut self, data: &[u8]) -> Result<(), BufferOverflow> {
        let available = self.remaining();
        if data.len() > available {
            return Err(BufferOverflow {
                requested: data.len(),
                available,
            });
        }

        self.bytes
            .extend_from_slice(data)
            .map_err(|_| BufferOverflow {
                requested: data.len(),
                available,
            })
    }

    /// Discards all contents. Capacity is retained.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Read-only view of the accumulated bytes.
    #[must_use]
    pub fn snapshot(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Number of bytes currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Total capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Bytes that can still be appended before the buffer overflows.
    #[must_use]
    pub fn remaining(&self) -> usize {
        CAPACITY - self.bytes.len()
    }
}
