//! Procedure identifiers and per-subevent notification payloads.
//!
//! Both the local controller and the remote reflector number completed
//! ranging procedures independently. The types here keep those identifiers
//! explicit (`Option<ProcedureCounter>` instead of a reserved sentinel value)
//! and describe the subevent results the controller reports.

use core::fmt;

/// Sequence identifier assigned to a completed ranging procedure.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcedureCounter(u16);

impl ProcedureCounter {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns the counter that follows `self`, wrapping at `u16::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u16> for ProcedureCounter {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProcedureCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel Sounding role played by the local device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Initiator,
    Reflector,
}

impl Role {
    /// Short lowercase label used in logs and transcripts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Reflector => "reflector",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Completion status reported for a single subevent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubeventStatus {
    Normal,
    Aborted,
}

/// Completion status reported for the procedure a subevent belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcedureStatus {
    /// More subevents follow for this procedure.
    Continuing,
    /// This was the final subevent and the procedure finished normally.
    Complete,
    /// The controller abandoned the procedure.
    Aborted,
}

/// One subevent result as delivered by the controller.
///
/// `step_data` borrows the concatenated step records of the subevent; the
/// handler copies them into the session's step buffer before returning.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubeventResult<'a> {
    pub counter: ProcedureCounter,
    pub subevent_status: SubeventStatus,
    pub procedure_status: ProcedureStatus,
    pub antenna_paths: u8,
    pub step_data: Option<&'a [u8]>,
}

impl<'a> SubeventResult<'a> {
    /// Builds a normal, continuing subevent carrying `step_data`.
    #[must_use]
    pub const fn continuing(
        counter: ProcedureCounter,
        antenna_paths: u8,
        step_data: &'a [u8],
    ) -> Self {
        Self {
            counter,
            subevent_status: SubeventStatus::Normal,
            procedure_status: ProcedureStatus::Continuing,
            antenna_paths,
            step_data: Some(step_data),
        }
    }

    /// Builds the final subevent of a procedure that completed normally.
    #[must_use]
    pub const fn complete(
        counter: ProcedureCounter,
        antenna_paths: u8,
        step_data: &'a [u8],
    ) -> Self {
        Self {
            counter,
            subevent_status: SubeventStatus::Normal,
            procedure_status: ProcedureStatus::Complete,
            antenna_paths,
            step_data: Some(step_data),
        }
    }

    /// Builds a subevent the controller reported as aborted.
    #[must_use]
    pub const fn aborted(counter: ProcedureCounter) -> Self {
        Self {
            counter,
            subevent_status: SubeventStatus::Aborted,
            procedure_status: ProcedureStatus::Aborted,
            antenna_paths: 0,
            step_data: None,
        }
    }

    /// Returns the number of step bytes carried by this result.
    #[must_use]
    pub fn step_len(&self) -> usize {
        self.step_data.map_or(0, <[u8]>::len)
    }
}
