#![cfg_attr(target_os = "none", no_std)]

//! Embassy runtime for Channel Sounding ranging sessions.
//!
//! [`RangingSession`] owns the shared procedure state of one connection and
//! drives the ranging loop on top of the portable `ranging-core` crate. On the
//! target it logs through `defmt` and guards state with a critical-section
//! mutex; on the host it prints to stdout and runs on the `std` time driver.

mod log;

pub mod instant;
pub mod session;
pub mod status;

pub use instant::SessionInstant;
pub use session::{RangingSession, SessionMutex, SessionTelemetry};
pub use status::SessionStatus;
