//! Embassy-backed instant used for ranging deadlines and telemetry.

use core::ops::Add;

use embassy_time::{Duration, Instant};
use ranging_core::telemetry::TelemetryInstant;

/// Monotonic timestamp wrapping [`embassy_time::Instant`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SessionInstant(Instant);

impl SessionInstant {
    /// Current time from the embassy time driver.
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    /// Microseconds since the time driver started.
    #[must_use]
    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for SessionInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl From<SessionInstant> for Instant {
    fn from(value: SessionInstant) -> Self {
        value.0
    }
}

impl Add<core::time::Duration> for SessionInstant {
    type Output = Self;

    fn add(self, rhs: core::time::Duration) -> Self::Output {
        Self(self.0 + core_duration_to_embassy(rhs))
    }
}

impl TelemetryInstant for SessionInstant {
    fn saturating_duration_since(&self, earlier: Self) -> core::time::Duration {
        let elapsed = self.0.saturating_duration_since(earlier.0);
        core::time::Duration::from_micros(elapsed.as_micros())
    }
}

pub(crate) fn core_duration_to_embassy(duration: core::time::Duration) -> Duration {
    let micros = duration.as_micros();
    let micros = u64::try_from(micros).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_core_duration_matches_embassy_arithmetic() {
        let start = SessionInstant::from(Instant::from_micros(1_000));
        let later = start + core::time::Duration::from_millis(5);

        assert_eq!(later.as_micros(), 6_000);
        assert_eq!(
            later.saturating_duration_since(start),
            core::time::Duration::from_millis(5)
        );
        assert_eq!(
            start.saturating_duration_since(later),
            core::time::Duration::ZERO
        );
    }
}
