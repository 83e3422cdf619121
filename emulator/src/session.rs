use std::io::{self, Write};

use embassy_futures::block_on;
use ranging_core::config::SessionConfig;
use ranging_core::controller::ControllerError;
use ranging_core::orchestrator::{CycleOutcome, CycleStats, RangingCycle, SessionError};
use ranging_core::procedure::Role;
use ranging_core::telemetry::{TelemetryPayload, TelemetryRecord};
use ranging_firmware::{RangingSession, SessionInstant};

use crate::script::{Scenario, ScenarioEvent};
use crate::sim::{REJECTED_STATUS, SimController, SimEstimator, SimPeer};

/// Result of replaying a scenario.
#[derive(Clone, Debug, PartialEq)]
pub struct EmulationReport {
    pub outcomes: Vec<CycleOutcome>,
    pub stats: CycleStats,
    pub estimator_calls: usize,
    pub fetch_requests: usize,
    /// Fatal error that ended the run early.
    pub error: Option<SessionError>,
}

/// Replays a [`Scenario`] against a real ranging session.
pub struct EmulatorSession {
    scenario: Scenario,
}

impl EmulatorSession {
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }

    fn config(&self) -> SessionConfig {
        let base = match self.scenario.role {
            Role::Initiator => SessionConfig::initiator(),
            Role::Reflector => SessionConfig::reflector(),
        };
        base.with_timeouts(self.scenario.timeouts)
    }

    /// Runs setup and one cycle per scenario event, writing the transcript
    /// to `out`. Session log lines go to stdout alongside it.
    pub fn run<W: Write>(&self, out: &mut W) -> io::Result<EmulationReport> {
        let session: RangingSession = RangingSession::new(self.config());
        let scenario = &self.scenario;
        let mut controller =
            SimController::new(&session, scenario.capabilities, scenario.setup_failure);
        let mut peer = SimPeer::new(&session, scenario.setup_failure);
        let mut estimator = SimEstimator::default();
        let mut report = EmulationReport {
            outcomes: Vec::new(),
            stats: CycleStats::default(),
            estimator_calls: 0,
            fetch_requests: 0,
            error: None,
        };

        writeln!(out, "== setup ({})", scenario.role)?;
        if !session.config().timeouts.is_valid() {
            report.error = Some(SessionError::InvalidTimeouts);
        } else if let Err(err) = block_on(session.setup(&mut controller, &mut peer)) {
            report.error = Some(err);
        }

        if report.error.is_none() && scenario.role == Role::Initiator {
            let mut cycle = RangingCycle::<SessionInstant>::new(scenario.timeouts);
            for (index, event) in scenario.events.iter().enumerate() {
                let plan = match *event {
                    ScenarioEvent::Stray(len) => {
                        writeln!(out, "== stray segment ({len} bytes)")?;
                        let outcome = session.on_ranging_data_segment(&vec![0; len]);
                        writeln!(out, "   -> {outcome:?}")?;
                        continue;
                    }
                    ScenarioEvent::Procedure(plan) => {
                        controller.arm(plan);
                        Some(plan)
                    }
                    ScenarioEvent::EnableFail => {
                        controller
                            .fail_next_enable(ControllerError::Rejected(REJECTED_STATUS));
                        None
                    }
                    ScenarioEvent::Disconnect => {
                        controller.fail_next_enable(ControllerError::Disconnected);
                        None
                    }
                };
                peer.arm(plan);

                match plan {
                    Some(plan) => {
                        writeln!(out, "== cycle {}: procedure {}", index + 1, plan.counter)?;
                    }
                    None => writeln!(out, "== cycle {}", index + 1)?,
                }
                let result = block_on(session.run_cycle(
                    &mut cycle,
                    &mut controller,
                    &mut peer,
                    &mut estimator,
                ));
                match result {
                    Ok(outcome) => {
                        write_outcome(out, &outcome)?;
                        report.outcomes.push(outcome);
                    }
                    Err(err) => {
                        report.error = Some(err);
                        break;
                    }
                }
            }
            report.stats = *cycle.stats();
        }

        if let Some(err) = report.error {
            writeln!(out, "== stopped: {err}")?;
        }
        report.estimator_calls = estimator.calls();
        report.fetch_requests = peer.requests();

        writeln!(out, "== status")?;
        writeln!(out, "{}", session.snapshot())?;
        writeln!(out, "== telemetry")?;
        session.with_telemetry(|telemetry| {
            telemetry
                .oldest_first()
                .try_for_each(|record| write_record(out, record))
        })?;

        Ok(report)
    }
}

fn write_outcome<W: Write>(out: &mut W, outcome: &CycleOutcome) -> io::Result<()> {
    match outcome {
        CycleOutcome::Estimated { counter, estimate } => {
            writeln!(out, "   -> procedure {counter}: {estimate}")
        }
        CycleOutcome::EstimateFailed { counter, error } => {
            writeln!(out, "   -> procedure {counter}: no estimate ({error})")
        }
        CycleOutcome::Retry(reason) => writeln!(out, "   -> retry: {reason}"),
    }
}

fn write_record<W: Write>(
    out: &mut W,
    record: &TelemetryRecord<SessionInstant>,
) -> io::Result<()> {
    write!(
        out,
        "#{:<3} {:>10}us {}",
        record.id,
        record.timestamp.as_micros(),
        record.event
    )?;
    match record.details {
        TelemetryPayload::None => writeln!(out),
        TelemetryPayload::Procedure(details) => {
            write!(out, " counter={} bytes={}", details.counter, details.buffered)?;
            match details.since_cycle_start {
                Some(elapsed) => writeln!(out, " +{}us", elapsed.as_micros()),
                None => writeln!(out),
            }
        }
        TelemetryPayload::Retry(reason) => writeln!(out, " {}", reason.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_scenario;
    use ranging_core::orchestrator::{RetryReason, SetupError, SetupStep};
    use ranging_core::procedure::ProcedureCounter;

    const FAST: &str = "timeouts local=40ms peer=40ms grace=10ms fetch=40ms\n";

    fn replay(body: &str) -> (EmulationReport, String) {
        let scenario = parse_scenario(&format!("{FAST}{body}")).expect("valid script");
        let mut transcript = Vec::new();
        let report = EmulatorSession::new(scenario)
            .run(&mut transcript)
            .expect("in-memory writer");
        (report, String::from_utf8(transcript).expect("utf-8 transcript"))
    }

    #[test]
    fn aligned_procedure_is_estimated() {
        let (report, transcript) = replay("procedure 5 paths=2 distance=150cm\n");

        assert_eq!(report.error, None);
        assert_eq!(report.estimator_calls, 1);
        assert_eq!(report.fetch_requests, 1);
        assert!(matches!(
            report.outcomes.as_slice(),
            [CycleOutcome::Estimated { counter, estimate }]
                if *counter == ProcedureCounter::new(5) && estimate.ifft == Some(1.5)
        ));
        assert!(transcript.contains("== cycle 1: procedure 5"));
        assert!(transcript.contains("ifft: 1.50 m"));
    }

    #[test]
    fn misaligned_and_failed_cycles_retry() {
        let (report, _) = replay(
            "\
procedure 7 peer=6
procedure 9 local=overflow peer=none
procedure 3 fetch=timeout
procedure 4 fetch=fail
enable-fail
procedure 8
",
        );

        assert_eq!(report.error, None);
        assert_eq!(
            report.outcomes[..5],
            [
                CycleOutcome::Retry(RetryReason::CounterMismatch {
                    local: Some(ProcedureCounter::new(7)),
                    peer: Some(ProcedureCounter::new(6)),
                }),
                CycleOutcome::Retry(RetryReason::LocalTimeout),
                CycleOutcome::Retry(RetryReason::FetchTimeout),
                CycleOutcome::Retry(RetryReason::FetchFailed(
                    ranging_core::retriever::TransferError::Rejected(REJECTED_STATUS)
                )),
                CycleOutcome::Retry(RetryReason::EnableFailed(ControllerError::Rejected(
                    REJECTED_STATUS
                ))),
            ]
        );
        assert!(report.outcomes[5].reached_estimator());
        assert_eq!(report.estimator_calls, 1);
        assert_eq!(report.stats.attempts, 6);
        assert_eq!(report.stats.total_retries(), 5);
    }

    #[test]
    fn disconnect_stops_the_run() {
        let (report, transcript) = replay("disconnect\nprocedure 1\n");

        assert_eq!(report.error, Some(SessionError::LinkLost));
        assert!(report.outcomes.is_empty());
        assert!(transcript.contains("== stopped: link lost"));
    }

    #[test]
    fn setup_failure_skips_the_loop() {
        let (report, _) = replay("fail-setup subscribe-ready\nprocedure 1\n");

        assert_eq!(
            report.error,
            Some(SessionError::Setup(
                SetupStep::SubscribeReady,
                SetupError::Transfer(ranging_core::retriever::TransferError::Rejected(
                    REJECTED_STATUS
                )),
            ))
        );
        assert_eq!(report.stats.attempts, 0);
    }

    #[test]
    fn reflector_only_runs_setup() {
        let (report, transcript) = replay("role reflector\nprocedure 1\n");

        assert_eq!(report.error, None);
        assert!(report.outcomes.is_empty());
        assert!(transcript.contains("== setup (reflector)"));
    }
}
