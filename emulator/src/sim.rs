//! Simulated controller, reflector peer and distance estimator.
//!
//! The simulation answers commands synchronously: enabling procedures
//! immediately replays the planned subevents and peer announcements into the
//! session, and a ranging data request immediately streams the peer's
//! segments. The session's signals hold those notifications until the loop
//! waits on them.

use ranging_core::buffer::LOCAL_PROCEDURE_MEM;
use ranging_core::config::{CreateConfigParams, DefaultSettings, ProcedureParameters};
use ranging_core::controller::{
    ControllerError, CsController, ProcedureEnableInfo, RemoteCapabilities,
};
use ranging_core::estimator::{DistanceEstimate, DistanceEstimator, EstimateError};
use ranging_core::orchestrator::SetupStep;
use ranging_core::procedure::{
    ProcedureCounter, ProcedureStatus, Role, SubeventResult, SubeventStatus,
};
use ranging_core::retriever::{RangingDataTransport, TransferError};
use ranging_firmware::RangingSession;

use crate::script::{FetchBehavior, LocalBehavior, ProcedurePlan};

/// Bytes of one simulated local step record (header plus mode 2 data).
pub const LOCAL_STEP_LEN: usize = 12;
/// Bytes of one simulated peer step record (mode byte plus mode 2 data).
pub const PEER_STEP_LEN: usize = 10;
/// Status code the simulation uses when it rejects a command.
pub const REJECTED_STATUS: i16 = 0x0C;

const MAX_ANTENNA_PATHS: u8 = 4;

/// Encodes `distance_cm` in the first two bytes of a step payload.
fn step_payload(distance_cm: u16, len: usize) -> Vec<u8> {
    let mut payload = vec![0x5A; len];
    for (slot, byte) in payload.iter_mut().zip(distance_cm.to_le_bytes()) {
        *slot = byte;
    }
    payload
}

fn decode_distance(steps: &[u8]) -> Option<f32> {
    let [low, high, ..] = steps else {
        return None;
    };
    Some(f32::from(u16::from_le_bytes([*low, *high])) / 100.0)
}

/// Local controller stand-in.
pub struct SimController<'a> {
    session: &'a RangingSession,
    capabilities: RemoteCapabilities,
    setup_failure: Option<SetupStep>,
    plan: Option<ProcedurePlan>,
    enable_error: Option<ControllerError>,
}

impl<'a> SimController<'a> {
    #[must_use]
    pub fn new(
        session: &'a RangingSession,
        capabilities: RemoteCapabilities,
        setup_failure: Option<SetupStep>,
    ) -> Self {
        Self {
            session,
            capabilities,
            setup_failure,
            plan: None,
            enable_error: None,
        }
    }

    /// Procedure replayed by the next enable command.
    pub fn arm(&mut self, plan: ProcedurePlan) {
        self.plan = Some(plan);
        self.enable_error = None;
    }

    /// Makes the next enable command fail with `error`.
    pub fn fail_next_enable(&mut self, error: ControllerError) {
        self.plan = None;
        self.enable_error = Some(error);
    }

    fn step(&self, step: SetupStep) -> Result<(), ControllerError> {
        if self.setup_failure == Some(step) {
            Err(ControllerError::Rejected(REJECTED_STATUS))
        } else {
            Ok(())
        }
    }

    fn replay(&self, plan: &ProcedurePlan) {
        let counter = ProcedureCounter::new(plan.counter);
        let subevent_len = match plan.local {
            LocalBehavior::Overflow => LOCAL_PROCEDURE_MEM / 2 + 1,
            _ => plan.steps * LOCAL_STEP_LEN,
        };
        let payload = step_payload(plan.distance_cm, subevent_len);
        let subevents = match plan.local {
            LocalBehavior::Overflow => plan.subevents.max(3),
            _ => plan.subevents.max(1),
        };

        for index in 0..subevents {
            let last = index + 1 == subevents;
            let result = match plan.local {
                LocalBehavior::SubeventAborted if index == 0 => SubeventResult::aborted(counter),
                LocalBehavior::Aborted if last => SubeventResult {
                    counter,
                    subevent_status: SubeventStatus::Normal,
                    procedure_status: ProcedureStatus::Aborted,
                    antenna_paths: plan.antenna_paths,
                    step_data: None,
                },
                LocalBehavior::Incomplete => {
                    SubeventResult::continuing(counter, plan.antenna_paths, &payload)
                }
                _ if last => SubeventResult::complete(counter, plan.antenna_paths, &payload),
                _ => SubeventResult::continuing(counter, plan.antenna_paths, &payload),
            };
            let _ = self.session.on_subevent_result(&result);
        }

        if let Some(overwritten) = plan.overwritten {
            self.session
                .on_ranging_data_overwritten(ProcedureCounter::new(overwritten));
        }
        if let Some(peer) = plan.peer_counter {
            self.session
                .on_ranging_data_ready(ProcedureCounter::new(peer));
        }
    }
}

impl CsController for SimController<'_> {
    async fn set_default_settings(
        &mut self,
        _settings: &DefaultSettings,
    ) -> Result<(), ControllerError> {
        self.step(SetupStep::DefaultSettings)
    }

    async fn read_remote_capabilities(&mut self) -> Result<RemoteCapabilities, ControllerError> {
        self.step(SetupStep::RemoteCapabilities)?;
        Ok(self.capabilities)
    }

    async fn create_config(&mut self, _params: &CreateConfigParams) -> Result<(), ControllerError> {
        self.step(SetupStep::CreateConfig)
    }

    async fn enable_security(&mut self) -> Result<(), ControllerError> {
        self.step(SetupStep::EnableSecurity)
    }

    async fn set_procedure_parameters(
        &mut self,
        _params: &ProcedureParameters,
    ) -> Result<(), ControllerError> {
        self.step(SetupStep::ProcedureParameters)
    }

    async fn enable_procedures(&mut self, config_id: u8) -> Result<(), ControllerError> {
        if let Some(err) = self.enable_error.take() {
            return Err(err);
        }

        let procedure = &self.session.config().procedure;
        self.session.on_procedure_enabled(&ProcedureEnableInfo {
            config_id,
            enabled: true,
            selected_tx_power: self.session.config().default_settings.max_tx_power,
            subevent_len: procedure.max_subevent_len,
            procedure_count: procedure.max_procedure_count,
        });

        if let Some(plan) = self.plan.take() {
            self.replay(&plan);
        }
        Ok(())
    }
}

/// Reflector stand-in serving its ranging data over the transport.
pub struct SimPeer<'a> {
    session: &'a RangingSession,
    setup_failure: Option<SetupStep>,
    plan: Option<ProcedurePlan>,
    requests: usize,
}

impl<'a> SimPeer<'a> {
    #[must_use]
    pub fn new(session: &'a RangingSession, setup_failure: Option<SetupStep>) -> Self {
        Self {
            session,
            setup_failure,
            plan: None,
            requests: 0,
        }
    }

    /// Data served for the next request.
    pub fn arm(&mut self, plan: Option<ProcedurePlan>) {
        self.plan = plan;
    }

    /// Number of ranging data requests received so far.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests
    }

    fn subscribe(&self, step: SetupStep) -> Result<(), TransferError> {
        if self.setup_failure == Some(step) {
            Err(TransferError::Rejected(REJECTED_STATUS))
        } else {
            Ok(())
        }
    }

    fn serve(&self, counter: ProcedureCounter, plan: &ProcedurePlan) {
        let len = plan.subevents.max(1) * plan.steps * PEER_STEP_LEN;
        let data = step_payload(plan.distance_cm, len.max(2));
        let chunk = data.len().div_ceil(plan.segments.max(1));
        for segment in data.chunks(chunk) {
            let _ = self.session.on_ranging_data_segment(segment);
        }
        self.session.on_ranging_data_complete(counter, Ok(()));
    }
}

impl RangingDataTransport for SimPeer<'_> {
    fn subscribe_ready(&mut self) -> Result<(), TransferError> {
        self.subscribe(SetupStep::SubscribeReady)
    }

    fn subscribe_overwritten(&mut self) -> Result<(), TransferError> {
        self.subscribe(SetupStep::SubscribeOverwritten)
    }

    fn subscribe_on_demand(&mut self) -> Result<(), TransferError> {
        self.subscribe(SetupStep::SubscribeOnDemand)
    }

    fn subscribe_control_point(&mut self) -> Result<(), TransferError> {
        self.subscribe(SetupStep::SubscribeControlPoint)
    }

    fn request_ranging_data(&mut self, counter: ProcedureCounter) -> Result<(), TransferError> {
        self.requests += 1;
        let Some(plan) = self.plan.take() else {
            return Err(TransferError::Busy);
        };

        match plan.fetch {
            FetchBehavior::Deliver => self.serve(counter, &plan),
            FetchBehavior::Timeout => {}
            FetchBehavior::Fail => self
                .session
                .on_ranging_data_complete(counter, Err(TransferError::Rejected(REJECTED_STATUS))),
            FetchBehavior::Refuse => return Err(TransferError::Rejected(REJECTED_STATUS)),
        }
        Ok(())
    }
}

/// Recovers the distance the simulation encoded into the step payloads.
///
/// The IFFT figure comes from the peer's data and the phase-slope figure
/// from the local data; no RTT figure is produced.
#[derive(Debug, Default)]
pub struct SimEstimator {
    calls: usize,
}

impl SimEstimator {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DistanceEstimator for SimEstimator {
    fn estimate(
        &mut self,
        local_steps: &[u8],
        peer_steps: &[u8],
        antenna_paths: u8,
        _role: Role,
    ) -> Result<DistanceEstimate, EstimateError> {
        self.calls += 1;
        if local_steps.is_empty() || peer_steps.is_empty() {
            return Err(EstimateError::NoSteps);
        }
        if antenna_paths == 0 || antenna_paths > MAX_ANTENNA_PATHS {
            return Err(EstimateError::UnsupportedAntennaPaths(antenna_paths));
        }

        let ifft = decode_distance(peer_steps).ok_or(EstimateError::Malformed)?;
        let phase_slope = decode_distance(local_steps).ok_or(EstimateError::Malformed)?;
        Ok(DistanceEstimate {
            ifft: Some(ifft),
            phase_slope: Some(phase_slope),
            rtt: None,
        })
    }
}
