//! Embassy runtime for one ranging session.
//!
//! Controller and transport callbacks feed the session through the `on_*`
//! entry points. Those never block: they update the shared procedure state
//! under the session mutex and raise a signal. The ranging loop is the only
//! consumer of the signals and the only place that resets the shared state.
//!
//! The step buffers sit behind their own async mutex. Callbacks only try to
//! take it; the loop holds it to reset the buffers and while the estimator
//! runs, so estimation never happens inside the blocking critical section.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use embassy_time::with_deadline;
use ranging_core::buffer::{LOCAL_PROCEDURE_MEM, PEER_PROCEDURE_MEM};
use ranging_core::config::SessionConfig;
use ranging_core::controller::{
    ControllerError, CsController, ProcedureEnableInfo, RemoteCapabilities,
};
use ranging_core::estimator::DistanceEstimator;
use ranging_core::ingest::IngestOutcome;
use ranging_core::orchestrator::{
    CycleOutcome, CycleStats, PeerReadyDecision, RangingCycle, RetryReason, SessionError,
    SetupError, SetupStep,
};
use ranging_core::procedure::{ProcedureCounter, Role, SubeventResult};
use ranging_core::retriever::{
    FetchCompletion, RangingDataTransport, SegmentOutcome, TransferError,
};
use ranging_core::state::{ProcedureState, StepBuffers};
use ranging_core::status::SessionSnapshot;
use ranging_core::telemetry::{RangingEventKind, TelemetryPayload, TelemetryRecorder};

use crate::instant::SessionInstant;
use crate::log::{
    log_capabilities, log_estimate, log_estimate_failed, log_fetch_complete, log_fetch_requested,
    log_ignored_completion, log_in_flight_dropped, log_ingest, log_peer_overwritten,
    log_peer_ready, log_procedure_enabled, log_retry, log_segment_lost, log_segment_overflow,
    log_session_error, log_setup_step, log_stray_segment,
};
use crate::status::SessionStatus;

#[cfg(target_os = "none")]
pub type SessionMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
pub type SessionMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;

/// Telemetry ring type kept by every session.
pub type SessionTelemetry = TelemetryRecorder<SessionInstant>;

struct Shared {
    procedure: ProcedureState,
    telemetry: SessionTelemetry,
    last_retry: Option<RetryReason>,
}

/// One Channel Sounding ranging session over a single connection.
pub struct RangingSession<
    M: RawMutex = SessionMutex,
    const LOCAL: usize = LOCAL_PROCEDURE_MEM,
    const PEER: usize = PEER_PROCEDURE_MEM,
> {
    config: SessionConfig,
    shared: Mutex<M, RefCell<Shared>>,
    steps: AsyncMutex<M, StepBuffers<LOCAL, PEER>>,
    local_complete: Signal<M, ProcedureCounter>,
    peer_ready: Signal<M, ProcedureCounter>,
    fetch_complete: Signal<M, FetchCompletion>,
    status: SessionStatus,
}

impl<M: RawMutex, const LOCAL: usize, const PEER: usize> RangingSession<M, LOCAL, PEER> {
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self {
            config,
            shared: Mutex::new(RefCell::new(Shared {
                procedure: ProcedureState::new(),
                telemetry: TelemetryRecorder::new(),
                last_retry: None,
            })),
            steps: AsyncMutex::new(StepBuffers::new()),
            local_complete: Signal::new(),
            peer_ready: Signal::new(),
            fetch_complete: Signal::new(),
            status: SessionStatus::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn status(&self) -> &SessionStatus {
        &self.status
    }

    fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        self.shared.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Current counters, buffer levels and loop statistics.
    ///
    /// Buffer levels read as zero while the loop holds the step buffers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let (mut snapshot, last_retry) = self.with_shared(|shared| {
            (SessionSnapshot::capture(&shared.procedure), shared.last_retry)
        });
        if let Ok(steps) = self.steps.try_lock() {
            snapshot = snapshot.with_buffers(&*steps);
        }
        snapshot.with_cycle(self.status.state(), self.status.stats(), last_retry)
    }

    /// Runs `f` against the telemetry ring.
    pub fn with_telemetry<R>(&self, f: impl FnOnce(&SessionTelemetry) -> R) -> R {
        self.with_shared(|shared| f(&shared.telemetry))
    }

    /// Controller callback: one subevent of a local procedure finished.
    pub fn on_subevent_result(&self, result: &SubeventResult<'_>) -> IngestOutcome {
        let now = SessionInstant::now();
        let outcome = self.with_shared(|shared| {
            let Ok(mut steps) = self.steps.try_lock() else {
                return shared.procedure.refuse_subevent(result);
            };
            let outcome = shared.procedure.ingest_subevent(&mut *steps, result);
            if let IngestOutcome::ProcedureComplete(counter) = outcome {
                shared.telemetry.record_procedure(
                    RangingEventKind::LocalComplete,
                    counter,
                    steps.local_steps().len(),
                    now,
                );
            }
            outcome
        });

        log_ingest(&outcome);
        if let IngestOutcome::ProcedureComplete(counter) = outcome {
            self.local_complete.signal(counter);
        }
        outcome
    }

    /// Controller callback: procedures were enabled or disabled.
    pub fn on_procedure_enabled(&self, info: &ProcedureEnableInfo) {
        log_procedure_enabled(info);
    }

    /// Transport callback: the peer has ranging data for `counter`.
    pub fn on_ranging_data_ready(&self, counter: ProcedureCounter) {
        let now = SessionInstant::now();
        self.with_shared(|shared| {
            shared.procedure.record_peer_ready(counter);
            shared
                .telemetry
                .record_procedure(RangingEventKind::PeerReady, counter, 0, now);
        });
        log_peer_ready(counter);
        self.peer_ready.signal(counter);
    }

    /// Transport callback: the peer overwrote its data for `counter`.
    pub fn on_ranging_data_overwritten(&self, counter: ProcedureCounter) {
        let now = SessionInstant::now();
        self.with_shared(|shared| {
            shared.procedure.record_peer_overwritten(counter);
            shared
                .telemetry
                .record_procedure(RangingEventKind::PeerOverwritten, counter, 0, now);
        });
        log_peer_overwritten(counter);
    }

    /// Transport callback: a reassembled segment of the requested data.
    pub fn on_ranging_data_segment(&self, segment: &[u8]) -> SegmentOutcome {
        let outcome = self.with_shared(|shared| match self.steps.try_lock() {
            Ok(mut steps) => shared.procedure.append_peer_segment(&mut *steps, segment),
            Err(_) => shared.procedure.refuse_peer_segment(),
        });
        match outcome {
            SegmentOutcome::Appended(_) => {}
            SegmentOutcome::Stray => log_stray_segment(segment.len()),
            SegmentOutcome::Overflow { counter, overflow } => {
                log_segment_overflow(counter, &overflow);
            }
            SegmentOutcome::Lost(counter) => log_segment_lost(counter),
        }
        outcome
    }

    /// Transport callback: the transfer of `counter` finished.
    ///
    /// Completions for anything other than the outstanding fetch are logged
    /// and dropped.
    pub fn on_ranging_data_complete(
        &self,
        counter: ProcedureCounter,
        result: Result<(), TransferError>,
    ) {
        let completion = match result {
            Ok(()) => FetchCompletion::success(counter),
            Err(err) => FetchCompletion::failure(counter, err),
        };
        let now = SessionInstant::now();
        let accepted = self.with_shared(|shared| {
            let accepted = shared.procedure.complete_fetch(completion)?;
            let received = self
                .steps
                .try_lock()
                .map_or(0, |steps| steps.peer_steps().len());
            shared.telemetry.record_procedure(
                RangingEventKind::FetchComplete,
                counter,
                received,
                now,
            );
            Some(accepted)
        });

        match accepted {
            Some(completion) => {
                log_fetch_complete(&completion);
                self.fetch_complete.signal(completion);
            }
            None => log_ignored_completion(counter),
        }
    }

    /// Prepares the controller and transport for ranging.
    ///
    /// Returns the peer's capabilities for initiator sessions. Reflector
    /// sessions only apply their default settings and return `None`.
    pub async fn setup<C, T>(
        &self,
        controller: &mut C,
        transport: &mut T,
    ) -> Result<Option<RemoteCapabilities>, SessionError>
    where
        C: CsController,
        T: RangingDataTransport,
    {
        let config = &self.config;
        setup_step(
            SetupStep::DefaultSettings,
            controller
                .set_default_settings(&config.default_settings)
                .await,
        )?;
        if config.role == Role::Reflector {
            self.record_setup_complete();
            return Ok(None);
        }

        setup_step(
            SetupStep::SubscribeOverwritten,
            transport.subscribe_overwritten(),
        )?;
        setup_step(SetupStep::SubscribeReady, transport.subscribe_ready())?;
        setup_step(SetupStep::SubscribeOnDemand, transport.subscribe_on_demand())?;
        setup_step(
            SetupStep::SubscribeControlPoint,
            transport.subscribe_control_point(),
        )?;
        let capabilities = setup_step(
            SetupStep::RemoteCapabilities,
            controller.read_remote_capabilities().await,
        )?;
        log_capabilities(&capabilities);
        setup_step(
            SetupStep::CreateConfig,
            controller.create_config(&config.create_config).await,
        )?;
        setup_step(SetupStep::EnableSecurity, controller.enable_security().await)?;
        setup_step(
            SetupStep::ProcedureParameters,
            controller.set_procedure_parameters(&config.procedure).await,
        )?;

        self.record_setup_complete();
        Ok(Some(capabilities))
    }

    fn record_setup_complete(&self) {
        let now = SessionInstant::now();
        self.with_shared(|shared| {
            shared
                .telemetry
                .record(RangingEventKind::SetupComplete, TelemetryPayload::None, now);
        });
    }

    /// Validates the configuration, runs setup and then ranging cycles until
    /// the configured number of estimates was produced.
    ///
    /// Reflector sessions return right after setup. Non-fatal failures take
    /// the retry edge and the loop continues; only fatal errors end it.
    pub async fn run<C, T, E>(
        &self,
        controller: &mut C,
        transport: &mut T,
        estimator: &mut E,
    ) -> Result<CycleStats, SessionError>
    where
        C: CsController,
        T: RangingDataTransport,
        E: DistanceEstimator,
    {
        if !self.config.timeouts.is_valid() {
            let err = SessionError::InvalidTimeouts;
            log_session_error(&err);
            return Err(err);
        }

        self.setup(controller, transport).await?;
        let mut cycle = RangingCycle::new(self.config.timeouts);
        if self.config.role == Role::Reflector {
            return Ok(*cycle.stats());
        }

        loop {
            if self
                .config
                .max_estimates
                .is_some_and(|limit| cycle.stats().estimates >= limit)
            {
                return Ok(*cycle.stats());
            }
            if let Err(err) = self
                .run_cycle(&mut cycle, controller, transport, estimator)
                .await
            {
                log_session_error(&err);
                return Err(err);
            }
        }
    }

    /// Runs one enable / wait / align / fetch / estimate cycle.
    ///
    /// Every cycle ends on the retry edge bookkeeping: both buffers are
    /// emptied, any outstanding fetch is forgotten and stale local-complete
    /// and fetch-complete signals are cleared. A pending peer-ready signal
    /// is kept.
    pub async fn run_cycle<C, T, E>(
        &self,
        cycle: &mut RangingCycle<SessionInstant>,
        controller: &mut C,
        transport: &mut T,
        estimator: &mut E,
    ) -> Result<CycleOutcome, SessionError>
    where
        C: CsController,
        T: RangingDataTransport,
        E: DistanceEstimator,
    {
        let result = self
            .drive_cycle(cycle, controller, transport, estimator)
            .await;
        self.end_cycle(result.as_ref().ok()).await;

        match &result {
            Ok(outcome) => self.status.record_outcome(outcome),
            Err(SessionError::LinkLost) => {
                self.status.record_link_lost();
                let now = SessionInstant::now();
                self.with_shared(|shared| {
                    shared
                        .telemetry
                        .record(RangingEventKind::LinkLost, TelemetryPayload::None, now);
                });
            }
            Err(_) => self.status.record_state(cycle.state()),
        }
        result
    }

    async fn drive_cycle<C, T, E>(
        &self,
        cycle: &mut RangingCycle<SessionInstant>,
        controller: &mut C,
        transport: &mut T,
        estimator: &mut E,
    ) -> Result<CycleOutcome, SessionError>
    where
        C: CsController,
        T: RangingDataTransport,
        E: DistanceEstimator,
    {
        let started = SessionInstant::now();
        let local_deadline = cycle.begin(started)?;
        self.status.record_cycle_started();
        self.status.record_state(cycle.state());
        self.with_shared(|shared| shared.telemetry.record_cycle_started(started));

        match controller
            .enable_procedures(self.config.create_config.id)
            .await
        {
            Ok(()) => {}
            Err(ControllerError::Disconnected) => return Err(SessionError::LinkLost),
            Err(err) => return Ok(retry(cycle, RetryReason::EnableFailed(err))),
        }

        let Ok(counter) = with_deadline(local_deadline.into_embassy(), self.local_complete.wait())
            .await
        else {
            // Give the peer a chance to announce a counter before retrying.
            if let Some(grace) = cycle.realignment_deadline(SessionInstant::now())? {
                let _ = with_deadline(grace.into_embassy(), self.peer_ready.wait()).await;
            }
            return Ok(retry(cycle, RetryReason::LocalTimeout));
        };

        let peer_deadline = cycle.local_complete(counter, SessionInstant::now())?;
        self.status.record_state(cycle.state());
        if with_deadline(peer_deadline.into_embassy(), self.peer_ready.wait())
            .await
            .is_err()
        {
            return Ok(retry(cycle, RetryReason::PeerReadyTimeout));
        }

        let decision = self.with_shared(|shared| {
            cycle.peer_ready(shared.procedure.tracker(), SessionInstant::now())
        })?;
        let (counter, fetch_deadline) = match decision {
            PeerReadyDecision::Fetch { counter, deadline } => (counter, deadline),
            PeerReadyDecision::Retry(reason) => return Ok(CycleOutcome::Retry(reason)),
        };
        self.status.record_state(cycle.state());

        if let Err(err) = self.request_fetch(counter, transport).await {
            if err == TransferError::Disconnected {
                return Err(SessionError::LinkLost);
            }
            return Ok(retry(cycle, RetryReason::FetchRequestFailed(err)));
        }

        let Ok(completion) =
            with_deadline(fetch_deadline.into_embassy(), self.fetch_complete.wait()).await
        else {
            return Ok(retry(cycle, RetryReason::FetchTimeout));
        };
        if let Some(reason) = cycle.fetch_completed(&completion)? {
            return Ok(CycleOutcome::Retry(reason));
        }

        self.status.record_state(cycle.state());
        let antenna_paths = self.with_shared(|shared| shared.procedure.antenna_paths());
        let result = self
            .steps
            .lock()
            .await
            .estimate(estimator, antenna_paths, self.config.role);
        cycle.finish_estimate(result).map_err(SessionError::from)
    }

    async fn request_fetch<T>(
        &self,
        counter: ProcedureCounter,
        transport: &mut T,
    ) -> Result<(), TransferError>
    where
        T: RangingDataTransport,
    {
        let now = SessionInstant::now();
        {
            let mut steps = self.steps.lock().await;
            self.with_shared(|shared| {
                shared.procedure.begin_fetch(&mut *steps, counter)?;
                shared
                    .telemetry
                    .record_procedure(RangingEventKind::FetchStarted, counter, 0, now);
                Ok(())
            })?;
        }

        log_fetch_requested(counter);
        transport.request_ranging_data(counter).inspect_err(|_| {
            self.with_shared(|shared| shared.procedure.abort_fetch());
        })
    }

    async fn end_cycle(&self, outcome: Option<&CycleOutcome>) {
        let now = SessionInstant::now();
        let mut steps = self.steps.lock().await;
        let local_bytes = steps.local_steps().len();
        let reset = self.with_shared(|shared| {
            match outcome {
                Some(CycleOutcome::Retry(reason)) => {
                    shared.last_retry = Some(*reason);
                    shared.telemetry.record_retry(*reason, now);
                }
                Some(CycleOutcome::Estimated { counter, .. }) => {
                    shared.telemetry.record_procedure(
                        RangingEventKind::Estimated,
                        *counter,
                        local_bytes,
                        now,
                    );
                }
                Some(CycleOutcome::EstimateFailed { counter, .. }) => {
                    shared.telemetry.record_procedure(
                        RangingEventKind::EstimateFailed,
                        *counter,
                        local_bytes,
                        now,
                    );
                }
                None => {}
            }
            shared.procedure.reset_for_retry(&mut *steps)
        });
        drop(steps);
        self.local_complete.reset();
        self.fetch_complete.reset();

        match outcome {
            Some(CycleOutcome::Retry(reason)) => log_retry(reason),
            Some(CycleOutcome::Estimated { counter, estimate }) => log_estimate(*counter, estimate),
            Some(CycleOutcome::EstimateFailed { counter, error }) => {
                log_estimate_failed(*counter, error);
            }
            None => {}
        }
        if let Some(counter) = reset.dropped {
            log_in_flight_dropped(counter);
        }
    }
}

fn retry(cycle: &mut RangingCycle<SessionInstant>, reason: RetryReason) -> CycleOutcome {
    CycleOutcome::Retry(cycle.retry(reason))
}

fn setup_step<T, E>(step: SetupStep, result: Result<T, E>) -> Result<T, SessionError>
where
    E: Into<SetupError>,
{
    log_setup_step(step);
    result.map_err(|err| {
        let err = SessionError::Setup(step, err.into());
        log_session_error(&err);
        err
    })
}
