//! Scenario scripts for the emulator.
//!
//! A script is line oriented. Blank lines and `#` comments are skipped and
//! every other line holds one directive:
//!
//! ```text
//! role initiator
//! timeouts local=200ms peer=200ms grace=50ms fetch=1s
//! capabilities paths=4 antennas=2
//! fail-setup create-config
//! procedure 5 subevents=3 steps=8 paths=4 distance=150cm
//! procedure 7 peer=6
//! procedure 9 local=overflow
//! procedure 3 fetch=timeout
//! stray 32
//! enable-fail
//! disconnect
//! ```
//!
//! `procedure`, `enable-fail` and `disconnect` each drive one ranging cycle.

use std::fmt;
use std::time::Duration;

use ranging_core::config::RangingTimeouts;
use ranging_core::controller::RemoteCapabilities;
use ranging_core::orchestrator::SetupStep;
use ranging_core::procedure::Role;
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{alt, preceded, repeat, terminated};
use winnow::prelude::*;
use winnow::token::take_while;

/// Setup steps addressable from `fail-setup`.
pub const SETUP_STEP_TAGS: &[(&str, SetupStep)] = &[
    ("default-settings", SetupStep::DefaultSettings),
    ("subscribe-overwritten", SetupStep::SubscribeOverwritten),
    ("subscribe-ready", SetupStep::SubscribeReady),
    ("subscribe-on-demand", SetupStep::SubscribeOnDemand),
    ("subscribe-control-point", SetupStep::SubscribeControlPoint),
    ("remote-capabilities", SetupStep::RemoteCapabilities),
    ("create-config", SetupStep::CreateConfig),
    ("enable-security", SetupStep::EnableSecurity),
    ("procedure-parameters", SetupStep::ProcedureParameters),
];

/// How the simulated controller runs the local procedure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LocalBehavior {
    /// Every subevent succeeds and the last one completes the procedure.
    Complete,
    /// The final subevent reports the procedure aborted.
    Aborted,
    /// The first subevent is aborted.
    SubeventAborted,
    /// Subevents arrive but the procedure never completes.
    Incomplete,
    /// The step data exceeds the local step buffer.
    Overflow,
}

/// How the simulated peer answers a ranging data request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FetchBehavior {
    Deliver,
    /// The transfer starts but never completes.
    Timeout,
    /// The transfer completes with an error.
    Fail,
    /// The request itself is refused.
    Refuse,
}

/// One simulated procedure on both sides of the link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcedurePlan {
    pub counter: u16,
    pub subevents: usize,
    /// Step records per subevent.
    pub steps: usize,
    pub antenna_paths: u8,
    /// Counter the peer announces, `None` when it stays silent.
    pub peer_counter: Option<u16>,
    /// Counter the peer reports as overwritten before announcing.
    pub overwritten: Option<u16>,
    pub local: LocalBehavior,
    pub fetch: FetchBehavior,
    /// Number of segments the peer's data is split into.
    pub segments: usize,
    pub distance_cm: u16,
}

impl ProcedurePlan {
    #[must_use]
    pub const fn aligned(counter: u16) -> Self {
        Self {
            counter,
            subevents: 3,
            steps: 8,
            antenna_paths: 1,
            peer_counter: Some(counter),
            overwritten: None,
            local: LocalBehavior::Complete,
            fetch: FetchBehavior::Deliver,
            segments: 2,
            distance_cm: 100,
        }
    }
}

/// Something the emulator does, in script order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScenarioEvent {
    /// Run one cycle against this procedure.
    Procedure(ProcedurePlan),
    /// Run one cycle whose enable command is rejected.
    EnableFail,
    /// Run one cycle during which the link drops.
    Disconnect,
    /// Deliver a peer segment of this many bytes outside any fetch.
    Stray(usize),
}

/// A parsed scenario script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub role: Role,
    pub timeouts: RangingTimeouts,
    pub capabilities: RemoteCapabilities,
    pub setup_failure: Option<SetupStep>,
    pub events: Vec<ScenarioEvent>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            timeouts: RangingTimeouts::DEFAULT,
            capabilities: RemoteCapabilities {
                num_config_supported: 4,
                max_consecutive_procedures_supported: 0,
                num_antennas_supported: 2,
                max_antenna_paths_supported: 4,
                initiator_supported: true,
                reflector_supported: true,
                mode_3_supported: false,
            },
            setup_failure: None,
            events: Vec::new(),
        }
    }
}

/// A script line that could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

#[derive(Copy, Clone, Debug)]
enum Directive {
    Role(Role),
    Timeouts(TimeoutOverride),
    Capabilities(CapabilityOverride),
    FailSetup(SetupStep),
    Event(ScenarioEvent),
}

#[derive(Copy, Clone, Debug, Default)]
struct TimeoutOverride {
    local_complete: Option<Duration>,
    peer_ready: Option<Duration>,
    realignment_grace: Option<Duration>,
    fetch: Option<Duration>,
}

#[derive(Copy, Clone, Debug, Default)]
struct CapabilityOverride {
    antenna_paths: Option<u8>,
    antennas: Option<u8>,
}

#[derive(Copy, Clone, Debug)]
enum ProcedureOption {
    Subevents(usize),
    Steps(usize),
    Paths(u8),
    Peer(Option<u16>),
    Overwritten(u16),
    Local(LocalBehavior),
    Fetch(FetchBehavior),
    Segments(usize),
    Distance(u16),
}

/// Parses a whole script.
///
/// # Errors
///
/// Returns the first line that is not a valid directive.
pub fn parse_scenario(source: &str) -> Result<Scenario, ScriptError> {
    let mut scenario = Scenario::default();

    for (index, raw) in source.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let directive = terminated(directive, space0)
            .parse(line)
            .map_err(|err| ScriptError {
                line: index + 1,
                message: err.to_string(),
            })?;
        apply(&mut scenario, directive);
    }

    Ok(scenario)
}

fn apply(scenario: &mut Scenario, directive: Directive) {
    match directive {
        Directive::Role(role) => scenario.role = role,
        Directive::Timeouts(overrides) => {
            let timeouts = &mut scenario.timeouts;
            if let Some(value) = overrides.local_complete {
                timeouts.local_complete = value;
            }
            if let Some(value) = overrides.peer_ready {
                timeouts.peer_ready = value;
            }
            if let Some(value) = overrides.realignment_grace {
                timeouts.realignment_grace = value;
            }
            if let Some(value) = overrides.fetch {
                timeouts.fetch = value;
            }
        }
        Directive::Capabilities(overrides) => {
            if let Some(paths) = overrides.antenna_paths {
                scenario.capabilities.max_antenna_paths_supported = paths;
            }
            if let Some(antennas) = overrides.antennas {
                scenario.capabilities.num_antennas_supported = antennas;
            }
        }
        Directive::FailSetup(step) => scenario.setup_failure = Some(step),
        Directive::Event(event) => scenario.events.push(event),
    }
}

fn directive(input: &mut &str) -> ModalResult<Directive> {
    alt((
        preceded(("role", space1), role).map(Directive::Role),
        preceded("timeouts", timeout_overrides).map(Directive::Timeouts),
        preceded("capabilities", capability_overrides).map(Directive::Capabilities),
        preceded(("fail-setup", space1), setup_step).map(Directive::FailSetup),
        preceded(("procedure", space1), procedure)
            .map(|plan| Directive::Event(ScenarioEvent::Procedure(plan))),
        preceded(("stray", space1), dec_uint)
            .map(|len| Directive::Event(ScenarioEvent::Stray(len))),
        "enable-fail".value(Directive::Event(ScenarioEvent::EnableFail)),
        "disconnect".value(Directive::Event(ScenarioEvent::Disconnect)),
    ))
    .parse_next(input)
}

fn role(input: &mut &str) -> ModalResult<Role> {
    alt((
        "initiator".value(Role::Initiator),
        "reflector".value(Role::Reflector),
    ))
    .parse_next(input)
}

fn setup_step(input: &mut &str) -> ModalResult<SetupStep> {
    take_while(1.., |c: char| c.is_ascii_lowercase() || c == '-')
        .verify_map(|tag: &str| {
            SETUP_STEP_TAGS
                .iter()
                .find(|(candidate, _)| *candidate == tag)
                .map(|(_, step)| *step)
        })
        .parse_next(input)
}

/// Parses `<n>ms` or `<n>s`.
fn duration(input: &mut &str) -> ModalResult<Duration> {
    (
        dec_uint::<_, u64, _>,
        alt(("ms".value(1u64), "s".value(1_000u64))),
    )
        .map(|(value, scale)| Duration::from_millis(value.saturating_mul(scale)))
        .parse_next(input)
}

fn timeout_overrides(input: &mut &str) -> ModalResult<TimeoutOverride> {
    let assignments: Vec<(u8, Duration)> = repeat(
        1..,
        preceded(
            space1,
            alt((
                preceded("local=", duration).map(|d| (0, d)),
                preceded("peer=", duration).map(|d| (1, d)),
                preceded("grace=", duration).map(|d| (2, d)),
                preceded("fetch=", duration).map(|d| (3, d)),
            )),
        ),
    )
    .parse_next(input)?;

    let mut overrides = TimeoutOverride::default();
    for (slot, value) in assignments {
        match slot {
            0 => overrides.local_complete = Some(value),
            1 => overrides.peer_ready = Some(value),
            2 => overrides.realignment_grace = Some(value),
            _ => overrides.fetch = Some(value),
        }
    }
    Ok(overrides)
}

fn capability_overrides(input: &mut &str) -> ModalResult<CapabilityOverride> {
    let assignments: Vec<(bool, u8)> = repeat(
        1..,
        preceded(
            space1,
            alt((
                preceded("paths=", dec_uint::<_, u8, _>).map(|n| (true, n)),
                preceded("antennas=", dec_uint::<_, u8, _>).map(|n| (false, n)),
            )),
        ),
    )
    .parse_next(input)?;

    let mut overrides = CapabilityOverride::default();
    for (paths, value) in assignments {
        if paths {
            overrides.antenna_paths = Some(value);
        } else {
            overrides.antennas = Some(value);
        }
    }
    Ok(overrides)
}

fn procedure(input: &mut &str) -> ModalResult<ProcedurePlan> {
    let counter: u16 = dec_uint.parse_next(input)?;
    let options: Vec<ProcedureOption> =
        repeat(0.., preceded(space1, procedure_option)).parse_next(input)?;

    let mut plan = ProcedurePlan::aligned(counter);
    for option in options {
        match option {
            ProcedureOption::Subevents(n) => plan.subevents = n,
            ProcedureOption::Steps(n) => plan.steps = n,
            ProcedureOption::Paths(n) => plan.antenna_paths = n,
            ProcedureOption::Peer(peer) => plan.peer_counter = peer,
            ProcedureOption::Overwritten(peer) => plan.overwritten = Some(peer),
            ProcedureOption::Local(local) => plan.local = local,
            ProcedureOption::Fetch(fetch) => plan.fetch = fetch,
            ProcedureOption::Segments(n) => plan.segments = n,
            ProcedureOption::Distance(cm) => plan.distance_cm = cm,
        }
    }
    Ok(plan)
}

fn procedure_option(input: &mut &str) -> ModalResult<ProcedureOption> {
    alt((
        preceded("subevents=", dec_uint).map(ProcedureOption::Subevents),
        preceded("steps=", dec_uint).map(ProcedureOption::Steps),
        preceded("paths=", dec_uint).map(ProcedureOption::Paths),
        preceded(
            "peer=",
            alt(("none".value(None), dec_uint::<_, u16, _>.map(Some))),
        )
        .map(ProcedureOption::Peer),
        preceded("overwritten=", dec_uint).map(ProcedureOption::Overwritten),
        preceded("local=", local_behavior).map(ProcedureOption::Local),
        preceded("fetch=", fetch_behavior).map(ProcedureOption::Fetch),
        preceded("segments=", dec_uint).map(ProcedureOption::Segments),
        preceded("distance=", terminated(dec_uint, "cm")).map(ProcedureOption::Distance),
    ))
    .parse_next(input)
}

fn local_behavior(input: &mut &str) -> ModalResult<LocalBehavior> {
    alt((
        "complete".value(LocalBehavior::Complete),
        "aborted".value(LocalBehavior::Aborted),
        "abort-subevent".value(LocalBehavior::SubeventAborted),
        "incomplete".value(LocalBehavior::Incomplete),
        "overflow".value(LocalBehavior::Overflow),
    ))
    .parse_next(input)
}

fn fetch_behavior(input: &mut &str) -> ModalResult<FetchBehavior> {
    alt((
        "ok".value(FetchBehavior::Deliver),
        "timeout".value(FetchBehavior::Timeout),
        "fail".value(FetchBehavior::Fail),
        "refuse".value(FetchBehavior::Refuse),
    ))
    .parse_next(input)
}
