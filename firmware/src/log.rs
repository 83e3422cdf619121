//! Logging helpers for the ranging session.
//!
//! Each helper logs through `defmt` on the target and mirrors the same line
//! to stdout on the host.

use ranging_core::buffer::BufferOverflow;
use ranging_core::controller::{ProcedureEnableInfo, RemoteCapabilities};
use ranging_core::estimator::{DistanceEstimate, EstimateError};
use ranging_core::ingest::IngestOutcome;
use ranging_core::orchestrator::{RetryReason, SessionError, SetupStep};
use ranging_core::procedure::ProcedureCounter;
use ranging_core::retriever::FetchCompletion;

#[cfg(target_os = "none")]
use defmt::Display2Format;

#[cfg(target_os = "none")]
pub(crate) fn log_setup_step(step: SetupStep) {
    defmt::info!("setup: {}", step.label());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_setup_step(step: SetupStep) {
    println!("setup: {}", step.label());
}

#[cfg(target_os = "none")]
pub(crate) fn log_session_error(err: &SessionError) {
    defmt::error!("session: {}", Display2Format(err));
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_session_error(err: &SessionError) {
    println!("session: {err}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_capabilities(capabilities: &RemoteCapabilities) {
    defmt::info!("setup: remote capabilities {}", Display2Format(capabilities));
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_capabilities(capabilities: &RemoteCapabilities) {
    println!("setup: remote capabilities {capabilities}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_procedure_enabled(info: &ProcedureEnableInfo) {
    defmt::info!(
        "controller: procedures {} config={=u8} tx_power={=i8}dBm subevent_len={=u32}us count={=u16}",
        if info.enabled { "enabled" } else { "disabled" },
        info.config_id,
        info.selected_tx_power,
        info.subevent_len,
        info.procedure_count
    );
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_procedure_enabled(info: &ProcedureEnableInfo) {
    println!(
        "controller: procedures {} config={} tx_power={}dBm subevent_len={}us count={}",
        if info.enabled { "enabled" } else { "disabled" },
        info.config_id,
        info.selected_tx_power,
        info.subevent_len,
        info.procedure_count
    );
}

#[cfg(target_os = "none")]
pub(crate) fn log_ingest(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::SubeventAborted(counter) => {
            defmt::warn!("local: subevent aborted, dropping procedure {=u16}", counter.value());
        }
        IngestOutcome::Overflow { counter, overflow } => defmt::error!(
            "local: procedure {=u16} dropped, {}",
            counter.value(),
            Display2Format(overflow)
        ),
        IngestOutcome::ProcedureAborted(counter) => {
            defmt::warn!("local: procedure {=u16} aborted", counter.value());
        }
        IngestOutcome::ProcedureComplete(counter) => {
            defmt::info!("local: procedure {=u16} complete", counter.value());
        }
        IngestOutcome::BufferHeld { counter, held } => defmt::warn!(
            "local: procedure {=u16} dropped, buffer holds {=u16}",
            counter.value(),
            held.value()
        ),
        IngestOutcome::BufferBusy(counter) => {
            defmt::warn!("local: buffer busy, dropping procedure {=u16}", counter.value());
        }
        IngestOutcome::Accumulated { .. } | IngestOutcome::Ignored(_) => {}
    }
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_ingest(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::SubeventAborted(counter) => {
            println!("local: subevent aborted, dropping procedure {counter}");
        }
        IngestOutcome::Overflow { counter, overflow } => {
            println!("local: procedure {counter} dropped, {overflow}");
        }
        IngestOutcome::ProcedureAborted(counter) => {
            println!("local: procedure {counter} aborted");
        }
        IngestOutcome::ProcedureComplete(counter) => {
            println!("local: procedure {counter} complete");
        }
        IngestOutcome::BufferHeld { counter, held } => {
            println!("local: procedure {counter} dropped, buffer holds {held}");
        }
        IngestOutcome::BufferBusy(counter) => {
            println!("local: buffer busy, dropping procedure {counter}");
        }
        IngestOutcome::Accumulated { .. } | IngestOutcome::Ignored(_) => {}
    }
}

#[cfg(target_os = "none")]
pub(crate) fn log_peer_ready(counter: ProcedureCounter) {
    defmt::info!("peer: ranging data ready {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_peer_ready(counter: ProcedureCounter) {
    println!("peer: ranging data ready {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_peer_overwritten(counter: ProcedureCounter) {
    defmt::info!("peer: ranging data overwritten {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_peer_overwritten(counter: ProcedureCounter) {
    println!("peer: ranging data overwritten {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_stray_segment(len: usize) {
    defmt::warn!("peer: dropping {} byte segment, no fetch outstanding", len);
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_stray_segment(len: usize) {
    println!("peer: dropping {len} byte segment, no fetch outstanding");
}

#[cfg(target_os = "none")]
pub(crate) fn log_segment_lost(counter: ProcedureCounter) {
    defmt::warn!("peer: buffer busy, abandoning fetch {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_segment_lost(counter: ProcedureCounter) {
    println!("peer: buffer busy, abandoning fetch {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_segment_overflow(counter: ProcedureCounter, overflow: &BufferOverflow) {
    defmt::error!(
        "peer: ranging data {=u16} does not fit, {}",
        counter.value(),
        Display2Format(overflow)
    );
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_segment_overflow(counter: ProcedureCounter, overflow: &BufferOverflow) {
    println!("peer: ranging data {counter} does not fit, {overflow}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_fetch_requested(counter: ProcedureCounter) {
    defmt::info!("peer: requesting ranging data {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_fetch_requested(counter: ProcedureCounter) {
    println!("peer: requesting ranging data {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_fetch_complete(completion: &FetchCompletion) {
    match completion.result {
        Ok(()) => defmt::info!(
            "peer: ranging data get completed for {=u16}",
            completion.counter.value()
        ),
        Err(err) => defmt::error!(
            "peer: ranging data get for {=u16} failed: {}",
            completion.counter.value(),
            Display2Format(&err)
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_fetch_complete(completion: &FetchCompletion) {
    match completion.result {
        Ok(()) => println!(
            "peer: ranging data get completed for {}",
            completion.counter
        ),
        Err(err) => println!(
            "peer: ranging data get for {} failed: {err}",
            completion.counter
        ),
    }
}

#[cfg(target_os = "none")]
pub(crate) fn log_ignored_completion(counter: ProcedureCounter) {
    defmt::warn!("peer: ignoring completion for {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_ignored_completion(counter: ProcedureCounter) {
    println!("peer: ignoring completion for {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_retry(reason: &RetryReason) {
    defmt::warn!("ranging: retry, {}", Display2Format(reason));
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_retry(reason: &RetryReason) {
    println!("ranging: retry, {reason}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_in_flight_dropped(counter: ProcedureCounter) {
    defmt::warn!("ranging: discarding unfinished procedure {=u16}", counter.value());
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_in_flight_dropped(counter: ProcedureCounter) {
    println!("ranging: discarding unfinished procedure {counter}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_estimate(counter: ProcedureCounter, estimate: &DistanceEstimate) {
    defmt::info!(
        "ranging: procedure {=u16} distance {}",
        counter.value(),
        Display2Format(estimate)
    );
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_estimate(counter: ProcedureCounter, estimate: &DistanceEstimate) {
    println!("ranging: procedure {counter} distance {estimate}");
}

#[cfg(target_os = "none")]
pub(crate) fn log_estimate_failed(counter: ProcedureCounter, err: &EstimateError) {
    defmt::warn!(
        "ranging: procedure {=u16} estimate failed: {}",
        counter.value(),
        Display2Format(err)
    );
}

#[cfg(not(target_os = "none"))]
pub(crate) fn log_estimate_failed(counter: ProcedureCounter, err: &EstimateError) {
    println!("ranging: procedure {counter} estimate failed: {err}");
}
