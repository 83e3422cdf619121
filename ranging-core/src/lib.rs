#![no_std]

// Shared logic for the Channel Sounding ranging engine.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. It owns the procedure data model and the pure
// bookkeeping; the firmware crate layers signals, timers and logging on top.
pub mod buffer;
pub mod config;
pub mod controller;
pub mod counters;
pub mod estimator;
pub mod ingest;
pub mod orchestrator;
pub mod procedure;
pub mod retriever;
pub mod state;
pub mod status;
pub mod telemetry;
