//! crema: espresso machine control firmware library.
//!
//! Exposes the pure-logic core for integration testing and host
//! simulation.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod alarms;
pub mod app;
pub mod config;
pub mod control;
pub mod crc;
pub mod error;
pub mod fsm;
pub mod maintenance;
pub mod persist;
pub mod rpc;
pub mod safety;
pub mod scheduler;

// Hardware-facing modules; the actual register access is cfg-gated inside.
pub mod adapters;
pub mod drivers;
pub mod pins;
pub mod sensors;
