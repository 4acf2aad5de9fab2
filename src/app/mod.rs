//! Application core: pure domain logic, zero I/O.
//!
//! Business rules for the espresso machine: FSM orchestration, safety
//! evaluation, boiler control, maintenance and the hub link loop.  All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod control_loop;
pub mod events;
pub mod ports;
pub mod service;
