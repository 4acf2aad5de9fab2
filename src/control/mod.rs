//! Boiler temperature control: channel arena and PID.

pub mod boiler;
pub mod pid;
