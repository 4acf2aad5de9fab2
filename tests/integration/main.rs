//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through the full control loop, against mock adapters and a captured
//! hub link.  All tests run on the host (x86_64) with no real hardware
//! required.

mod control_loop_tests;
mod dispatcher_tests;
mod maintenance_tests;
mod mock_hw;
