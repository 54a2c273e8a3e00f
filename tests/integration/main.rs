//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives the controller against the
//! simulated platform.  All tests run on the host with a manual clock, so
//! every timeout is exercised without sleeping.

#![cfg(not(target_os = "espidf"))]

mod commissioning_tests;
mod harness;
mod recovery_tests;
mod scenario_tests;
