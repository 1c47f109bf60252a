//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through the public `Plant` API against mock adapters.  Everything runs
//! in-process with a fixed RNG seed.

mod driver_tests;
mod incident_tests;
mod mock_ports;
mod persistence_tests;
