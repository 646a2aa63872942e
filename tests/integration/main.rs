//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulation backend or the recording mock.  All tests run
//! on the host with no real hardware required.

mod device_lifecycle_tests;
mod filter_flow_tests;
mod mock_hw;
