//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host with no serial line,
//! GPIO or data directory required.

mod bus_session_tests;
mod scheduler_tests;
mod sequence_tests;
