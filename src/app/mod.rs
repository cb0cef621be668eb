//! Application core.
//!
//! The business rules that tie the control modules together: operator
//! commands, boot recovery, the poll-loop tick and status reporting.  All
//! interaction with the serial line, the store and the clock happens through
//! **port traits** defined in [`ports`], keeping this layer testable without
//! real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
