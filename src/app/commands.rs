//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (operator UI,
//! CLI, scheduler) that the [`AppService`](super::service::AppService)
//! interprets and acts upon.

use serde::{Deserialize, Serialize};

use crate::output::OutputFrame;

/// The single outstanding request held by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingCommand {
    /// Run every enabled zone once.
    StartOnce,
    /// Halt the current run and switch everything off.
    Stop,
}

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Request a single pass over the enabled zones.
    StartOnce,

    /// Stop any run and force outputs off.
    Stop,

    /// Acknowledge a pending command; `None` clears whatever is pending.
    Acknowledge(Option<PendingCommand>),

    /// Close and reopen the serial bus.
    Connect { port: String, baud: u32 },

    /// Close the serial bus.
    Disconnect,

    /// Manual coil write (refused while a run is active).
    WriteOutputs(OutputFrame),
}
