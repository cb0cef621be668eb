//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) and the sequence thread
//! emit these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them: log lines
//! today, a push channel to the UI later.

use super::commands::PendingCommand;
use super::ports::ScheduleFiredKind;
use crate::control::tank::TankReading;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The service finished boot recovery.
    Started { recovered_run: bool },

    /// A bus session was opened.
    BusConnected { port: String },

    /// The bus session was closed on request.
    BusClosed,

    /// The line dropped under an open session.
    BusLinkLost { reason: String },

    /// A command was stored in the coordinator.
    CommandAccepted(PendingCommand),

    /// A command was refused because another one is pending or a run is active.
    CommandRejected(PendingCommand),

    /// A schedule fired and claimed a run.
    ScheduleFired { kind: ScheduleFiredKind, label: String },

    /// A run began over `zones` enabled zones.
    SequenceStarted { zones: usize },

    /// Outputs switched to `zone_id` for `duration_secs`.
    ZoneStarted { zone_id: u16, duration_secs: u32 },

    /// `zone_id` ran its full duration.
    ZoneFinished { zone_id: u16 },

    /// The run was halted by a stop request.
    SequenceStopped { zone_id: Option<u16> },

    /// The run completed every zone.
    SequenceFinished,

    /// A frame could not be written to the controller.
    OutputWriteFailed { reason: String },

    /// Periodic tank level snapshot.
    TankLevel(TankReading),
}
