//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to the
//! `log` facade (stderr via `env_logger` in the daemon).  A push channel to
//! the operator UI would implement the same trait.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] as a single line.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::Started { recovered_run } => {
                info!("START | recovered_run={}", recovered_run);
            }
            AppEvent::BusConnected { port } => {
                info!("BUS   | connected port={}", port);
            }
            AppEvent::BusClosed => {
                info!("BUS   | closed");
            }
            AppEvent::BusLinkLost { reason } => {
                error!("BUS   | link lost: {}", reason);
            }
            AppEvent::CommandAccepted(cmd) => {
                info!("CMD   | accepted {:?}", cmd);
            }
            AppEvent::CommandRejected(cmd) => {
                info!("CMD   | rejected {:?}", cmd);
            }
            AppEvent::ScheduleFired { kind, label } => {
                info!("SCHED | fired {:?} '{}'", kind, label);
            }
            AppEvent::SequenceStarted { zones } => {
                info!("RUN   | started over {} zones", zones);
            }
            AppEvent::ZoneStarted {
                zone_id,
                duration_secs,
            } => {
                info!("RUN   | zone {} on for {}s", zone_id, duration_secs);
            }
            AppEvent::ZoneFinished { zone_id } => {
                info!("RUN   | zone {} done", zone_id);
            }
            AppEvent::SequenceStopped { zone_id } => match zone_id {
                Some(z) => info!("RUN   | stopped during zone {}", z),
                None => info!("RUN   | stopped between zones"),
            },
            AppEvent::SequenceFinished => {
                info!("RUN   | finished");
            }
            AppEvent::OutputWriteFailed { reason } => {
                warn!("OUT   | write failed: {}", reason);
            }
            AppEvent::TankLevel(r) => {
                info!(
                    "TANK  | raw={} level={:.1}cm pump={:?} start={:.1} stop={:.1}",
                    r.raw, r.level_cm, r.pump, r.thresholds.start_cm, r.thresholds.stop_cm
                );
            }
        }
    }
}
