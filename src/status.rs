//! Point-in-time status for operators.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::app::commands::PendingCommand;
use crate::control::tank::TankReading;
use crate::model::{LastFired, TankThresholds};

/// Everything the operator view shows, captured under one clock reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub now: NaiveDateTime,
    pub pending: Option<PendingCommand>,
    pub running: bool,
    pub current_zone: Option<u16>,
    /// `ceil(duration - elapsed)`, never negative.  `None` when idle.
    pub remaining_secs: Option<u32>,
    pub pump_on: bool,
    pub valves: Vec<bool>,
    pub bus_connected: bool,
    pub bus_port: Option<String>,
    /// Last regulator tick, if one ran.
    pub tank: Option<TankReading>,
    /// Supply pump as the operator sees it: the sequence's pump while a
    /// run is active, the regulator latch otherwise.
    pub tank_pump_on: bool,
    pub thresholds: TankThresholds,
    pub last_fired: Option<LastFired>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.now.format("%Y-%m-%d %H:%M:%S"))?;
        match (self.current_zone, self.remaining_secs) {
            (Some(z), Some(left)) if self.running => write!(f, "zone {z} ({left}s left)")?,
            _ => write!(f, "idle")?,
        }
        if let Some(p) = self.pending {
            write!(f, " pending={p:?}")?;
        }
        match &self.bus_port {
            Some(port) if self.bus_connected => write!(f, " bus={port}")?,
            _ => write!(f, " bus=closed")?,
        }
        if let Some(t) = &self.tank {
            write!(f, " tank={:.1}cm", t.level_cm)?;
        }
        write!(f, " pump={}", if self.tank_pump_on { "on" } else { "off" })?;
        if let Some(l) = &self.last_fired {
            write!(f, " last_fired='{}'@{}", l.label, l.at.format("%H:%M"))?;
        }
        Ok(())
    }
}
