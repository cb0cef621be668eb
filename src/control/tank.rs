//! Tank level regulator for the supply pump.
//!
//! Each tick takes one raw level count, calibrates it, and runs the
//! hysteresis controller against the operator thresholds.  The latched pump
//! state is persisted together with the thresholds it was latched under; a
//! threshold change resets the latch to Off.
//!
//! The regulator only decides.  Reading the transmitter and (optionally)
//! switching the pump output is the service's job.

use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use super::hysteresis::{self, PumpState};
use crate::app::ports::{SettingsPort, StatePort};
use crate::model::{TankLatch, TankThresholds};
use crate::sensors::tank_level::TankCalibration;

/// Outcome of one regulator tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TankReading {
    pub raw: u16,
    pub level_cm: f32,
    /// Pump state after this tick.
    pub pump: PumpState,
    pub thresholds: TankThresholds,
    /// The pump state differs from the previous tick.
    pub changed: bool,
}

pub struct TankRegulator {
    settings: Arc<dyn SettingsPort>,
    state: Arc<dyn StatePort>,
    /// In-memory latch; authoritative when the store is unavailable.
    latch: Option<TankLatch>,
    last_calibration: TankCalibration,
    last_thresholds: TankThresholds,
}

impl TankRegulator {
    pub fn new(settings: Arc<dyn SettingsPort>, state: Arc<dyn StatePort>) -> Self {
        Self {
            settings,
            state,
            latch: None,
            last_calibration: TankCalibration::default(),
            last_thresholds: TankThresholds::default(),
        }
    }

    /// Current latched pump state (Off before the first tick).
    pub fn pump_state(&self) -> PumpState {
        self.latch
            .map_or(PumpState::Off, |l| PumpState::from_bool(l.pump_on))
    }

    /// Run one regulation step for the raw transmitter count `raw`.
    pub fn evaluate(&mut self, raw: u16) -> TankReading {
        let calibration = self.calibration();
        let thresholds = self.thresholds();
        let level_cm = calibration.to_cm(raw);

        let stored = self.current_latch(thresholds);
        let previous = PumpState::from_bool(stored.pump_on);

        let (next, should_latch) =
            hysteresis::evaluate(level_cm, thresholds.start_cm, thresholds.stop_cm, previous);

        if should_latch && next != previous {
            info!(
                "Tank: {:.1}cm -> pump {:?} (start {:.1}, stop {:.1})",
                level_cm, next, thresholds.start_cm, thresholds.stop_cm
            );
            self.store_latch(TankLatch {
                pump_on: next.is_on(),
                thresholds,
            });
        }

        TankReading {
            raw,
            level_cm,
            pump: next,
            thresholds,
            changed: next != previous,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    /// Latch valid for `thresholds`, resetting it to Off if they changed.
    fn current_latch(&mut self, thresholds: TankThresholds) -> TankLatch {
        let latch = match self.latch {
            Some(l) => Some(l),
            None => match self.state.load_tank_latch() {
                Ok(l) => l,
                Err(e) => {
                    error!("Tank: latch unreadable: {}", e);
                    None
                }
            },
        };

        match latch {
            Some(l) if l.thresholds == thresholds => {
                self.latch = Some(l);
                l
            }
            stale => {
                if stale.is_some() {
                    info!("Tank: thresholds changed, pump latch reset to Off");
                }
                let fresh = TankLatch {
                    pump_on: false,
                    thresholds,
                };
                self.store_latch(fresh);
                fresh
            }
        }
    }

    fn store_latch(&mut self, latch: TankLatch) {
        self.latch = Some(latch);
        if let Err(e) = self.state.save_tank_latch(&latch) {
            error!("Tank: failed to persist pump latch: {}", e);
        }
    }

    fn calibration(&mut self) -> TankCalibration {
        match self.settings.tank_calibration() {
            Ok(c) => self.last_calibration = c,
            Err(e) => warn!("Tank: calibration unreadable ({}), keeping last", e),
        }
        self.last_calibration
    }

    fn thresholds(&mut self) -> TankThresholds {
        match self.settings.tank_thresholds() {
            Ok(t) => {
                if let Err(e) = t.validate() {
                    if t != self.last_thresholds {
                        warn!(
                            "Tank: {} (start {:.1}, stop {:.1}); start level takes precedence",
                            e, t.start_cm, t.stop_cm
                        );
                    }
                }
                self.last_thresholds = t;
            }
            Err(e) => warn!("Tank: thresholds unreadable ({}), keeping last", e),
        }
        self.last_thresholds
    }
}
