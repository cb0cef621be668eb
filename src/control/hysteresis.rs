//! Two-threshold hysteresis for the tank supply pump
//!
//! Switches the pump on at or below the start level and off at or above the
//! stop level; anything in between keeps the previous state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PumpState {
    On,
    #[default]
    Off,
}

impl PumpState {
    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn from_bool(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

/// Next pump state and whether it should be latched (persisted).
///
/// Start is checked before stop, so an inverted pair still gives a
/// deterministic answer.
pub fn evaluate(level_cm: f32, start_cm: f32, stop_cm: f32, previous: PumpState) -> (PumpState, bool) {
    if level_cm <= start_cm {
        (PumpState::On, true)
    } else if level_cm >= stop_cm {
        (PumpState::Off, true)
    } else {
        (previous, false)
    }
}
