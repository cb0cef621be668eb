//! Tank level transmitter on the RS-485 bus.
//!
//! The transmitter exposes its raw A/D count in one input register.  A
//! two-point linear calibration maps that count to centimetres of water.

use serde::{Deserialize, Serialize};

/// Two-point calibration from raw A/D counts to centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankCalibration {
    pub ad_min: f32,
    pub ad_max: f32,
    pub cm_min: f32,
    pub cm_max: f32,
}

impl Default for TankCalibration {
    fn default() -> Self {
        Self {
            ad_min: 0.0,
            ad_max: 1023.0,
            cm_min: 0.0,
            cm_max: 100.0,
        }
    }
}

impl TankCalibration {
    /// Convert a raw count to cm, rounded to 0.1.
    ///
    /// A zero A/D span is treated as a span of one.  Readings outside the
    /// calibrated range extrapolate linearly.
    pub fn to_cm(&self, raw: u16) -> f32 {
        let span = self.ad_max - self.ad_min;
        let span = if span == 0.0 { 1.0 } else { span };
        let cm = self.cm_min + (f32::from(raw) - self.ad_min) / span * (self.cm_max - self.cm_min);
        (cm * 10.0).round() / 10.0
    }
}
