//! Local 8-channel relay board driven from sysfs GPIO.
//!
//! The board mirrors the leading coils of every frame (channel 1 = coil
//! index 0 = pump).  Pins are exposed as `embedded_hal` [`OutputPin`]s so the
//! driver can be exercised with any pin implementation.
//!
//! Relay inputs on the reference board are active-low: driving the line low
//! energises the relay.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use log::{info, warn};

use crate::app::ports::RelayBoard;

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

// ── sysfs pin ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct SysfsPinError(io::Error);

impl embedded_hal::digital::Error for SysfsPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl core::fmt::Display for SysfsPinError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "gpio write: {}", self.0)
    }
}

/// One exported GPIO line configured as an output.
pub struct SysfsPin {
    bcm: u32,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `bcm` under `root` (if not already) and set it to output.
    pub fn export(root: &Path, bcm: u32) -> io::Result<Self> {
        let dir = root.join(format!("gpio{bcm}"));
        if !dir.exists() {
            // Already-exported lines make this write fail; that is fine.
            if let Err(e) = fs::write(root.join("export"), bcm.to_string()) {
                warn!("RelayBoard: export of gpio{} reported {}", bcm, e);
            }
        }
        fs::write(dir.join("direction"), "out")?;
        Ok(Self {
            bcm,
            value_path: dir.join("value"),
        })
    }

    pub fn bcm(&self) -> u32 {
        self.bcm
    }

    fn write(&self, level: &str) -> Result<(), SysfsPinError> {
        fs::write(&self.value_path, level).map_err(SysfsPinError)
    }
}

impl ErrorType for SysfsPin {
    type Error = SysfsPinError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write("0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write("1")
    }
}

// ── Relay board driver ────────────────────────────────────────

/// Drives one relay per pin, channel 1 first.
pub struct RelayBoardDriver<P> {
    pins: Vec<P>,
    active_low: bool,
}

impl<P: OutputPin> RelayBoardDriver<P> {
    pub fn new(pins: Vec<P>, active_low: bool) -> Self {
        Self { pins, active_low }
    }

    pub fn channels(&self) -> usize {
        self.pins.len()
    }

    /// Energise or release one channel.
    fn set_channel(pin: &mut P, on: bool, active_low: bool) -> Result<(), P::Error> {
        if on == active_low {
            pin.set_low()
        } else {
            pin.set_high()
        }
    }
}

impl RelayBoardDriver<SysfsPin> {
    /// Export every BCM line in `bcm_pins` under `root`.
    pub fn open_sysfs(root: &Path, bcm_pins: &[u32], active_low: bool) -> io::Result<Self> {
        let pins = bcm_pins
            .iter()
            .map(|&bcm| SysfsPin::export(root, bcm))
            .collect::<io::Result<Vec<_>>>()?;
        info!(
            "RelayBoard: {} channels ready (active-{})",
            pins.len(),
            if active_low { "low" } else { "high" }
        );
        Ok(Self::new(pins, active_low))
    }
}

impl<P> RelayBoard for RelayBoardDriver<P>
where
    P: OutputPin + Send,
    P::Error: core::fmt::Debug,
{
    fn apply(&mut self, bits: &[bool]) {
        let active_low = self.active_low;
        for (i, pin) in self.pins.iter_mut().enumerate() {
            let on = bits.get(i).copied().unwrap_or(false);
            if let Err(e) = Self::set_channel(pin, on, active_low) {
                warn!("RelayBoard: channel {} write failed: {:?}", i + 1, e);
            }
        }
    }
}
