//! System configuration parameters
//!
//! All deployment-time parameters for the drip controller.  Values are loaded
//! from a JSON file by the daemon; anything missing falls back to the
//! reference deployment below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::output::FrameLayout;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Bus ---
    /// Serial device of the RS-485 adapter
    pub bus_port: String,
    /// Line speed (8N1)
    pub bus_baud: u32,
    /// Open the bus automatically at startup
    pub bus_auto_connect: bool,
    /// Delay before the boot-time connect (milliseconds)
    pub bus_boot_delay_ms: u32,
    /// Settle delay between closing and reopening the port (milliseconds)
    pub bus_settle_ms: u32,
    /// Backoff before the single port-busy retry (milliseconds)
    pub bus_busy_backoff_ms: u32,

    // --- Slaves ---
    /// Output controller (PLC) slave id
    pub controller_slave: u8,
    /// Slave id of the tank level transmitter
    pub tank_sensor_slave: u8,
    /// Controller per-call timeout (milliseconds)
    pub controller_timeout_ms: u32,
    /// Sensor per-call timeout (milliseconds)
    pub sensor_timeout_ms: u32,
    /// Turnaround after selecting the controller (milliseconds)
    pub controller_turnaround_ms: u32,
    /// Turnaround after selecting a sensor (milliseconds)
    pub sensor_turnaround_ms: u32,

    // --- Outputs ---
    /// Coil block geometry on the controller
    pub frame: FrameLayout,
    /// Mirror the frame onto the local relay board
    pub relay_enabled: bool,
    /// Relay inputs are active-low
    pub relay_active_low: bool,
    /// BCM line numbers of the relay channels, channel 1 first
    pub relay_pins: Vec<u32>,
    /// First holding register of the controller's register block
    pub register_start: u16,
    /// Holding registers in the block
    pub register_count: u16,

    // --- Tank ---
    /// Input register carrying the raw tank level
    pub tank_level_register: u16,
    /// Let the regulator switch the supply pump while no run is active
    pub tank_drive_output: bool,

    // --- Timing ---
    /// Schedule evaluator / regulator poll period (milliseconds)
    pub poll_interval_ms: u32,
    /// Wait step inside a zone (milliseconds)
    pub sequence_step_ms: u32,

    // --- Storage ---
    /// Directory for settings, history and state documents
    pub data_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Bus
            bus_port: "/dev/ttyUSB0".into(),
            bus_baud: 9600,
            bus_auto_connect: true,
            bus_boot_delay_ms: 3000,
            bus_settle_ms: 400,
            bus_busy_backoff_ms: 2000,

            // Slaves
            controller_slave: 1,
            tank_sensor_slave: 2,
            controller_timeout_ms: 2000,
            sensor_timeout_ms: 1200,
            controller_turnaround_ms: 20,
            sensor_turnaround_ms: 8,

            // Outputs
            frame: FrameLayout::default(),
            relay_enabled: false,
            relay_active_low: true,
            relay_pins: vec![5, 6, 13, 16, 19, 20, 21, 26],
            register_start: 2000,
            register_count: 20,

            // Tank
            tank_level_register: 0,
            tank_drive_output: false,

            // Timing
            poll_interval_ms: 1000, // 1 Hz
            sequence_step_ms: 1000,

            data_dir: PathBuf::from("data"),
        }
    }
}

/// Timing knobs the bus worker needs, split out so tests can shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    pub settle: Duration,
    pub busy_backoff: Duration,
    pub controller_timeout: Duration,
    pub sensor_timeout: Duration,
    pub controller_turnaround: Duration,
    pub sensor_turnaround: Duration,
    /// Extra headroom the caller grants the worker beyond the call timeout.
    pub reply_slack: Duration,
}

impl Default for BusTiming {
    fn default() -> Self {
        SystemConfig::default().bus_timing()
    }
}

fn ms(v: u32) -> Duration {
    Duration::from_millis(u64::from(v))
}

impl SystemConfig {
    pub fn bus_timing(&self) -> BusTiming {
        BusTiming {
            settle: ms(self.bus_settle_ms),
            busy_backoff: ms(self.bus_busy_backoff_ms),
            controller_timeout: ms(self.controller_timeout_ms),
            sensor_timeout: ms(self.sensor_timeout_ms),
            controller_turnaround: ms(self.controller_turnaround_ms),
            sensor_turnaround: ms(self.sensor_turnaround_ms),
            reply_slack: Duration::from_millis(500),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        ms(self.poll_interval_ms)
    }

    pub fn sequence_step(&self) -> Duration {
        ms(self.sequence_step_ms)
    }

    pub fn boot_delay(&self) -> Duration {
        ms(self.bus_boot_delay_ms)
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_port.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("bus_port must not be empty"));
        }
        if !(1200..=115_200).contains(&self.bus_baud) {
            return Err(ConfigError::ValidationFailed("bus_baud must be 1200–115200"));
        }
        if !(1..=247).contains(&self.controller_slave) {
            return Err(ConfigError::ValidationFailed("controller_slave must be 1–247"));
        }
        if !(1..=247).contains(&self.tank_sensor_slave) {
            return Err(ConfigError::ValidationFailed("tank_sensor_slave must be 1–247"));
        }
        if !(100..=10_000).contains(&self.controller_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "controller_timeout_ms must be 100–10000",
            ));
        }
        if !(100..=10_000).contains(&self.sensor_timeout_ms) {
            return Err(ConfigError::ValidationFailed("sensor_timeout_ms must be 100–10000"));
        }
        if self.controller_turnaround_ms > 500 || self.sensor_turnaround_ms > 500 {
            return Err(ConfigError::ValidationFailed("turnaround must be at most 500 ms"));
        }
        if self.bus_settle_ms > 10_000 || self.bus_busy_backoff_ms > 30_000 {
            return Err(ConfigError::ValidationFailed("reconnect delays out of range"));
        }
        self.frame.validate()?;
        if self.relay_enabled && self.relay_pins.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "relay_pins must not be empty when the relay board is enabled",
            ));
        }
        if !(1..=125).contains(&self.register_count) {
            return Err(ConfigError::ValidationFailed("register_count must be 1–125"));
        }
        if !(100..=5000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed("poll_interval_ms must be 100–5000"));
        }
        if !(10..=5000).contains(&self.sequence_step_ms) {
            return Err(ConfigError::ValidationFailed("sequence_step_ms must be 10–5000"));
        }
        Ok(())
    }
}
