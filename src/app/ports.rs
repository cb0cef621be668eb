//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService / SequenceController (domain)
//! ```
//!
//! Driven adapters (serial transport, relay board, store, clock, event
//! sinks) implement these traits.  The domain consumes them via generics or
//! trait objects, so the core never touches a serial port or a file directly.
//!
//! Ports used from the sequence thread take `&self` and are `Send + Sync`;
//! implementations keep their own interior locking.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;
use crate::error::{BusError, ConfigError, PersistenceError};
use crate::model::{
    NewSupplyRecord, RunState, ScheduleRule, SupplyRecord, TankLatch, TankThresholds,
    TriggerFireRecord, ZoneSpec,
};
use crate::output::OutputFrame;
use crate::sensors::tank_level::TankCalibration;

// ───────────────────────────────────────────────────────────────
// Bus transport (driven adapter: worker thread → serial line)
// ───────────────────────────────────────────────────────────────

/// Raw Modbus master primitives.  Only the bus worker thread calls these.
///
/// Implementations must honour the per-call `timeout` and report a dropped
/// line as [`BusError::LinkLost`] so the session can close itself.
pub trait BusTransport: Send {
    /// Open the serial line.  A lock held by another process is
    /// [`BusError::PortBusy`].
    fn open(&mut self, port: &str, baud: u32) -> Result<(), BusError>;

    /// Close the line.  Closing a closed transport is `Ok`.
    fn close(&mut self) -> Result<(), BusError>;

    fn is_open(&self) -> bool;

    /// Address subsequent requests to `slave`.
    fn set_slave(&mut self, slave: u8);

    /// FC1.
    fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, BusError>;

    /// FC15.
    fn write_coils(&mut self, address: u16, bits: &[bool], timeout: Duration)
    -> Result<(), BusError>;

    /// FC4.
    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, BusError>;

    /// FC3.
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, BusError>;
}

// ───────────────────────────────────────────────────────────────
// Output ports (driven adapter: domain → actuators)
// ───────────────────────────────────────────────────────────────

/// Local relay board fed the same bits as the controller.  Best-effort:
/// implementations log their own failures.
pub trait RelayBoard: Send {
    fn apply(&mut self, bits: &[bool]);
}

/// Where the sequence controller sends every frame.
pub trait OutputPort: Send + Sync {
    fn apply(&self, frame: &OutputFrame) -> Result<(), BusError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ config document)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`SystemConfig::default()`] if nothing
    /// is stored yet.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Settings / records / state ports (driven adapter: domain ↔ store)
// ───────────────────────────────────────────────────────────────

/// Operator-maintained settings, read-only from the core's side.
pub trait SettingsPort: Send + Sync {
    fn zones(&self) -> Result<Vec<ZoneSpec>, PersistenceError>;

    /// `None` when no rule has been configured.
    fn schedule_rule(&self) -> Result<Option<ScheduleRule>, PersistenceError>;

    fn tank_calibration(&self) -> Result<TankCalibration, PersistenceError>;

    fn tank_thresholds(&self) -> Result<TankThresholds, PersistenceError>;
}

/// Watering history.
pub trait HistoryPort: Send + Sync {
    /// Insert an open row and return its id.
    fn insert_record(&self, record: &NewSupplyRecord) -> Result<u64, PersistenceError>;

    /// Stamp the end time of row `id`.
    fn finish_record(&self, id: u64, ended_at: NaiveDateTime) -> Result<(), PersistenceError>;

    /// Newest first, at most `limit` rows.
    fn recent_records(&self, limit: usize) -> Result<Vec<SupplyRecord>, PersistenceError>;
}

/// Controller state that must survive a restart.
pub trait StatePort: Send + Sync {
    fn load_run_state(&self) -> Result<Option<RunState>, PersistenceError>;

    fn save_run_state(&self, state: &RunState) -> Result<(), PersistenceError>;

    /// Empty record when nothing was stored yet.
    fn load_trigger_state(&self) -> Result<TriggerFireRecord, PersistenceError>;

    fn save_trigger_state(&self, record: &TriggerFireRecord) -> Result<(), PersistenceError>;

    fn load_tank_latch(&self) -> Result<Option<TankLatch>, PersistenceError>;

    fn save_tank_latch(&self, latch: &TankLatch) -> Result<(), PersistenceError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Local wall time and blocking sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn sleep(&self, duration: Duration);
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the sequence launcher)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the evaluator invokes once it has claimed a
/// start-once for a schedule fire.
///
/// This decouples the [`ScheduleEvaluator`](crate::scheduler::ScheduleEvaluator)
/// from thread management: the service implements it by launching the
/// sequence, tests by recording the call.
pub trait SchedulerDelegate {
    /// * `label`: "08:00" for a slot, "60 min" for an interval.
    /// * `kind`: which trigger type fired.
    fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind);
}

/// Discriminant passed to [`SchedulerDelegate::on_schedule_fired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFiredKind {
    /// A configured time-of-day slot matched.
    TimeOfDay,
    /// The interval cooldown elapsed.
    Interval,
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// The driven ports the sequence thread and the service share.
#[derive(Clone)]
pub struct Ports {
    pub outputs: Arc<dyn OutputPort>,
    pub settings: Arc<dyn SettingsPort>,
    pub history: Arc<dyn HistoryPort>,
    pub state: Arc<dyn StatePort>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
}
