//! JSON-file store adapter.
//!
//! Implements [`SettingsPort`], [`HistoryPort`] and [`StatePort`] on top of a
//! handful of JSON documents in one data directory, plus [`ConfigPort`] for
//! the daemon's own config file.
//!
//! ```text
//!   <data_dir>/settings.json       zones, schedule rule, tank calibration, thresholds
//!   <data_dir>/history.json        watering history rows
//!   <data_dir>/run_state.json      last persisted RunState
//!   <data_dir>/trigger_state.json  schedule de-duplication record
//!   <data_dir>/tank_latch.json     supply pump latch
//! ```
//!
//! Every write goes to a sibling temp file which is then renamed over the
//! target, so a power cut leaves either the old or the new document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigPort, HistoryPort, SettingsPort, StatePort};
use crate::config::SystemConfig;
use crate::error::{ConfigError, PersistenceError};
use crate::model::{
    NewSupplyRecord, RunState, ScheduleRule, SupplyRecord, TankLatch, TankThresholds,
    TriggerFireRecord, ZoneSpec,
};
use crate::sensors::tank_level::TankCalibration;

const SETTINGS_DOC: &str = "settings.json";
const HISTORY_DOC: &str = "history.json";
const RUN_STATE_DOC: &str = "run_state.json";
const TRIGGER_DOC: &str = "trigger_state.json";
const TANK_LATCH_DOC: &str = "tank_latch.json";

/// Oldest history rows are dropped beyond this many.
const HISTORY_CAP: usize = 10_000;

/// Operator settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    pub zones: Vec<ZoneSpec>,
    pub schedule: Option<ScheduleRule>,
    pub tank_calibration: TankCalibration,
    pub tank_thresholds: TankThresholds,
}

// ── Document helpers ──────────────────────────────────────────

fn unavailable(path: &Path, e: &io::Error) -> PersistenceError {
    PersistenceError::Unavailable(format!("{}: {}", path.display(), e))
}

/// Read and decode `path`; `Ok(None)` when the file does not exist.
fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(path, &e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistenceError::Corrupted(format!("{}: {}", path.display(), e)))
}

/// Encode `value` and atomically replace `path`.
fn write_doc<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    let written = fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(&bytes)?;
        f.sync_all()
    });
    written
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| unavailable(path, &e))
}

// ───────────────────────────────────────────────────────────────
// JsonStore
// ───────────────────────────────────────────────────────────────

pub struct JsonStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles across threads.
    lock: Mutex<()>,
}

impl JsonStore {
    /// Open (creating if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, &e))?;
        info!("JsonStore: using {}", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, doc: &str) -> PathBuf {
        self.dir.join(doc)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, PersistenceError> {
        self.lock
            .lock()
            .map_err(|_| PersistenceError::Unavailable("store lock poisoned".into()))
    }

    /// Current settings document (defaults when absent).
    pub fn settings(&self) -> Result<StoredSettings, PersistenceError> {
        let _g = self.guard()?;
        Ok(read_doc(&self.path(SETTINGS_DOC))?.unwrap_or_default())
    }

    /// Replace the settings document.
    pub fn save_settings(&self, settings: &StoredSettings) -> Result<(), PersistenceError> {
        let _g = self.guard()?;
        write_doc(&self.path(SETTINGS_DOC), settings)?;
        debug!("JsonStore: settings saved ({} zones)", settings.zones.len());
        Ok(())
    }

    fn history(&self) -> Result<Vec<SupplyRecord>, PersistenceError> {
        Ok(read_doc(&self.path(HISTORY_DOC))?.unwrap_or_default())
    }
}

// ── SettingsPort ──────────────────────────────────────────────

impl SettingsPort for JsonStore {
    fn zones(&self) -> Result<Vec<ZoneSpec>, PersistenceError> {
        Ok(self.settings()?.zones)
    }

    fn schedule_rule(&self) -> Result<Option<ScheduleRule>, PersistenceError> {
        Ok(self.settings()?.schedule)
    }

    fn tank_calibration(&self) -> Result<TankCalibration, PersistenceError> {
        Ok(self.settings()?.tank_calibration)
    }

    fn tank_thresholds(&self) -> Result<TankThresholds, PersistenceError> {
        Ok(self.settings()?.tank_thresholds)
    }
}

// ── HistoryPort ───────────────────────────────────────────────

impl HistoryPort for JsonStore {
    fn insert_record(&self, record: &NewSupplyRecord) -> Result<u64, PersistenceError> {
        let _g = self.guard()?;
        let mut rows = self.history()?;
        let id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        rows.push(SupplyRecord {
            id,
            started_at: record.started_at,
            ended_at: None,
            zone_id: record.zone_id,
            pump_on: record.pump_on,
            valves: record.valves.clone(),
        });
        if rows.len() > HISTORY_CAP {
            let excess = rows.len() - HISTORY_CAP;
            rows.drain(..excess);
        }
        write_doc(&self.path(HISTORY_DOC), &rows)?;
        Ok(id)
    }

    fn finish_record(&self, id: u64, ended_at: NaiveDateTime) -> Result<(), PersistenceError> {
        let _g = self.guard()?;
        let mut rows = self.history()?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(PersistenceError::NotFound)?;
        row.ended_at = Some(ended_at);
        write_doc(&self.path(HISTORY_DOC), &rows)
    }

    fn recent_records(&self, limit: usize) -> Result<Vec<SupplyRecord>, PersistenceError> {
        let _g = self.guard()?;
        let mut rows = self.history()?;
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }
}

// ── StatePort ─────────────────────────────────────────────────

impl StatePort for JsonStore {
    fn load_run_state(&self) -> Result<Option<RunState>, PersistenceError> {
        let _g = self.guard()?;
        read_doc(&self.path(RUN_STATE_DOC))
    }

    fn save_run_state(&self, state: &RunState) -> Result<(), PersistenceError> {
        let _g = self.guard()?;
        write_doc(&self.path(RUN_STATE_DOC), state)
    }

    fn load_trigger_state(&self) -> Result<TriggerFireRecord, PersistenceError> {
        let _g = self.guard()?;
        match read_doc(&self.path(TRIGGER_DOC)) {
            Ok(doc) => Ok(doc.unwrap_or_default()),
            // A damaged record must not block scheduling forever.
            Err(PersistenceError::Corrupted(msg)) => {
                warn!("JsonStore: trigger state unreadable ({}), starting fresh", msg);
                Ok(TriggerFireRecord::default())
            }
            Err(e) => Err(e),
        }
    }

    fn save_trigger_state(&self, record: &TriggerFireRecord) -> Result<(), PersistenceError> {
        let _g = self.guard()?;
        write_doc(&self.path(TRIGGER_DOC), record)
    }

    fn load_tank_latch(&self) -> Result<Option<TankLatch>, PersistenceError> {
        let _g = self.guard()?;
        read_doc(&self.path(TANK_LATCH_DOC))
    }

    fn save_tank_latch(&self, latch: &TankLatch) -> Result<(), PersistenceError> {
        let _g = self.guard()?;
        write_doc(&self.path(TANK_LATCH_DOC), latch)
    }
}

// ───────────────────────────────────────────────────────────────
// Config file
// ───────────────────────────────────────────────────────────────

/// The daemon's JSON config file.
pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPort for JsonConfigFile {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        match read_doc::<SystemConfig>(&self.path) {
            Ok(Some(cfg)) => {
                cfg.validate()?;
                info!("JsonConfigFile: loaded {}", self.path.display());
                Ok(cfg)
            }
            Ok(None) => {
                info!(
                    "JsonConfigFile: {} not found, using defaults",
                    self.path.display()
                );
                Ok(SystemConfig::default())
            }
            Err(PersistenceError::Corrupted(msg)) => {
                warn!("JsonConfigFile: {}", msg);
                Err(ConfigError::Corrupted)
            }
            Err(e) => {
                warn!("JsonConfigFile: {}", e);
                Err(ConfigError::NotFound)
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        write_doc(&self.path, config).map_err(|e| {
            warn!("JsonConfigFile: save failed: {}", e);
            ConfigError::ValidationFailed("config file not writable")
        })
    }
}
