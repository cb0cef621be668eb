//! Domain records shared by the controller, the store and status reporting.
//!
//! Everything here is plain data with serde derives so the JSON store can
//! persist it as-is.  Behaviour lives in the modules that own each record.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::app::ports::ScheduleFiredKind;
use crate::error::ConfigError;

// ───────────────────────────────────────────────────────────────
// Run state
// ───────────────────────────────────────────────────────────────

/// What the rig is doing right now.
///
/// `running` is true exactly when `current_zone` is set; build instances
/// through [`RunState::zone_active`] or [`RunState::idle`] to keep it so.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub running: bool,
    pub current_zone: Option<u16>,
    pub zone_started_at: Option<NaiveDateTime>,
    pub zone_duration_secs: Option<u32>,
    pub pump_on: bool,
    pub valves: Vec<bool>,
}

impl RunState {
    /// Not running, every output off.
    pub fn idle(valve_count: usize) -> Self {
        Self {
            valves: vec![false; valve_count],
            ..Self::default()
        }
    }

    pub fn zone_active(
        zone_id: u16,
        started_at: NaiveDateTime,
        duration_secs: u32,
        valves: Vec<bool>,
    ) -> Self {
        Self {
            running: true,
            current_zone: Some(zone_id),
            zone_started_at: Some(started_at),
            zone_duration_secs: Some(duration_secs),
            pump_on: true,
            valves,
        }
    }

    /// Seconds left in the current zone, `ceil(duration - elapsed)` floored
    /// at zero.  `None` when not running.
    pub fn remaining_secs(&self, now: NaiveDateTime) -> Option<u32> {
        if !self.running {
            return None;
        }
        let started = self.zone_started_at?;
        let duration = i64::from(self.zone_duration_secs?) * 1000;
        let elapsed = (now - started).num_milliseconds();
        let left_ms = (duration - elapsed).max(0);
        Some(((left_ms + 999) / 1000) as u32)
    }
}

// ───────────────────────────────────────────────────────────────
// Zones
// ───────────────────────────────────────────────────────────────

/// One irrigation zone as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub zone_id: u16,
    pub name: String,
    pub duration_secs: u32,
    pub enabled: bool,
    #[serde(default)]
    pub order: i32,
}

/// Enabled zones that have a valve in the frame, ordered by `order` then id.
pub fn runnable_zones(zones: &[ZoneSpec], valve_count: usize) -> Vec<ZoneSpec> {
    let mut out: Vec<ZoneSpec> = zones
        .iter()
        .filter(|z| z.enabled && z.zone_id >= 1 && (z.zone_id as usize) <= valve_count)
        .cloned()
        .collect();
    out.sort_by_key(|z| (z.order, z.zone_id));
    out
}

// ───────────────────────────────────────────────────────────────
// Schedule rule
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    TimeOfDay,
    Interval,
}

/// When to start a run.  A single rule is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleRule {
    pub mode: ScheduleMode,
    /// 0 = Sunday .. 6 = Saturday; only consulted in weekly mode.
    pub weekdays: Vec<u8>,
    pub trigger: TriggerType,
    /// "HH:MM" strings; normalised on use.
    pub time_slots: Vec<String>,
    pub interval_minutes: Option<u32>,
}

impl ScheduleRule {
    /// Time slots in canonical zero-padded form, duplicates removed.
    pub fn normalized_slots(&self) -> BTreeSet<String> {
        self.time_slots.iter().map(|s| normalize_hhmm(s)).collect()
    }
}

/// Canonical "HH:MM": "8:0" becomes "08:00", out-of-range fields are clamped
/// and unparsable fields read as zero.
pub fn normalize_hhmm(raw: &str) -> String {
    let mut parts = raw.trim().splitn(2, ':');
    let field = |p: Option<&str>, max: i64| {
        p.and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .clamp(0, max)
    };
    let hour = field(parts.next(), 23);
    let minute = field(parts.next(), 59);
    format!("{hour:02}:{minute:02}")
}

// ───────────────────────────────────────────────────────────────
// Trigger bookkeeping
// ───────────────────────────────────────────────────────────────

/// Descriptor of the most recent schedule fire, for status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastFired {
    pub kind: ScheduleFiredKind,
    pub label: String,
    pub at: NaiveDateTime,
}

/// Persisted de-duplication state of the schedule evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerFireRecord {
    pub last_interval_fire_at: Option<NaiveDateTime>,
    /// `"YYYY-MM-DD_HH:MM"` keys of slots fired today.
    pub fired_slot_keys: BTreeSet<String>,
    pub last_fired: Option<LastFired>,
}

impl TriggerFireRecord {
    pub fn slot_key(date: NaiveDate, hhmm: &str) -> String {
        format!("{}_{}", date.format("%Y-%m-%d"), hhmm)
    }

    pub fn has_fired(&self, date: NaiveDate, hhmm: &str) -> bool {
        self.fired_slot_keys.contains(&Self::slot_key(date, hhmm))
    }

    /// Record a slot fire and drop keys from any other day.
    pub fn mark_fired(&mut self, date: NaiveDate, hhmm: &str) {
        let prefix = format!("{}_", date.format("%Y-%m-%d"));
        self.fired_slot_keys.retain(|k| k.starts_with(&prefix));
        self.fired_slot_keys.insert(Self::slot_key(date, hhmm));
    }
}

// ───────────────────────────────────────────────────────────────
// History
// ───────────────────────────────────────────────────────────────

/// A zone activation about to be written to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSupplyRecord {
    pub started_at: NaiveDateTime,
    pub zone_id: u16,
    pub pump_on: bool,
    pub valves: Vec<bool>,
}

/// One row of watering history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyRecord {
    pub id: u64,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub zone_id: u16,
    pub pump_on: bool,
    pub valves: Vec<bool>,
}

// ───────────────────────────────────────────────────────────────
// Tank
// ───────────────────────────────────────────────────────────────

/// Start/stop levels of the supply pump.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankThresholds {
    pub start_cm: f32,
    pub stop_cm: f32,
}

impl Default for TankThresholds {
    fn default() -> Self {
        Self {
            start_cm: 20.0,
            stop_cm: 80.0,
        }
    }
}

impl TankThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_cm >= self.stop_cm {
            return Err(ConfigError::InvertedThresholds);
        }
        Ok(())
    }
}

/// Persisted pump latch together with the thresholds it was latched under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankLatch {
    pub pump_on: bool,
    pub thresholds: TankThresholds,
}
