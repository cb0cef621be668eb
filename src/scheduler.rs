//! Schedule evaluator.
//!
//! A fixed-period tick compares local wall time against the single
//! configured [`ScheduleRule`].  When the rule fires the evaluator records
//! the fire, persists the record, claims a start-once in the
//! [`Coordinator`] and notifies a [`SchedulerDelegate`]; the service
//! implements the delegate by launching the sequence thread.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ScheduleEvaluator.tick(now)               │
//! │                                                              │
//! │  zones? ── no ──▶ skip        busy / pending? ── yes ──▶ skip│
//! │  rule?  ── no ──▶ skip        weekday filter ── out ──▶ skip │
//! │                                                              │
//! │  ┌─────────────┐                   ┌─────────────┐           │
//! │  │ TimeOfDay   │  slot == HH:MM    │ Interval    │ now - last│
//! │  │ (per day)   │  not fired today  │ (cooldown)  │ >= N min  │
//! │  └──────┬──────┘                   └──────┬──────┘           │
//! │         ▼                                 ▼                  │
//! │   persist TriggerFireRecord ──▶ claim StartOnce ──▶ delegate │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bookkeeping is persisted before the claim, so a crash between the two
//! can lose a run but never repeat one.

use chrono::{Datelike, NaiveDateTime, TimeDelta};
use log::{debug, error, info, warn};

use crate::app::commands::PendingCommand;
use crate::app::ports::{ScheduleFiredKind, SchedulerDelegate, SettingsPort, StatePort};
use crate::coordinator::Coordinator;
use crate::model::{
    LastFired, ScheduleMode, ScheduleRule, TriggerFireRecord, TriggerType, runnable_zones,
};

/// Stateful evaluator; keep one instance for the life of the poll loop.
pub struct ScheduleEvaluator {
    valve_count: usize,
    /// In-memory copy of the persisted record, authoritative once loaded.
    record: Option<TriggerFireRecord>,
}

impl ScheduleEvaluator {
    pub fn new(valve_count: usize) -> Self {
        Self {
            valve_count,
            record: None,
        }
    }

    /// Most recent fire seen by this evaluator (or loaded from the store).
    pub fn last_fired(&self) -> Option<&LastFired> {
        self.record.as_ref().and_then(|r| r.last_fired.as_ref())
    }

    /// Evaluate the rule at `now`.  Returns the kind that fired and claimed
    /// a run, if any.
    pub fn tick(
        &mut self,
        now: NaiveDateTime,
        settings: &dyn SettingsPort,
        state: &dyn StatePort,
        coordinator: &Coordinator,
        delegate: &mut dyn SchedulerDelegate,
    ) -> Option<ScheduleFiredKind> {
        match settings.zones() {
            Ok(zones) if !runnable_zones(&zones, self.valve_count).is_empty() => {}
            Ok(_) => return None,
            Err(e) => {
                warn!("Scheduler: zones unreadable: {}", e);
                return None;
            }
        }

        if coordinator.is_busy() || coordinator.peek().is_some() {
            return None;
        }

        let rule = match settings.schedule_rule() {
            Ok(Some(rule)) => rule,
            Ok(None) => return None,
            Err(e) => {
                warn!("Scheduler: rule unreadable: {}", e);
                return None;
            }
        };

        if !eligible_today(&rule, now) {
            return None;
        }

        let (kind, label) = match rule.trigger {
            TriggerType::TimeOfDay => {
                let label = self.check_time_of_day(&rule, now, state)?;
                (ScheduleFiredKind::TimeOfDay, label)
            }
            TriggerType::Interval => {
                let label = self.check_interval(&rule, now, state)?;
                (ScheduleFiredKind::Interval, label)
            }
        };

        self.persist(state);

        if !coordinator.claim(PendingCommand::StartOnce) {
            debug!("Scheduler: '{}' fired but the claim was refused", label);
            return None;
        }
        info!("Scheduler: '{}' fired ({:?})", label, kind);
        delegate.on_schedule_fired(&label, kind);
        Some(kind)
    }

    // ── Trigger paths ─────────────────────────────────────────

    fn check_time_of_day(
        &mut self,
        rule: &ScheduleRule,
        now: NaiveDateTime,
        state: &dyn StatePort,
    ) -> Option<String> {
        let hhmm = now.format("%H:%M").to_string();
        if !rule.normalized_slots().contains(&hhmm) {
            return None;
        }

        let date = now.date();
        let record = self.record_mut(state);
        if record.has_fired(date, &hhmm) {
            return None;
        }
        record.mark_fired(date, &hhmm);
        record.last_fired = Some(LastFired {
            kind: ScheduleFiredKind::TimeOfDay,
            label: hhmm.clone(),
            at: now,
        });
        Some(hhmm)
    }

    fn check_interval(
        &mut self,
        rule: &ScheduleRule,
        now: NaiveDateTime,
        state: &dyn StatePort,
    ) -> Option<String> {
        let minutes = rule.interval_minutes.filter(|m| *m >= 1)?;
        let cooldown = TimeDelta::minutes(i64::from(minutes));

        let record = self.record_mut(state);
        match record.last_interval_fire_at {
            Some(last) if last > now => {
                // Clock stepped back: restart the cooldown from now.
                warn!(
                    "Scheduler: last interval fire {} is ahead of the clock, cooldown restarts at {}",
                    last, now
                );
                record.last_interval_fire_at = Some(now);
                self.persist(state);
                return None;
            }
            Some(last) if now - last < cooldown => return None,
            _ => {}
        }

        let label = format!("{minutes} min");
        record.last_interval_fire_at = Some(now);
        record.last_fired = Some(LastFired {
            kind: ScheduleFiredKind::Interval,
            label: label.clone(),
            at: now,
        });
        Some(label)
    }

    // ── Bookkeeping ───────────────────────────────────────────

    fn record_mut(&mut self, state: &dyn StatePort) -> &mut TriggerFireRecord {
        self.record.get_or_insert_with(|| match state.load_trigger_state() {
            Ok(r) => r,
            Err(e) => {
                error!("Scheduler: trigger state unreadable, starting empty: {}", e);
                TriggerFireRecord::default()
            }
        })
    }

    fn persist(&self, state: &dyn StatePort) {
        let Some(record) = &self.record else {
            return;
        };
        if let Err(e) = state.save_trigger_state(record) {
            error!(
                "Scheduler: FAILED to persist trigger state ({}); a restart may repeat this fire",
                e
            );
        }
    }
}

/// Daily rules always run; weekly ones only on listed weekdays (0 = Sunday).
fn eligible_today(rule: &ScheduleRule, now: NaiveDateTime) -> bool {
    match rule.mode {
        ScheduleMode::Daily => true,
        ScheduleMode::Weekly => {
            let today = now.weekday().num_days_from_sunday();
            rule.weekdays.iter().any(|d| u32::from(*d) == today)
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
