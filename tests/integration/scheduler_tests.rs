//! Schedule evaluator against the in-memory store and a live coordinator.

use chrono::TimeDelta;

use dripctl::app::commands::PendingCommand;
use dripctl::app::ports::ScheduleFiredKind;
use dripctl::coordinator::Coordinator;
use dripctl::model::{ScheduleMode, ScheduleRule, TriggerType};
use dripctl::scheduler::ScheduleEvaluator;

use crate::mock_hw::{MemoryStore, RecordingDelegate, at, zone};

fn daily_at(slots: &[&str]) -> ScheduleRule {
    ScheduleRule {
        mode: ScheduleMode::Daily,
        trigger: TriggerType::TimeOfDay,
        time_slots: slots.iter().map(|s| s.to_string()).collect(),
        ..ScheduleRule::default()
    }
}

fn every(minutes: u32) -> ScheduleRule {
    ScheduleRule {
        trigger: TriggerType::Interval,
        interval_minutes: Some(minutes),
        ..ScheduleRule::default()
    }
}

#[test]
fn morning_slot_fires_once_per_day() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    store.set_rule(daily_at(&["08:00"]));
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    let day1 = at(2024, 6, 3, 8, 0, 0);
    assert_eq!(
        eval.tick(day1, &store, &store, &coord, &mut delegate),
        Some(ScheduleFiredKind::TimeOfDay)
    );
    assert_eq!(coord.peek(), Some(PendingCommand::StartOnce));
    coord.clear();

    // Same minute, later second.
    assert_eq!(
        eval.tick(day1 + TimeDelta::seconds(45), &store, &store, &coord, &mut delegate),
        None
    );

    // Next day, same slot.
    let day2 = day1 + TimeDelta::days(1);
    assert!(eval.tick(day2, &store, &store, &coord, &mut delegate).is_some());
    assert_eq!(delegate.fires.len(), 2);

    let record = store.trigger.lock().unwrap().clone();
    assert_eq!(record.fired_slot_keys.len(), 1);
    assert!(record.fired_slot_keys.contains("2024-06-04_08:00"));
    let last = record.last_fired.unwrap();
    assert_eq!(last.label, "08:00");
    assert_eq!(last.at, day2);
}

#[test]
fn restart_does_not_refire_todays_slot() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    store.set_rule(daily_at(&["8:00"]));
    let coord = Coordinator::new();
    let mut delegate = RecordingDelegate::default();

    let mut before = ScheduleEvaluator::new(15);
    assert!(before.tick(at(2024, 6, 3, 8, 0, 1), &store, &store, &coord, &mut delegate).is_some());
    coord.clear();

    let mut after = ScheduleEvaluator::new(15);
    assert!(after.tick(at(2024, 6, 3, 8, 0, 30), &store, &store, &coord, &mut delegate).is_none());
    assert_eq!(delegate.fires.len(), 1);
}

#[test]
fn interval_of_sixty_minutes() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    store.set_rule(every(60));
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    let t0 = at(2024, 6, 3, 6, 0, 0);
    assert!(eval.tick(t0, &store, &store, &coord, &mut delegate).is_some());
    coord.clear();

    assert!(eval
        .tick(t0 + TimeDelta::minutes(30), &store, &store, &coord, &mut delegate)
        .is_none());
    assert!(eval
        .tick(t0 + TimeDelta::minutes(59), &store, &store, &coord, &mut delegate)
        .is_none());
    assert_eq!(
        eval.tick(t0 + TimeDelta::minutes(60), &store, &store, &coord, &mut delegate),
        Some(ScheduleFiredKind::Interval)
    );
    assert_eq!(delegate.fires.len(), 2);
    assert_eq!(delegate.fires[1].0, "60 min");
    assert_eq!(
        store.trigger.lock().unwrap().last_interval_fire_at,
        Some(t0 + TimeDelta::minutes(60))
    );
}

#[test]
fn interval_record_ahead_of_the_clock_waits_a_full_interval() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    store.set_rule(every(60));
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    let fired = at(2024, 6, 3, 9, 0, 0);
    assert!(eval.tick(fired, &store, &store, &coord, &mut delegate).is_some());
    coord.clear();

    let stepped_back = at(2024, 6, 3, 8, 55, 0);
    assert_eq!(
        eval.tick(stepped_back, &store, &store, &coord, &mut delegate),
        None
    );
    assert_eq!(delegate.fires.len(), 1);
    assert_eq!(coord.peek(), None);
    assert_eq!(
        store.trigger.lock().unwrap().last_interval_fire_at,
        Some(stepped_back)
    );

    // The rebased cooldown is persisted, so a restart honours it too.
    let mut restarted = ScheduleEvaluator::new(15);
    assert!(restarted
        .tick(stepped_back + TimeDelta::minutes(30), &store, &store, &coord, &mut delegate)
        .is_none());
    assert_eq!(
        restarted.tick(stepped_back + TimeDelta::minutes(60), &store, &store, &coord, &mut delegate),
        Some(ScheduleFiredKind::Interval)
    );
}

#[test]
fn weekly_rule_only_on_listed_days() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    let mut rule = daily_at(&["07:30"]);
    rule.mode = ScheduleMode::Weekly;
    // Saturday and Sunday.
    rule.weekdays = vec![0, 6];
    store.set_rule(rule);
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    // 2024-06-07 is a Friday.
    assert!(eval.tick(at(2024, 6, 7, 7, 30, 0), &store, &store, &coord, &mut delegate).is_none());
    assert!(eval.tick(at(2024, 6, 8, 7, 30, 0), &store, &store, &coord, &mut delegate).is_some());
    coord.clear();
    assert!(eval.tick(at(2024, 6, 9, 7, 30, 0), &store, &store, &coord, &mut delegate).is_some());
}

#[test]
fn failed_persist_still_fires_and_memory_dedups() {
    let store = MemoryStore::with_zones(vec![zone(1, 60)]);
    store.set_rule(daily_at(&["08:00"]));
    *store.fail_trigger_saves.lock().unwrap() = true;
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    assert!(eval.tick(at(2024, 6, 3, 8, 0, 0), &store, &store, &coord, &mut delegate).is_some());
    coord.clear();
    assert!(eval.tick(at(2024, 6, 3, 8, 0, 20), &store, &store, &coord, &mut delegate).is_none());
    assert_eq!(delegate.fires.len(), 1);
}

#[test]
fn no_rule_or_no_zones_never_claims() {
    let coord = Coordinator::new();
    let mut eval = ScheduleEvaluator::new(15);
    let mut delegate = RecordingDelegate::default();

    let no_rule = MemoryStore::with_zones(vec![zone(1, 60)]);
    assert!(eval.tick(at(2024, 6, 3, 8, 0, 0), &no_rule, &no_rule, &coord, &mut delegate).is_none());

    let no_zones = MemoryStore::default();
    no_zones.set_rule(every(1));
    assert!(eval.tick(at(2024, 6, 3, 8, 0, 0), &no_zones, &no_zones, &coord, &mut delegate).is_none());

    assert_eq!(coord.peek(), None);
    assert!(delegate.fires.is_empty());
}
