//! Sequence controller against recording outputs, an in-memory store and a
//! scripted clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use dripctl::app::commands::PendingCommand;
use dripctl::app::events::AppEvent;
use dripctl::coordinator::Coordinator;
use dripctl::error::BusError;
use dripctl::output::FrameLayout;
use dripctl::sequence::{SequenceController, SequenceOutcome};

use crate::mock_hw::{Rig, at, zone};

fn controller(rig: &Rig, coord: &Arc<Coordinator>) -> SequenceController {
    SequenceController::new(
        Arc::clone(coord),
        rig.ports(),
        FrameLayout::default(),
        Duration::from_secs(1),
    )
}

fn claimed() -> Arc<Coordinator> {
    let coord = Arc::new(Coordinator::new());
    assert!(coord.claim(PendingCommand::StartOnce));
    coord
}

#[test]
fn one_valve_at_a_time_and_all_off_at_the_end() {
    let rig = Rig::new(vec![zone(1, 3), zone(2, 3), zone(3, 3)], at(2024, 6, 3, 8, 0, 0));
    let coord = claimed();

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::Completed { zones: 3 });

    let layout = FrameLayout::default();
    let frames = rig.outputs.frames();
    assert_eq!(frames.len(), 4, "three zone frames plus the final all-off");
    for (i, frame) in frames[..3].iter().enumerate() {
        let (pump, valves) = layout.from_frame(frame);
        assert!(pump, "pump on during zone {}", i + 1);
        assert_eq!(valves.iter().filter(|v| **v).count(), 1);
        assert!(valves[i]);
    }
    assert_eq!(frames[3].count_on(), 0);

    let state = coord.run_state();
    assert!(!state.running);
    assert_eq!(state.current_zone, None);
    assert!(!coord.is_sequence_active());
    assert_eq!(coord.peek(), None);
    assert_eq!(rig.store.saved_run_state().map(|s| s.running), Some(false));
}

#[test]
fn history_rows_are_contiguous_and_closed() {
    let start = at(2024, 6, 3, 8, 0, 0);
    let rig = Rig::new(vec![zone(1, 2), zone(2, 3)], start);
    let coord = claimed();

    controller(&rig, &coord).run();

    let rows = rig.store.records();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].zone_id, 1);
    assert_eq!(rows[0].started_at, start);
    assert_eq!(rows[0].ended_at, Some(start + TimeDelta::seconds(2)));
    assert_eq!(rows[1].zone_id, 2);
    assert_eq!(Some(rows[1].started_at), rows[0].ended_at);
    assert_eq!(rows[1].ended_at, Some(start + TimeDelta::seconds(5)));
    assert!(rows.iter().all(|r| r.pump_on));
}

#[test]
fn zones_run_in_configured_order() {
    let mut first = zone(7, 1);
    first.order = -1;
    let mut disabled = zone(2, 1);
    disabled.enabled = false;
    let rig = Rig::new(
        vec![zone(3, 1), disabled, first, zone(16, 1)],
        at(2024, 6, 3, 8, 0, 0),
    );
    let coord = claimed();

    controller(&rig, &coord).run();

    let order: Vec<u16> = rig.store.records().iter().map(|r| r.zone_id).collect();
    assert_eq!(order, vec![7, 3], "disabled and out-of-frame zones are skipped");
}

#[test]
fn stop_mid_zone_halts_within_one_step() {
    let start = at(2024, 6, 3, 8, 0, 0);
    let rig = Rig::new(vec![zone(1, 10), zone(2, 10)], start);
    let coord = claimed();

    let stopper = Arc::clone(&coord);
    rig.clock.on_sleep(move |now| {
        if now >= start + TimeDelta::seconds(3) {
            stopper.claim(PendingCommand::Stop);
        }
    });

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::Stopped { zone: Some(1) });

    assert_eq!(rig.clock.total_slept(), Duration::from_secs(3));
    let frames = rig.outputs.frames();
    assert_eq!(frames.len(), 2, "zone 1 frame then all-off, zone 2 never starts");
    assert_eq!(frames[1].count_on(), 0);

    let rows = rig.store.records();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ended_at, Some(start + TimeDelta::seconds(3)));

    assert!(!coord.run_state().running);
    assert_eq!(coord.peek(), None, "stop is cleared when the run ends");
    assert!(!coord.is_busy());
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::SequenceStopped { zone_id: Some(1) })),
        1
    );
}

#[test]
fn stop_between_zones_prevents_the_next_zone() {
    let start = at(2024, 6, 3, 8, 0, 0);
    let rig = Rig::new(vec![zone(1, 2), zone(2, 2)], start);
    let coord = claimed();

    // Raised on the last wait step of zone 1, observed at the zone boundary.
    let stopper = Arc::clone(&coord);
    rig.clock.on_sleep(move |now| {
        if now == start + TimeDelta::seconds(2) {
            stopper.claim(PendingCommand::Stop);
        }
    });

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::Stopped { zone: None });
    assert_eq!(rig.store.records().len(), 1);
    assert_eq!(rig.outputs.last().map(|f| f.count_on()), Some(0));
}

#[test]
fn empty_zone_list_is_a_clean_no_op() {
    let rig = Rig::new(vec![], at(2024, 6, 3, 8, 0, 0));
    let coord = claimed();

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::NoZones);
    assert_eq!(rig.outputs.frames().len(), 1);
    assert_eq!(rig.outputs.frames()[0].count_on(), 0);
    assert!(rig.store.records().is_empty());
    assert!(!coord.is_sequence_active());
}

#[test]
fn refused_without_a_pending_start() {
    let rig = Rig::new(vec![zone(1, 1)], at(2024, 6, 3, 8, 0, 0));
    let coord = Arc::new(Coordinator::new());

    assert_eq!(controller(&rig, &coord).run(), SequenceOutcome::Refused);
    assert!(rig.outputs.frames().is_empty());
}

#[test]
fn refused_while_another_sequence_is_active() {
    let rig = Rig::new(vec![zone(1, 1)], at(2024, 6, 3, 8, 0, 0));
    let coord = claimed();
    assert!(coord.begin_sequence());
    assert!(coord.claim(PendingCommand::StartOnce));

    assert_eq!(controller(&rig, &coord).run(), SequenceOutcome::Refused);
    assert_eq!(coord.peek(), Some(PendingCommand::StartOnce));
}

#[test]
fn output_failures_do_not_abort_the_run() {
    let rig = Rig::new(vec![zone(1, 1), zone(2, 1)], at(2024, 6, 3, 8, 0, 0));
    *rig.outputs.fail_with.lock().unwrap() = Some(BusError::Timeout);
    let coord = claimed();

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::Completed { zones: 2 });
    assert_eq!(rig.store.records().len(), 2);
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::OutputWriteFailed { .. })),
        3
    );
}

#[test]
fn lost_link_is_reported_and_the_run_continues() {
    let rig = Rig::new(vec![zone(1, 1), zone(2, 1)], at(2024, 6, 3, 8, 0, 0));
    *rig.outputs.fail_with.lock().unwrap() = Some(BusError::LinkLost("EIO".into()));
    let coord = claimed();

    let outcome = controller(&rig, &coord).run();
    assert_eq!(outcome, SequenceOutcome::Completed { zones: 2 });
    assert!(rig.sink.count(|e| matches!(e, AppEvent::BusLinkLost { .. })) >= 1);
}

#[test]
fn run_state_is_persisted_per_zone() {
    let start = at(2024, 6, 3, 8, 0, 0);
    let rig = Rig::new(vec![zone(4, 5)], start);
    let coord = claimed();

    controller(&rig, &coord).run();

    let log = rig.store.run_state_log.lock().unwrap().clone();
    assert_eq!(log.len(), 2);
    assert!(log[0].running);
    assert_eq!(log[0].current_zone, Some(4));
    assert_eq!(log[0].zone_started_at, Some(start));
    assert_eq!(log[0].zone_duration_secs, Some(5));
    assert!(log[0].valves[3]);
    assert!(!log[1].running);
    assert_eq!(log[1].valves, vec![false; 15]);
}
