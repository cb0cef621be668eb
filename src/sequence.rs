//! Sequence controller: one watering pass over the enabled zones.
//!
//! ```text
//!   Idle ──begin_sequence──▶ Running(zone 0) ──▶ … ──▶ Running(zone k-1) ──▶ Idle
//!                                 │  stop observed between steps / zones  │
//!                                 └──────────────▶ all off ◀──────────────┘
//! ```
//!
//! Each zone is a physical output change followed by a history row, in that
//! order.  Stop is cooperative: the coordinator's pending command is checked
//! at every zone boundary and between wait steps.  Output failures never
//! abort a run.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::Ports;
use crate::coordinator::Coordinator;
use crate::error::{BusError, ConfigError};
use crate::model::{NewSupplyRecord, RunState, ZoneSpec, runnable_zones};
use crate::output::{FrameLayout, OutputFrame};

/// How a call to [`SequenceController::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// No start-once pending, or a run is already active.
    Refused,
    /// Nothing to water.
    NoZones,
    /// Every zone ran its full duration.
    Completed { zones: usize },
    /// Halted by a stop request; `zone` is the one interrupted mid-wait.
    Stopped { zone: Option<u16> },
}

pub struct SequenceController {
    coordinator: Arc<Coordinator>,
    ports: Ports,
    layout: FrameLayout,
    step: Duration,
}

impl SequenceController {
    pub fn new(
        coordinator: Arc<Coordinator>,
        ports: Ports,
        layout: FrameLayout,
        step: Duration,
    ) -> Self {
        Self {
            coordinator,
            ports,
            layout,
            step: step.max(Duration::from_millis(1)),
        }
    }

    /// Run one pass if the coordinator accepts it.  Blocks for the whole run;
    /// the service calls this from a dedicated thread.
    pub fn run(&self) -> SequenceOutcome {
        if !self.coordinator.begin_sequence() {
            debug!("Sequence: not started (busy or no start-once pending)");
            return SequenceOutcome::Refused;
        }

        let outcome = self.run_zones();
        self.finish();

        match outcome {
            SequenceOutcome::Completed { zones } => {
                info!("Sequence: completed {} zones", zones);
                self.ports.events.emit(&AppEvent::SequenceFinished);
            }
            SequenceOutcome::Stopped { zone } => {
                info!("Sequence: stopped (zone {:?})", zone);
                self.ports.events.emit(&AppEvent::SequenceStopped { zone_id: zone });
            }
            SequenceOutcome::NoZones | SequenceOutcome::Refused => {}
        }
        outcome
    }

    // ── Internal ──────────────────────────────────────────────

    fn run_zones(&self) -> SequenceOutcome {
        let zones = self.load_zones();
        if zones.is_empty() {
            info!("Sequence: {}, nothing to do", ConfigError::NoEnabledZones);
            return SequenceOutcome::NoZones;
        }

        info!("Sequence: starting over {} zones", zones.len());
        self.ports
            .events
            .emit(&AppEvent::SequenceStarted { zones: zones.len() });

        for zone in &zones {
            if self.coordinator.is_stop_requested() {
                return SequenceOutcome::Stopped { zone: None };
            }
            if !self.run_zone(zone) {
                return SequenceOutcome::Stopped {
                    zone: Some(zone.zone_id),
                };
            }
        }
        SequenceOutcome::Completed { zones: zones.len() }
    }

    /// Switch to `zone`, record it and wait it out.  `false` when stopped.
    fn run_zone(&self, zone: &ZoneSpec) -> bool {
        let valves = self.layout.valve_vector(Some(zone.zone_id));
        let frame = self.layout.to_frame(true, &valves);
        let started_at = self.ports.clock.now();

        let state = RunState::zone_active(zone.zone_id, started_at, zone.duration_secs, valves.clone());
        self.coordinator.set_run_state(state.clone());
        self.persist_run_state(&state);

        info!(
            "Sequence: zone {} '{}' on for {}s",
            zone.zone_id, zone.name, zone.duration_secs
        );
        self.apply(&frame);
        self.ports.events.emit(&AppEvent::ZoneStarted {
            zone_id: zone.zone_id,
            duration_secs: zone.duration_secs,
        });

        let record = NewSupplyRecord {
            started_at,
            zone_id: zone.zone_id,
            pump_on: true,
            valves,
        };
        let record_id = match self.ports.history.insert_record(&record) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Sequence: history insert for zone {} failed: {}", zone.zone_id, e);
                None
            }
        };

        let completed = self.wait(Duration::from_secs(u64::from(zone.duration_secs)));

        if let Some(id) = record_id {
            let ended_at = self.ports.clock.now();
            if let Err(e) = self.ports.history.finish_record(id, ended_at) {
                error!("Sequence: history row {} not closed: {}", id, e);
            }
        }

        if completed {
            self.ports
                .events
                .emit(&AppEvent::ZoneFinished { zone_id: zone.zone_id });
        }
        completed
    }

    /// Sleep `total` in steps, checking for stop before each.
    fn wait(&self, total: Duration) -> bool {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            if self.coordinator.is_stop_requested() {
                return false;
            }
            let chunk = self.step.min(total - elapsed);
            self.ports.clock.sleep(chunk);
            elapsed += chunk;
        }
        true
    }

    /// All off, idle run state, nothing pending, guard released.
    fn finish(&self) {
        self.apply(&self.layout.all_off());

        let idle = RunState::idle(usize::from(self.layout.valve_count));
        self.coordinator.set_run_state(idle.clone());
        self.persist_run_state(&idle);
        self.coordinator.end_sequence();
    }

    fn load_zones(&self) -> Vec<ZoneSpec> {
        match self.ports.settings.zones() {
            Ok(zones) => runnable_zones(&zones, usize::from(self.layout.valve_count)),
            Err(e) => {
                error!("Sequence: zones unreadable: {}", e);
                Vec::new()
            }
        }
    }

    fn apply(&self, frame: &OutputFrame) {
        match self.ports.outputs.apply(frame) {
            Ok(()) => {}
            Err(e) if e.is_link_loss() => {
                error!("Sequence: bus link lost while writing outputs: {}", e);
                self.ports.events.emit(&AppEvent::BusLinkLost {
                    reason: e.to_string(),
                });
            }
            Err(BusError::NotConnected) => {
                warn!("Sequence: bus not connected, outputs written to relay board only");
                self.ports.events.emit(&AppEvent::OutputWriteFailed {
                    reason: BusError::NotConnected.to_string(),
                });
            }
            Err(e) => {
                warn!("Sequence: output write failed: {}", e);
                self.ports.events.emit(&AppEvent::OutputWriteFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn persist_run_state(&self, state: &RunState) {
        if let Err(e) = self.ports.state.save_run_state(state) {
            error!("Sequence: run state not persisted: {}", e);
        }
    }
}
