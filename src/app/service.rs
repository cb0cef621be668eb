//! Application service: the hexagonal core.
//!
//! [`AppService`] owns the coordinator, the schedule evaluator, the tank
//! regulator and the handle of the sequence thread.  It exposes the
//! operator actions as plain calls; all I/O flows through the injected
//! [`Ports`] and the shared [`BusSession`].
//!
//! ```text
//!  operator ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!               │          AppService          │
//!  poll loop ──▶│ Evaluator · Regulator · Coord│ ──▶ OutputPort ──▶ bus + relay
//!               └──────────────┬───────────────┘
//!                              └── spawns ──▶ SequenceController (own thread)
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::app::commands::PendingCommand;
use crate::bus::BusSession;
use crate::config::SystemConfig;
use crate::control::hysteresis::PumpState;
use crate::control::tank::{TankReading, TankRegulator};
use crate::coordinator::Coordinator;
use crate::error::{BusError, PersistenceError};
use crate::model::{RunState, SupplyRecord};
use crate::output::{FrameLayout, OutputFrame};
use crate::scheduler::ScheduleEvaluator;
use crate::sequence::{SequenceController, SequenceOutcome};
use crate::status::StatusSnapshot;

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{Clock, EventSink, Ports, ScheduleFiredKind, SchedulerDelegate};

type SequenceHandle = JoinHandle<SequenceOutcome>;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    config: SystemConfig,
    layout: FrameLayout,
    bus: Arc<BusSession>,
    coordinator: Arc<Coordinator>,
    ports: Ports,
    sequence: Arc<SequenceController>,
    sequence_thread: Option<SequenceHandle>,
    evaluator: ScheduleEvaluator,
    regulator: TankRegulator,
    last_tank: Option<TankReading>,
}

impl AppService {
    /// Wire the service.  Call [`recover_after_restart`](Self::recover_after_restart)
    /// before the first tick.
    pub fn new(config: SystemConfig, bus: Arc<BusSession>, ports: Ports) -> Self {
        let layout = config.frame;
        let coordinator = Arc::new(Coordinator::new());
        coordinator.set_run_state(RunState::idle(usize::from(layout.valve_count)));

        let sequence = Arc::new(SequenceController::new(
            Arc::clone(&coordinator),
            ports.clone(),
            layout,
            config.sequence_step(),
        ));
        let evaluator = ScheduleEvaluator::new(usize::from(layout.valve_count));
        let regulator = TankRegulator::new(Arc::clone(&ports.settings), Arc::clone(&ports.state));

        Self {
            config,
            layout,
            bus,
            coordinator,
            ports,
            sequence,
            sequence_thread: None,
            evaluator,
            regulator,
            last_tank: None,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn bus(&self) -> &Arc<BusSession> {
        &self.bus
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// A persisted running state means the process died mid-run: force the
    /// outputs off and persist not-running.  Returns whether that happened.
    pub fn recover_after_restart(&mut self) -> bool {
        let recovered = match self.ports.state.load_run_state() {
            Ok(Some(state)) if state.running => {
                warn!(
                    "AppService: run state says zone {:?} was running at shutdown, forcing outputs off",
                    state.current_zone
                );
                self.force_idle();
                true
            }
            Ok(_) => false,
            Err(e) => {
                error!("AppService: run state unreadable at boot: {}", e);
                false
            }
        };
        self.ports.events.emit(&AppEvent::Started {
            recovered_run: recovered,
        });
        info!("AppService started (recovered_run={})", recovered);
        recovered
    }

    /// Block until the current sequence thread (if any) has exited.
    pub fn wait_for_sequence(&mut self) -> Option<SequenceOutcome> {
        let handle = self.sequence_thread.take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("AppService: sequence thread panicked");
                None
            }
        }
    }

    /// Stop any run and wait for the sequence thread.
    pub fn shutdown(&mut self) {
        if self.coordinator.is_sequence_active() {
            self.request_stop();
        }
        self.wait_for_sequence();
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One poll-loop period: schedule evaluation, then tank regulation.
    pub fn tick(&mut self) {
        self.reap_sequence();

        let now = self.ports.clock.now();
        let mut launcher = Launcher {
            sequence: &self.sequence,
            slot: &mut self.sequence_thread,
            coordinator: &self.coordinator,
            events: self.ports.events.as_ref(),
        };
        self.evaluator.tick(
            now,
            self.ports.settings.as_ref(),
            self.ports.state.as_ref(),
            &self.coordinator,
            &mut launcher,
        );

        self.regulate_tank();
    }

    /// Read the tank transmitter and run the regulator.  `None` when the bus
    /// is closed or the read failed.
    pub fn regulate_tank(&mut self) -> Option<TankReading> {
        if !self.bus.is_connected() {
            return None;
        }
        let raw = match self.bus.read_input_registers(
            self.config.tank_level_register,
            1,
            self.config.tank_sensor_slave,
        ) {
            Ok(words) => *words.first()?,
            Err(e) => {
                warn!("AppService: tank level read failed: {}", e);
                return None;
            }
        };

        let mut reading = self.regulator.evaluate(raw);

        if self.coordinator.is_busy() {
            reading.pump = PumpState::from_bool(self.coordinator.run_state().pump_on);
        } else if self.config.tank_drive_output && reading.changed {
            let on = reading.pump.is_on();
            info!("AppService: tank regulator switching pump {}", if on { "on" } else { "off" });
            match self.ports.outputs.apply(&self.layout.pump_only(on)) {
                Ok(()) => self.coordinator.update_run_state(|s| s.pump_on = on),
                Err(e) => self.report_output_failure(&e),
            }
        }

        let first = self.last_tank.is_none();
        self.last_tank = Some(reading);
        if first || reading.changed {
            self.ports.events.emit(&AppEvent::TankLevel(reading));
        } else {
            debug!("AppService: tank {:.1}cm pump {:?}", reading.level_cm, reading.pump);
        }
        Some(reading)
    }

    // ── Command handling ──────────────────────────────────────

    /// Dispatch an external command.  Returns whether it was accepted and
    /// carried out.
    pub fn handle_command(&mut self, cmd: AppCommand) -> bool {
        match cmd {
            AppCommand::StartOnce => self.request_start_once(),
            AppCommand::Stop => {
                self.request_stop();
                true
            }
            AppCommand::Acknowledge(Some(pending)) => self.acknowledge(pending),
            AppCommand::Acknowledge(None) => {
                self.acknowledge_any();
                true
            }
            AppCommand::Connect { port, baud } => self.connect_bus(&port, baud).is_ok(),
            AppCommand::Disconnect => self.close_bus().is_ok(),
            AppCommand::WriteOutputs(frame) => matches!(self.write_outputs(&frame), Ok(true)),
        }
    }

    /// Claim a start-once and launch the sequence thread.  Refused while a
    /// run is active or another command is pending.
    pub fn request_start_once(&mut self) -> bool {
        if self.coordinator.is_busy() || !self.coordinator.claim(PendingCommand::StartOnce) {
            self.ports
                .events
                .emit(&AppEvent::CommandRejected(PendingCommand::StartOnce));
            return false;
        }
        self.ports
            .events
            .emit(&AppEvent::CommandAccepted(PendingCommand::StartOnce));

        if spawn_sequence(&self.sequence, &mut self.sequence_thread) {
            true
        } else {
            self.coordinator.ack(PendingCommand::StartOnce);
            false
        }
    }

    /// Claim stop.  With no sequence to observe it, outputs go off and the
    /// stop is acknowledged right away.
    pub fn request_stop(&mut self) {
        self.coordinator.claim(PendingCommand::Stop);
        self.ports
            .events
            .emit(&AppEvent::CommandAccepted(PendingCommand::Stop));

        if !self.coordinator.is_sequence_active() {
            info!("AppService: stop with no active sequence, forcing outputs off");
            self.force_idle();
            self.coordinator.ack(PendingCommand::Stop);
        }
    }

    /// Operator acknowledgement of `cmd`.  A mismatch is a no-op.
    pub fn acknowledge(&self, cmd: PendingCommand) -> bool {
        self.coordinator.ack(cmd)
    }

    pub fn acknowledge_any(&self) {
        self.coordinator.clear();
    }

    // ── Bus ───────────────────────────────────────────────────

    pub fn connect_bus(&self, port: &str, baud: u32) -> Result<(), BusError> {
        match self.bus.connect(port, baud) {
            Ok(()) => {
                self.ports.events.emit(&AppEvent::BusConnected {
                    port: port.to_owned(),
                });
                Ok(())
            }
            Err(e) => {
                error!("AppService: connect to {} failed: {}", port, e);
                Err(e)
            }
        }
    }

    /// Close the bus.  A transport close failure is returned, but the
    /// session is still forgotten and reported closed.
    pub fn close_bus(&self) -> Result<(), BusError> {
        let result = self.bus.close();
        if let Err(e) = &result {
            warn!("AppService: bus close reported {}", e);
        }
        if !self.bus.is_connected() {
            self.ports.events.emit(&AppEvent::BusClosed);
        }
        result
    }

    /// Read the coil block back from the controller and decode it.
    pub fn read_outputs(&self) -> Result<(bool, Vec<bool>), BusError> {
        let width = u16::try_from(self.layout.width())
            .map_err(|_| BusError::Io("frame too wide".into()))?;
        let bits = self
            .bus
            .read_bits(self.layout.base_address, width, self.config.controller_slave)?;
        Ok(self.layout.from_frame(&OutputFrame::from_bits(&bits)))
    }

    /// Read the controller's holding-register block.
    pub fn read_registers(&self) -> Result<Vec<u16>, BusError> {
        self.bus.read_holding_registers(
            self.config.register_start,
            self.config.register_count,
            self.config.controller_slave,
        )
    }

    /// Up to `limit` supply history rows, newest first.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<SupplyRecord>, PersistenceError> {
        self.ports.history.recent_records(limit)
    }

    /// Manual coil write.  `Ok(false)` when refused because a run is active.
    pub fn write_outputs(&self, frame: &OutputFrame) -> Result<bool, BusError> {
        if self.coordinator.is_busy() {
            warn!("AppService: manual output write refused, sequence active");
            return Ok(false);
        }
        let (pump_on, valves) = self.layout.from_frame(frame);
        let normalized = self.layout.to_frame(pump_on, &valves);
        self.ports.outputs.apply(&normalized)?;

        let mut state = self.coordinator.run_state();
        state.pump_on = pump_on;
        state.valves = valves;
        self.coordinator.set_run_state(state.clone());
        if let Err(e) = self.ports.state.save_run_state(&state) {
            error!("AppService: run state not persisted: {}", e);
        }
        Ok(true)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> StatusSnapshot {
        let now = self.ports.clock.now();
        let run = self.coordinator.run_state();

        let thresholds = self.last_tank.map_or_else(
            || self.ports.settings.tank_thresholds().unwrap_or_default(),
            |t| t.thresholds,
        );
        let tank_pump_on = if run.running {
            run.pump_on
        } else {
            self.regulator.pump_state().is_on()
        };
        let last_fired = self.evaluator.last_fired().cloned().or_else(|| {
            self.ports
                .state
                .load_trigger_state()
                .ok()
                .and_then(|r| r.last_fired)
        });

        StatusSnapshot {
            now,
            pending: self.coordinator.peek(),
            running: run.running,
            current_zone: run.current_zone,
            remaining_secs: run.remaining_secs(now),
            pump_on: run.pump_on,
            valves: run.valves,
            bus_connected: self.bus.is_connected(),
            bus_port: self.bus.current_port(),
            tank: self.last_tank,
            tank_pump_on,
            thresholds,
            last_fired,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    /// All outputs off and a persisted not-running state.
    fn force_idle(&self) {
        if let Err(e) = self.ports.outputs.apply(&self.layout.all_off()) {
            self.report_output_failure(&e);
        }
        let idle = RunState::idle(usize::from(self.layout.valve_count));
        self.coordinator.set_run_state(idle.clone());
        if let Err(e) = self.ports.state.save_run_state(&idle) {
            error!("AppService: run state not persisted: {}", e);
        }
    }

    fn report_output_failure(&self, e: &BusError) {
        if e.is_link_loss() {
            error!("AppService: bus link lost: {}", e);
            self.ports.events.emit(&AppEvent::BusLinkLost {
                reason: e.to_string(),
            });
        } else {
            warn!("AppService: output write failed: {}", e);
            self.ports.events.emit(&AppEvent::OutputWriteFailed {
                reason: e.to_string(),
            });
        }
    }

    fn reap_sequence(&mut self) {
        if self
            .sequence_thread
            .as_ref()
            .is_some_and(|h| h.is_finished())
        {
            if let Some(outcome) = self.wait_for_sequence() {
                debug!("AppService: sequence thread exited with {:?}", outcome);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Sequence launching
// ───────────────────────────────────────────────────────────────

/// Start the sequence on its own thread.  A previous thread has already
/// released the coordinator guard by the time a new run is accepted, so
/// joining it here is brief.
fn spawn_sequence(sequence: &Arc<SequenceController>, slot: &mut Option<SequenceHandle>) -> bool {
    if let Some(previous) = slot.take() {
        if previous.join().is_err() {
            error!("AppService: previous sequence thread panicked");
        }
    }

    let sequence = Arc::clone(sequence);
    match thread::Builder::new()
        .name("sequence".into())
        .spawn(move || sequence.run())
    {
        Ok(handle) => {
            *slot = Some(handle);
            true
        }
        Err(e) => {
            error!("AppService: failed to spawn sequence thread: {}", e);
            false
        }
    }
}

/// Scheduler delegate that launches the sequence for a claimed fire.
struct Launcher<'a> {
    sequence: &'a Arc<SequenceController>,
    slot: &'a mut Option<SequenceHandle>,
    coordinator: &'a Coordinator,
    events: &'a dyn EventSink,
}

impl SchedulerDelegate for Launcher<'_> {
    fn on_schedule_fired(&mut self, label: &str, kind: ScheduleFiredKind) {
        self.events.emit(&AppEvent::ScheduleFired {
            kind,
            label: label.to_owned(),
        });
        if !spawn_sequence(self.sequence, self.slot) {
            self.coordinator.ack(PendingCommand::StartOnce);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Boot-time connect
// ───────────────────────────────────────────────────────────────

/// Open the configured port once at startup.
///
/// Skipped when auto-connect is off or the device node is missing.  Waits
/// the boot delay first so the adapter can enumerate; the port-busy retry
/// lives in [`BusSession::connect`].  Returns whether a session was opened.
pub fn boot_auto_connect(
    bus: &BusSession,
    config: &SystemConfig,
    clock: &dyn Clock,
    events: &dyn EventSink,
) -> Result<bool, BusError> {
    if !config.bus_auto_connect {
        info!("AppService: bus auto-connect disabled");
        return Ok(false);
    }
    let port = config.bus_port.as_str();
    if port.starts_with('/') && !Path::new(port).exists() {
        warn!("AppService: {} not present, skipping boot connect", port);
        return Ok(false);
    }

    clock.sleep(config.boot_delay());
    bus.connect(port, config.bus_baud)?;
    info!("AppService: bus connected on {} at {} baud", port, config.bus_baud);
    events.emit(&AppEvent::BusConnected {
        port: port.to_owned(),
    });
    Ok(true)
}
