//! Command coordinator: the one outstanding command plus the live run state.
//!
//! ```text
//!   operator / scheduler ──claim──▶ ┌──────────────────────┐
//!                                   │ pending: Option<Cmd>  │ ◀──peek/ack── UI
//!   sequence thread ──begin/end──▶  │ sequence_active       │
//!                  ──run state──▶   │ run_state             │ ──snapshot──▶ status
//!                                   └──────────────────────┘
//! ```
//!
//! Every operation takes the lock once, so claims are atomic with respect to
//! each other and `begin_sequence` is a single check-and-set.  Shared via
//! `Arc`; nothing here can fail.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{debug, info};

use crate::app::commands::PendingCommand;
use crate::model::RunState;

#[derive(Debug, Default)]
struct Inner {
    pending: Option<PendingCommand>,
    run_state: RunState,
    sequence_active: bool,
}

pub struct Coordinator {
    inner: CriticalSectionMutex<RefCell<Inner>>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            inner: CriticalSectionMutex::new(RefCell::new(Inner::default())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    // ── Pending command ───────────────────────────────────────

    /// Store `cmd` if nothing is pending.  `Stop` always wins and overwrites.
    pub fn claim(&self, cmd: PendingCommand) -> bool {
        let accepted = self.with(|s| match (cmd, s.pending) {
            (PendingCommand::Stop, _) | (_, None) => {
                s.pending = Some(cmd);
                true
            }
            _ => false,
        });
        if accepted {
            info!("Coordinator: claimed {:?}", cmd);
        } else {
            debug!("Coordinator: {:?} refused, command already pending", cmd);
        }
        accepted
    }

    pub fn peek(&self) -> Option<PendingCommand> {
        self.with(|s| s.pending)
    }

    /// Clear the pending command only if it equals `cmd`.
    pub fn ack(&self, cmd: PendingCommand) -> bool {
        self.with(|s| {
            if s.pending == Some(cmd) {
                s.pending = None;
                true
            } else {
                false
            }
        })
    }

    pub fn clear(&self) {
        self.with(|s| s.pending = None);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.with(|s| s.pending == Some(PendingCommand::Stop))
    }

    // ── Run state ─────────────────────────────────────────────

    /// Consistent copy of the live run state.
    pub fn run_state(&self) -> RunState {
        self.with(|s| s.run_state.clone())
    }

    pub fn update_run_state(&self, f: impl FnOnce(&mut RunState)) {
        self.with(|s| f(&mut s.run_state));
    }

    pub fn set_run_state(&self, state: RunState) {
        self.with(|s| s.run_state = state);
    }

    /// Back to not-running with every output off, keeping the valve count.
    pub fn clear_run_state(&self) {
        self.with(|s| {
            let valves = s.run_state.valves.len();
            s.run_state = RunState::idle(valves);
        });
    }

    // ── Sequence guard ────────────────────────────────────────

    /// Accept a pending start-once and mark a sequence active.
    ///
    /// Refused while a sequence is active, while the run state says running,
    /// or when the pending command is not start-once.  On acceptance the
    /// start-once is consumed.
    pub fn begin_sequence(&self) -> bool {
        self.with(|s| {
            if s.sequence_active
                || s.run_state.running
                || s.pending != Some(PendingCommand::StartOnce)
            {
                return false;
            }
            s.pending = None;
            s.sequence_active = true;
            true
        })
    }

    /// Release the sequence guard and drop the pending command in one step.
    ///
    /// A stop that raced the end of the run is consumed here; anyone
    /// claiming after this sees no active sequence.
    pub fn end_sequence(&self) {
        let dropped = self.with(|s| {
            s.sequence_active = false;
            s.pending.take()
        });
        if let Some(cmd) = dropped {
            debug!("Coordinator: {:?} consumed at end of sequence", cmd);
        }
    }

    pub fn is_sequence_active(&self) -> bool {
        self.with(|s| s.sequence_active)
    }

    /// A sequence is active or the run state says running.
    pub fn is_busy(&self) -> bool {
        self.with(|s| s.sequence_active || s.run_state.running)
    }
}
