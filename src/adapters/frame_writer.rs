//! Production [`OutputPort`]: one frame, two sinks.
//!
//! ```text
//!   OutputFrame ──▶ FrameWriter ──▶ BusSession.write_bits(base, bits, controller)
//!                              └──▶ RelayBoard.apply(first N bits)   (always)
//! ```
//!
//! The relay board is fed even when the bus write fails or the bus is closed,
//! so a rig with only the local board still works.

use std::sync::{Arc, Mutex};

use log::warn;

use crate::app::ports::{OutputPort, RelayBoard};
use crate::bus::BusSession;
use crate::error::BusError;
use crate::output::OutputFrame;

/// Relay channels on the reference board.
pub const RELAY_CHANNELS: usize = 8;

pub struct FrameWriter {
    bus: Arc<BusSession>,
    base_address: u16,
    controller_slave: u8,
    relay: Option<Mutex<Box<dyn RelayBoard>>>,
}

impl FrameWriter {
    pub fn new(bus: Arc<BusSession>, base_address: u16, controller_slave: u8) -> Self {
        Self {
            bus,
            base_address,
            controller_slave,
            relay: None,
        }
    }

    /// Mirror every frame onto `board`.
    #[must_use]
    pub fn with_relay_board(mut self, board: Box<dyn RelayBoard>) -> Self {
        self.relay = Some(Mutex::new(board));
        self
    }
}

impl OutputPort for FrameWriter {
    fn apply(&self, frame: &OutputFrame) -> Result<(), BusError> {
        let written = self
            .bus
            .write_bits(self.base_address, frame.bits(), self.controller_slave);

        if let Some(relay) = &self.relay {
            match relay.lock() {
                Ok(mut board) => board.apply(&frame.relay_channels(RELAY_CHANNELS)),
                Err(_) => warn!("FrameWriter: relay board lock poisoned, skipping"),
            }
        }
        written
    }
}
