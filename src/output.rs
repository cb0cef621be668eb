//! Output mapping: pump and zone-valve states <-> a contiguous coil frame.
//!
//! ```text
//!  coil address   base   base+1  base+2  ...  base+P  ...  base+W-1
//!  frame index      0      1       2     ...    P     ...    W-1
//!  meaning        pump   (pump)  (pump)  ...  zone 1  ...  zone N
//! ```
//!
//! `P` is the number of pump bits and `N = W - P` the number of zone valves.
//! The reference deployment is one pump bit plus fifteen valves at coil
//! 1032.  The layout is fixed at deployment time and never mixed.

use heapless::Vec;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest frame the controller will ever address in one write.
pub const MAX_FRAME_WIDTH: usize = 64;

/// Coil geometry of the output block on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// First coil address of the block.
    pub base_address: u16,
    /// Leading bits reserved for pumps.
    pub pump_bits: u8,
    /// Zone valves following the pump bits.
    pub valve_count: u8,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            base_address: 1032,
            pump_bits: 1,
            valve_count: 15,
        }
    }
}

impl FrameLayout {
    /// Total coils in the block.
    pub fn width(&self) -> usize {
        self.pump_bits as usize + self.valve_count as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pump_bits == 0 {
            return Err(ConfigError::ValidationFailed("frame needs at least one pump bit"));
        }
        if self.valve_count == 0 {
            return Err(ConfigError::ValidationFailed("frame needs at least one valve"));
        }
        if self.width() > MAX_FRAME_WIDTH {
            return Err(ConfigError::ValidationFailed("frame wider than 64 coils"));
        }
        if (self.base_address as usize) + self.width() > u16::MAX as usize + 1 {
            return Err(ConfigError::ValidationFailed("frame runs past the coil address space"));
        }
        Ok(())
    }

    /// Build a frame: every pump bit follows `pump_on`, valves map 1:1.
    ///
    /// Missing valve entries read as closed; extra entries are ignored.
    pub fn to_frame(&self, pump_on: bool, valves: &[bool]) -> OutputFrame {
        debug_assert!(
            self.width() <= MAX_FRAME_WIDTH,
            "layout of {} coils was never validated",
            self.width()
        );
        let mut bits: Vec<bool, MAX_FRAME_WIDTH> = Vec::new();
        for _ in 0..self.pump_bits {
            let _ = bits.push(pump_on);
        }
        for i in 0..self.valve_count as usize {
            let _ = bits.push(valves.get(i).copied().unwrap_or(false));
        }
        OutputFrame { bits }
    }

    /// Decode a frame back into (pump, valves).
    ///
    /// Pump reads as on when the primary pump bit (index 0) is set.  A short
    /// frame yields closed valves for the missing positions.
    pub fn from_frame(&self, frame: &OutputFrame) -> (bool, std::vec::Vec<bool>) {
        let pump_on = frame.bits.first().copied().unwrap_or(false);
        let start = self.pump_bits as usize;
        let valves = (0..self.valve_count as usize)
            .map(|i| frame.bits.get(start + i).copied().unwrap_or(false))
            .collect();
        (pump_on, valves)
    }

    /// All pumps off, all valves closed.
    pub fn all_off(&self) -> OutputFrame {
        self.to_frame(false, &[])
    }

    /// Pumps on with exactly one zone valve open.
    ///
    /// Zones are numbered from 1.  A zone outside the layout yields pumps on
    /// with every valve closed.
    pub fn zone_on(&self, zone_id: u16) -> OutputFrame {
        self.to_frame(true, &self.valve_vector(Some(zone_id)))
    }

    /// Pumps only, valves closed.
    pub fn pump_only(&self, pump_on: bool) -> OutputFrame {
        self.to_frame(pump_on, &[])
    }

    /// Valve vector with only `zone_id` open.
    pub fn valve_vector(&self, zone_id: Option<u16>) -> std::vec::Vec<bool> {
        let mut valves = vec![false; self.valve_count as usize];
        if let Some(idx) = zone_id.and_then(|z| (z as usize).checked_sub(1)) {
            if let Some(slot) = valves.get_mut(idx) {
                *slot = true;
            }
        }
        valves
    }

    /// Whether `zone_id` has a valve in this layout.
    pub fn has_zone(&self, zone_id: u16) -> bool {
        zone_id >= 1 && zone_id as usize <= self.valve_count as usize
    }
}

/// Ordered coil states, index 0 first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputFrame {
    bits: Vec<bool, MAX_FRAME_WIDTH>,
}

impl OutputFrame {
    /// Wrap raw coil states (e.g. read back from the controller).
    ///
    /// Anything beyond [`MAX_FRAME_WIDTH`] is dropped with a warning.
    pub fn from_bits(raw: &[bool]) -> Self {
        if raw.len() > MAX_FRAME_WIDTH {
            warn!(
                "Output: dropping {} coils past the {}-coil frame limit",
                raw.len() - MAX_FRAME_WIDTH,
                MAX_FRAME_WIDTH
            );
        }
        let mut bits = Vec::new();
        for &b in raw.iter().take(MAX_FRAME_WIDTH) {
            let _ = bits.push(b);
        }
        Self { bits }
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of coils set.
    pub fn count_on(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// The first `n` coils, padded with `false`, for the local relay board.
    pub fn relay_channels(&self, n: usize) -> std::vec::Vec<bool> {
        (0..n).map(|i| self.bits.get(i).copied().unwrap_or(false)).collect()
    }
}
