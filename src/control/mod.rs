//! Closed-loop control of the tank supply pump.

pub mod hysteresis;
pub mod tank;
