//! Field sensors read over the bus.
//!
//! Only the tank level transmitter is wired today; the regulator in
//! [`crate::control::tank`] owns the polling.

pub mod tank_level;
