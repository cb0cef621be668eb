//! dripctl library.
//!
//! Device control core for a Modbus RTU drip-irrigation rig: the bus
//! session, output mapping, command coordinator, sequence controller,
//! schedule evaluator and tank regulator.  Exposed for integration testing
//! and for the `dripctl` daemon in `main.rs`.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bus;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod output;
pub mod scheduler;
pub mod sensors;
pub mod sequence;
pub mod status;
