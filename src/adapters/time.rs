//! Wall-clock adapter.
//!
//! Schedules are expressed in local time, so [`SystemClock`] reports the
//! host's local wall time via `chrono` and sleeps with the OS timer.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::app::ports::Clock;

/// Host clock used by the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
