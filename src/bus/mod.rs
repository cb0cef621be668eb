//! Bus session: the single serial field-bus connection.
//!
//! Every operation, connect and close included, is queued to one worker
//! thread that owns the [`BusTransport`].  Callers block on a per-request
//! reply signal with a bounded wait, so nothing here can hang forever and
//! two opens can never race.
//!
//! ```text
//!   caller A ─┐                      ┌──────────────────────────────┐
//!   caller B ─┼──▶ request queue ──▶ │ worker thread                │
//!   caller C ─┘   (embassy Channel)  │  set_slave ▶ turnaround ▶ IO │ ──▶ serial line
//!        ▲                           └──────────────┬───────────────┘
//!        └──────────── reply Signal ◀───────────────┘
//! ```

mod worker;

use core::cell::RefCell;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{info, warn};

use crate::app::ports::BusTransport;
use crate::config::BusTiming;
use crate::error::BusError;

/// Requests that may wait in the queue before callers start blocking.
const QUEUE_DEPTH: usize = 16;

/// Which kind of slave an operation addresses.  Picks turnaround and timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The output controller (PLC).
    Controller,
    /// A field sensor.
    Sensor,
}

// ── Queue messages ────────────────────────────────────────────

enum BusOp {
    Connect { port: String, baud: u32 },
    Close,
    ReadBits { address: u16, count: u16, slave: u8 },
    WriteBits { address: u16, bits: Vec<bool>, slave: u8 },
    ReadInputRegisters { address: u16, count: u16, slave: u8 },
    ReadHoldingRegisters { address: u16, count: u16, slave: u8 },
    Shutdown,
}

enum BusReply {
    Done,
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

type ReplySignal = Signal<CriticalSectionRawMutex, Result<BusReply, BusError>>;

struct BusRequest {
    op: BusOp,
    reply: Arc<ReplySignal>,
}

/// State shared between the handle and the worker.
struct Shared {
    requests: Channel<CriticalSectionRawMutex, BusRequest, QUEUE_DEPTH>,
    /// Port of the open session, `None` when closed.
    port: CriticalSectionMutex<RefCell<Option<String>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            requests: Channel::new(),
            port: CriticalSectionMutex::new(RefCell::new(None)),
        }
    }

    fn port(&self) -> Option<String> {
        self.port.lock(|p| p.borrow().clone())
    }

    fn set_port(&self, port: Option<String>) {
        self.port.lock(|p| *p.borrow_mut() = port);
    }
}

// ───────────────────────────────────────────────────────────────
// BusSession
// ───────────────────────────────────────────────────────────────

/// Handle to the bus worker.  Share it behind an `Arc`.
pub struct BusSession {
    shared: Arc<Shared>,
    timing: BusTiming,
    worker: Option<JoinHandle<()>>,
}

impl BusSession {
    /// Start the worker thread around `transport`.  The session starts closed.
    pub fn spawn(transport: Box<dyn BusTransport>, timing: BusTiming) -> Result<Self, BusError> {
        let shared = Arc::new(Shared::new());
        let bus_worker = worker::BusWorker::new(transport, timing, Arc::clone(&shared));
        let handle = std::thread::Builder::new()
            .name("bus-worker".into())
            .spawn(move || bus_worker.run())
            .map_err(|e| BusError::Io(e.to_string()))?;
        Ok(Self {
            shared,
            timing,
            worker: Some(handle),
        })
    }

    /// Close any open session, wait the settle delay, then open `port`.
    /// A busy port is retried once after the backoff.
    pub fn connect(&self, port: &str, baud: u32) -> Result<(), BusError> {
        let t = &self.timing;
        let bound = t.settle + t.busy_backoff + t.controller_timeout * 2;
        self.submit(
            BusOp::Connect {
                port: port.to_owned(),
                baud,
            },
            bound,
        )
        .map(|_| ())
    }

    pub fn close(&self) -> Result<(), BusError> {
        self.submit(BusOp::Close, self.timing.controller_timeout)
            .map(|_| ())
    }

    /// FC1 against a controller slave.
    pub fn read_bits(&self, address: u16, count: u16, slave: u8) -> Result<Vec<bool>, BusError> {
        match self.submit(
            BusOp::ReadBits {
                address,
                count,
                slave,
            },
            self.op_bound(Target::Controller),
        )? {
            BusReply::Bits(bits) => Ok(bits),
            _ => Err(BusError::Io("unexpected reply to coil read".into())),
        }
    }

    /// FC15 against a controller slave.
    pub fn write_bits(&self, address: u16, bits: &[bool], slave: u8) -> Result<(), BusError> {
        self.submit(
            BusOp::WriteBits {
                address,
                bits: bits.to_vec(),
                slave,
            },
            self.op_bound(Target::Controller),
        )
        .map(|_| ())
    }

    /// FC4 against a sensor slave.
    pub fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, BusError> {
        let reply = self.submit(
            BusOp::ReadInputRegisters {
                address,
                count,
                slave,
            },
            self.op_bound(Target::Sensor),
        )?;
        Self::words(reply)
    }

    /// FC3 against a controller slave.
    pub fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, BusError> {
        let reply = self.submit(
            BusOp::ReadHoldingRegisters {
                address,
                count,
                slave,
            },
            self.op_bound(Target::Controller),
        )?;
        Self::words(reply)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.port().is_some()
    }

    pub fn current_port(&self) -> Option<String> {
        self.shared.port()
    }

    // ── Internal ──────────────────────────────────────────────

    fn words(reply: BusReply) -> Result<Vec<u16>, BusError> {
        match reply {
            BusReply::Words(words) => Ok(words),
            _ => Err(BusError::Io("unexpected reply to register read".into())),
        }
    }

    fn op_bound(&self, target: Target) -> Duration {
        match target {
            Target::Controller => self.timing.controller_turnaround + self.timing.controller_timeout,
            Target::Sensor => self.timing.sensor_turnaround + self.timing.sensor_timeout,
        }
    }

    /// Queue `op` and wait for its reply.
    ///
    /// The wait covers the operation itself, one in-flight operation ahead of
    /// it, and the configured slack.  On timeout a request still waiting in
    /// the queue is dropped by the worker; one the worker already started
    /// runs to completion, so a timed-out `connect` may still open the port.
    fn submit(&self, op: BusOp, op_bound: Duration) -> Result<BusReply, BusError> {
        if self.worker.as_ref().is_none_or(JoinHandle::is_finished) {
            return Err(BusError::WorkerGone);
        }
        let bound = op_bound + self.timing.controller_timeout + self.timing.reply_slack;
        let reply = Arc::new(ReplySignal::new());
        let request = BusRequest {
            op,
            reply: Arc::clone(&reply),
        };
        let requests = &self.shared.requests;

        future::block_on(future::or(
            async {
                requests.send(request).await;
                reply.wait().await
            },
            async {
                async_io_mini::Timer::after(bound).await;
                Err(BusError::Timeout)
            },
        ))
    }
}

impl Drop for BusSession {
    fn drop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        if handle.is_finished() {
            return;
        }
        let request = BusRequest {
            op: BusOp::Shutdown,
            reply: Arc::new(ReplySignal::new()),
        };
        if self.shared.requests.try_send(request).is_err() {
            warn!("Bus: request queue full at shutdown, detaching worker");
            return;
        }
        if handle.join().is_err() {
            warn!("Bus: worker panicked");
        } else {
            info!("Bus: worker joined");
        }
    }
}
