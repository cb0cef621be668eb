//! Modbus RTU transport over a local serial port.
//!
//! Implements [`BusTransport`] with `tokio-modbus` on top of `tokio-serial`.
//! The bus worker is a plain thread, so the adapter owns a current-thread
//! tokio runtime and drives every call with `block_on`, bounded by
//! `tokio::time::timeout`.

use std::io;
use std::time::Duration;

use log::{debug, info};
use tokio::runtime::{Builder, Runtime};
use tokio::time::error::Elapsed;
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

use crate::app::ports::BusTransport;
use crate::error::BusError;

/// Substrings the serial stack uses when another process holds the port.
const BUSY_MARKERS: [&str; 5] = [
    "Cannot lock port",
    "Resource temporarily unavailable",
    "Device or resource busy",
    "EAGAIN",
    "EBUSY",
];

pub struct ModbusRtuTransport {
    runtime: Runtime,
    ctx: Option<client::Context>,
    slave: u8,
}

impl ModbusRtuTransport {
    pub fn new() -> Result<Self, BusError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BusError::Io(format!("tokio runtime: {e}")))?;
        Ok(Self {
            runtime,
            ctx: None,
            slave: 1,
        })
    }

    fn context(&mut self) -> Result<(&Runtime, &mut client::Context), BusError> {
        match self.ctx.as_mut() {
            Some(ctx) => Ok((&self.runtime, ctx)),
            None => Err(BusError::NotConnected),
        }
    }
}

impl BusTransport for ModbusRtuTransport {
    fn open(&mut self, port: &str, baud: u32) -> Result<(), BusError> {
        let builder = tokio_serial::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);

        // SerialStream registers with the runtime's reactor.
        let _guard = self.runtime.enter();
        let stream = SerialStream::open(&builder).map_err(|e| classify_open_error(&e))?;
        self.ctx = Some(rtu::attach_slave(stream, Slave(self.slave)));
        info!("ModbusRtu: opened {} @ {} baud", port, baud);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BusError> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        let outcome = self.runtime.block_on(ctx.disconnect());
        drop(ctx);
        outcome.map_err(|e| map_io_error(&e))
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    fn set_slave(&mut self, slave: u8) {
        self.slave = slave;
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(Slave(slave));
        }
    }

    fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, BusError> {
        let (rt, ctx) = self.context()?;
        flatten(bounded(rt, timeout, ctx.read_coils(address, count)))
    }

    fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        timeout: Duration,
    ) -> Result<(), BusError> {
        let (rt, ctx) = self.context()?;
        flatten(bounded(rt, timeout, ctx.write_multiple_coils(address, bits)))
    }

    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, BusError> {
        let (rt, ctx) = self.context()?;
        flatten(bounded(rt, timeout, ctx.read_input_registers(address, count)))
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, BusError> {
        let (rt, ctx) = self.context()?;
        flatten(bounded(rt, timeout, ctx.read_holding_registers(address, count)))
    }
}

// ── Error mapping ─────────────────────────────────────────────

/// Run `fut` to completion on `rt`, giving up after `timeout`.
///
/// The timer is created inside `block_on` so it binds to this runtime.
fn bounded<F: Future>(rt: &Runtime, timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
    rt.block_on(async { tokio::time::timeout(timeout, fut).await })
}

/// Unwrap `timeout(..)` around tokio-modbus' nested result.
fn flatten<T>(
    outcome: Result<tokio_modbus::Result<T>, Elapsed>,
) -> Result<T, BusError> {
    match outcome {
        Err(_) => Err(BusError::Timeout),
        Ok(Err(tokio_modbus::Error::Transport(e))) => Err(map_io_error(&e)),
        Ok(Err(e)) => Err(BusError::Io(e.to_string())),
        Ok(Ok(Err(code))) => Err(BusError::Rejected(format!("{code:?}"))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn map_io_error(e: &io::Error) -> BusError {
    use io::ErrorKind;
    match e.kind() {
        ErrorKind::TimedOut => BusError::Timeout,
        ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => BusError::LinkLost(e.to_string()),
        // EIO / ENXIO / ENODEV: the adapter disappeared.
        _ if matches!(e.raw_os_error(), Some(5 | 6 | 19)) => BusError::LinkLost(e.to_string()),
        _ => BusError::Io(e.to_string()),
    }
}

fn classify_open_error(e: &tokio_serial::Error) -> BusError {
    let msg = e.to_string();
    let would_block = matches!(e.kind, tokio_serial::ErrorKind::Io(io::ErrorKind::WouldBlock));
    if would_block || is_busy_message(&msg) {
        debug!("ModbusRtu: open refused, port busy: {}", msg);
        BusError::PortBusy(msg)
    } else {
        BusError::ConnectFailed(msg)
    }
}

fn is_busy_message(msg: &str) -> bool {
    BUSY_MARKERS.iter().any(|m| msg.contains(m))
}
