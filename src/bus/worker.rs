//! The bus worker thread: drains the request queue in arrival order.

use std::sync::Arc;
use std::time::Duration;

use futures_lite::future;
use log::{debug, error, info, warn};

use super::{BusOp, BusReply, Shared, Target};
use crate::app::ports::BusTransport;
use crate::config::BusTiming;
use crate::error::BusError;

pub(super) struct BusWorker {
    transport: Box<dyn BusTransport>,
    timing: BusTiming,
    shared: Arc<Shared>,
}

impl BusWorker {
    pub(super) fn new(transport: Box<dyn BusTransport>, timing: BusTiming, shared: Arc<Shared>) -> Self {
        Self {
            transport,
            timing,
            shared,
        }
    }

    pub(super) fn run(mut self) {
        info!("Bus: worker started");
        loop {
            let request = future::block_on(self.shared.requests.receive());
            // The caller holds the other reference until its wait ends.
            if Arc::strong_count(&request.reply) == 1 && !matches!(request.op, BusOp::Shutdown) {
                debug!("Bus: dropping request, caller already timed out");
                continue;
            }
            let result = match request.op {
                BusOp::Shutdown => {
                    self.close_quietly();
                    request.reply.signal(Ok(BusReply::Done));
                    break;
                }
                BusOp::Connect { port, baud } => self.connect(&port, baud).map(|()| BusReply::Done),
                BusOp::Close => self.close().map(|()| BusReply::Done),
                BusOp::ReadBits {
                    address,
                    count,
                    slave,
                } => self
                    .addressed(slave, Target::Controller, |t, timeout| {
                        t.read_coils(address, count, timeout)
                    })
                    .map(BusReply::Bits),
                BusOp::WriteBits {
                    address,
                    bits,
                    slave,
                } => self
                    .addressed(slave, Target::Controller, |t, timeout| {
                        t.write_coils(address, &bits, timeout)
                    })
                    .map(|()| BusReply::Done),
                BusOp::ReadInputRegisters {
                    address,
                    count,
                    slave,
                } => self
                    .addressed(slave, Target::Sensor, |t, timeout| {
                        t.read_input_registers(address, count, timeout)
                    })
                    .map(BusReply::Words),
                BusOp::ReadHoldingRegisters {
                    address,
                    count,
                    slave,
                } => self
                    .addressed(slave, Target::Controller, |t, timeout| {
                        t.read_holding_registers(address, count, timeout)
                    })
                    .map(BusReply::Words),
            };
            request.reply.signal(result);
        }
        info!("Bus: worker stopped");
    }

    // ── Session lifecycle ─────────────────────────────────────

    fn connect(&mut self, port: &str, baud: u32) -> Result<(), BusError> {
        self.close_quietly();
        std::thread::sleep(self.timing.settle);

        let opened = match self.transport.open(port, baud) {
            Err(BusError::PortBusy(reason)) => {
                warn!(
                    "Bus: {} busy ({}), retrying once in {:?}",
                    port, reason, self.timing.busy_backoff
                );
                std::thread::sleep(self.timing.busy_backoff);
                self.transport.open(port, baud)
            }
            other => other,
        };

        match opened {
            Ok(()) => {
                self.shared.set_port(Some(port.to_owned()));
                info!("Bus: connected to {} @ {} baud", port, baud);
                Ok(())
            }
            Err(e) => {
                error!("Bus: connect to {} failed: {}", port, e);
                Err(e)
            }
        }
    }

    /// Close the transport if open.  The port is forgotten either way; a
    /// transport failure is returned to the caller.
    fn close(&mut self) -> Result<(), BusError> {
        let was_open = self.transport.is_open();
        let result = if was_open {
            self.transport.close()
        } else {
            Ok(())
        };
        if let Some(port) = self.shared.port() {
            info!("Bus: closed {}", port);
        } else if was_open {
            debug!("Bus: closed transport without a recorded port");
        }
        self.shared.set_port(None);
        result
    }

    /// Internal close ahead of a reopen, after link loss or at shutdown.
    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!("Bus: close reported {}", e);
        }
    }

    // ── Addressed operations ──────────────────────────────────

    fn addressed<T>(
        &mut self,
        slave: u8,
        target: Target,
        op: impl FnOnce(&mut dyn BusTransport, Duration) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        if !self.transport.is_open() {
            return Err(BusError::NotConnected);
        }
        let (turnaround, timeout) = match target {
            Target::Controller => (
                self.timing.controller_turnaround,
                self.timing.controller_timeout,
            ),
            Target::Sensor => (self.timing.sensor_turnaround, self.timing.sensor_timeout),
        };

        self.transport.set_slave(slave);
        std::thread::sleep(turnaround);

        let result = op(self.transport.as_mut(), timeout);
        if let Err(e) = &result {
            if e.is_link_loss() {
                error!("Bus: link lost talking to slave {}: {}", slave, e);
                self.close_quietly();
            } else {
                debug!("Bus: slave {} request failed: {}", slave, e);
            }
        }
        result
    }
}
