//! Bus session worker against a scripted transport.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dripctl::adapters::frame_writer::FrameWriter;
use dripctl::app::ports::{OutputPort, RelayBoard};
use dripctl::bus::BusSession;
use dripctl::config::BusTiming;
use dripctl::error::BusError;
use dripctl::output::FrameLayout;

use crate::mock_hw::{MockTransport, TransportCall, TransportState, fast_timing, measured_timing};

const PORT: &str = "/dev/ttyUSB0";

fn session() -> (BusSession, Arc<Mutex<TransportState>>) {
    session_with(fast_timing())
}

fn session_with(timing: BusTiming) -> (BusSession, Arc<Mutex<TransportState>>) {
    let (transport, state) = MockTransport::new();
    let bus = BusSession::spawn(Box::new(transport), timing).unwrap();
    (bus, state)
}

#[test]
fn operations_on_a_closed_session_fail() {
    let (bus, _) = session();
    assert!(!bus.is_connected());
    assert_eq!(bus.write_bits(1032, &[true], 1), Err(BusError::NotConnected));
    assert_eq!(bus.read_bits(1032, 16, 1), Err(BusError::NotConnected));
    assert_eq!(
        bus.read_input_registers(0, 1, 2),
        Err(BusError::NotConnected)
    );
}

#[test]
fn addressed_write_selects_the_slave_first() {
    let (bus, state) = session();
    bus.connect(PORT, 9600).unwrap();
    assert_eq!(bus.current_port().as_deref(), Some(PORT));

    bus.write_bits(1032, &[true, false, true], 1).unwrap();

    let calls = state.lock().unwrap().calls.clone();
    assert_eq!(
        calls,
        vec![
            TransportCall::Open {
                port: PORT.into(),
                baud: 9600
            },
            TransportCall::SetSlave(1),
            TransportCall::WriteCoils {
                address: 1032,
                bits: vec![true, false, true]
            },
        ]
    );
}

#[test]
fn sensor_reads_address_the_sensor_slave() {
    let (bus, state) = session();
    state.lock().unwrap().input_registers.insert(0, 512);
    bus.connect(PORT, 9600).unwrap();

    assert_eq!(bus.read_input_registers(0, 1, 2).unwrap(), vec![512]);

    let calls = state.lock().unwrap().calls.clone();
    let n = calls.len();
    assert_eq!(calls[n - 2], TransportCall::SetSlave(2));
    assert_eq!(
        calls[n - 1],
        TransportCall::ReadInputRegisters {
            address: 0,
            count: 1
        }
    );
}

#[test]
fn coil_read_back_matches_written_bits() {
    let (bus, _) = session();
    bus.connect(PORT, 9600).unwrap();
    bus.write_bits(1032, &[true, false, false, true], 1).unwrap();
    assert_eq!(
        bus.read_bits(1032, 4, 1).unwrap(),
        vec![true, false, false, true]
    );
}

#[test]
fn holding_registers_come_from_the_controller() {
    let (bus, state) = session();
    state.lock().unwrap().holding_registers.insert(2001, 77);
    bus.connect(PORT, 9600).unwrap();

    assert_eq!(bus.read_holding_registers(2000, 3, 1).unwrap(), vec![0, 77, 0]);
    let calls = state.lock().unwrap().calls.clone();
    let n = calls.len();
    assert_eq!(calls[n - 2], TransportCall::SetSlave(1));
    assert_eq!(
        calls[n - 1],
        TransportCall::ReadHoldingRegisters {
            address: 2000,
            count: 3
        }
    );
}

// ── Pacing ────────────────────────────────────────────────────

#[test]
fn turnaround_follows_the_target_kind() {
    let timing = measured_timing();
    let (bus, state) = session_with(timing);
    bus.connect(PORT, 9600).unwrap();

    bus.write_bits(1032, &[true], 1).unwrap();
    bus.read_input_registers(0, 1, 2).unwrap();

    let s = state.lock().unwrap();
    let controller = s
        .gap(
            |c| *c == TransportCall::SetSlave(1),
            |c| matches!(c, TransportCall::WriteCoils { .. }),
        )
        .unwrap();
    let sensor = s
        .gap(
            |c| *c == TransportCall::SetSlave(2),
            |c| matches!(c, TransportCall::ReadInputRegisters { .. }),
        )
        .unwrap();
    assert!(controller >= timing.controller_turnaround, "controller gap {controller:?}");
    assert!(sensor >= timing.sensor_turnaround, "sensor gap {sensor:?}");
    assert!(
        sensor < timing.controller_turnaround,
        "sensor used the controller turnaround: {sensor:?}"
    );
}

#[test]
fn reconnect_waits_the_settle_delay_after_closing() {
    let timing = measured_timing();
    let (bus, state) = session_with(timing);
    bus.connect(PORT, 9600).unwrap();
    bus.connect(PORT, 9600).unwrap();

    let gap = state
        .lock()
        .unwrap()
        .gap(
            |c| *c == TransportCall::Close,
            |c| matches!(c, TransportCall::Open { .. }),
        )
        .unwrap();
    assert!(gap >= timing.settle, "close to open took {gap:?}");
}

#[test]
fn busy_retry_waits_the_backoff() {
    let timing = measured_timing();
    let (bus, state) = session_with(timing);
    state.lock().unwrap().busy_opens = 1;
    bus.connect(PORT, 9600).unwrap();

    let is_open = |c: &TransportCall| matches!(c, TransportCall::Open { .. });
    let gap = state.lock().unwrap().gap(is_open, is_open).unwrap();
    assert!(gap >= timing.busy_backoff, "retry after {gap:?}");
}

#[test]
fn rapid_connects_close_before_reopening() {
    let (bus, state) = session();
    state.lock().unwrap().open_delay = Duration::from_millis(30);
    let bus = Arc::new(bus);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.connect(PORT, 9600))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let s = state.lock().unwrap();
    assert!(!s.double_open, "two sessions were open at once");
    assert_eq!(
        s.calls,
        vec![
            TransportCall::Open {
                port: PORT.into(),
                baud: 9600
            },
            TransportCall::Close,
            TransportCall::Open {
                port: PORT.into(),
                baud: 9600
            },
        ]
    );
    assert!(bus.is_connected());
}

#[test]
fn busy_port_is_retried_exactly_once() {
    let (bus, state) = session();
    state.lock().unwrap().busy_opens = 1;
    bus.connect(PORT, 9600).unwrap();
    assert_eq!(state.lock().unwrap().calls.len(), 2);

    let (bus, state) = session();
    state.lock().unwrap().busy_opens = 2;
    assert!(matches!(bus.connect(PORT, 9600), Err(BusError::PortBusy(_))));
    assert_eq!(state.lock().unwrap().calls.len(), 2);
    assert!(!bus.is_connected());
}

#[test]
fn other_open_failures_are_not_retried() {
    let (bus, state) = session();
    state.lock().unwrap().open_error = Some(BusError::ConnectFailed("no such device".into()));
    assert!(matches!(
        bus.connect(PORT, 9600),
        Err(BusError::ConnectFailed(_))
    ));
    assert_eq!(state.lock().unwrap().calls.len(), 1);
}

#[test]
fn lost_link_closes_the_session() {
    let (bus, state) = session();
    bus.connect(PORT, 9600).unwrap();
    state.lock().unwrap().write_error = Some(BusError::LinkLost("EIO".into()));

    assert!(matches!(
        bus.write_bits(1032, &[true], 1),
        Err(BusError::LinkLost(_))
    ));
    assert!(!bus.is_connected());
    assert_eq!(bus.write_bits(1032, &[true], 1), Err(BusError::NotConnected));
}

#[test]
fn close_forgets_the_port() {
    let (bus, state) = session();
    bus.connect(PORT, 9600).unwrap();
    bus.close().unwrap();
    assert!(!bus.is_connected());
    assert_eq!(bus.current_port(), None);
    assert!(!state.lock().unwrap().open);
    // Closing again is harmless.
    bus.close().unwrap();
}

#[test]
fn close_failure_reaches_the_caller() {
    let (bus, state) = session();
    bus.connect(PORT, 9600).unwrap();
    state.lock().unwrap().close_error = Some(BusError::Io("tcdrain failed".into()));

    assert_eq!(bus.close(), Err(BusError::Io("tcdrain failed".into())));
    assert!(!bus.is_connected(), "port is forgotten even when close fails");
    assert_eq!(bus.current_port(), None);
    bus.close().unwrap();
}

#[test]
fn a_stuck_transport_surfaces_as_timeout() {
    let (bus, state) = session();
    state.lock().unwrap().open_delay = Duration::from_millis(1500);
    assert_eq!(bus.connect(PORT, 9600), Err(BusError::Timeout));
}

#[test]
fn queued_request_is_dropped_once_its_caller_gives_up() {
    let (bus, state) = session();
    let bus = Arc::new(bus);
    bus.connect(PORT, 9600).unwrap();
    state.lock().unwrap().open_delay = Duration::from_millis(1500);

    // A slow reopen holds the worker past the write's reply bound.
    let reconnect = {
        let bus = Arc::clone(&bus);
        thread::spawn(move || bus.connect(PORT, 9600))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bus.write_bits(1032, &[true], 1), Err(BusError::Timeout));
    assert_eq!(reconnect.join().unwrap(), Err(BusError::Timeout));

    // The reopen was already running, so it still completes.
    thread::sleep(Duration::from_millis(600));
    assert!(bus.is_connected());
    let s = state.lock().unwrap();
    assert!(
        !s.calls
            .iter()
            .any(|c| matches!(c, TransportCall::WriteCoils { .. })),
        "abandoned write never reached the line"
    );
}

// ── FrameWriter ───────────────────────────────────────────────

#[derive(Clone, Default)]
struct SharedBoard(Arc<Mutex<Vec<Vec<bool>>>>);

impl RelayBoard for SharedBoard {
    fn apply(&mut self, bits: &[bool]) {
        self.0.lock().unwrap().push(bits.to_vec());
    }
}

#[test]
fn frame_writer_feeds_relay_board_even_when_closed() {
    let (bus, state) = session();
    let bus = Arc::new(bus);
    let board = SharedBoard::default();
    let writer = FrameWriter::new(Arc::clone(&bus), 1032, 1).with_relay_board(Box::new(board.clone()));

    let frame = FrameLayout::default().zone_on(2);
    assert_eq!(writer.apply(&frame), Err(BusError::NotConnected));
    assert_eq!(
        board.0.lock().unwrap().last().cloned(),
        Some(vec![true, false, true, false, false, false, false, false])
    );

    bus.connect(PORT, 9600).unwrap();
    writer.apply(&frame).unwrap();
    let s = state.lock().unwrap();
    assert!(s.calls.contains(&TransportCall::WriteCoils {
        address: 1032,
        bits: frame.bits().to_vec()
    }));
    assert_eq!(board.0.lock().unwrap().len(), 2);
}
