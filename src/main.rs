//! dripctl daemon: main entry point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ModbusRtuTransport  FrameWriter     JsonStore     SystemClock │
//! │  (BusTransport)      (OutputPort)    (Settings/    (Clock)     │
//! │  RelayBoardDriver    LogEventSink     History/State)           │
//! │  (RelayBoard)        (EventSink)     Console (operator input)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (domain)                       │    │
//! │  │  Coordinator · ScheduleEvaluator · TankRegulator       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  BusSession worker thread · SequenceController thread          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use dripctl::adapters::console::{self, CommandQueue, ConsoleCommand};
use dripctl::adapters::frame_writer::FrameWriter;
use dripctl::adapters::json_store::{JsonConfigFile, JsonStore};
use dripctl::adapters::log_sink::LogEventSink;
use dripctl::adapters::relay_board::RelayBoardDriver;
use dripctl::adapters::time::SystemClock;
use dripctl::app::commands::AppCommand;
use dripctl::app::ports::{Clock, ConfigPort, EventSink, Ports};
use dripctl::app::service::{self, AppService};
use dripctl::bus::BusSession;
use dripctl::config::SystemConfig;

/// Status line cadence, in poll ticks.
const STATUS_EVERY_TICKS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "dripctl", version, about = "Drip-irrigation device control daemon")]
struct Cli {
    /// JSON configuration file (defaults are used when it does not exist)
    #[arg(short, long, default_value = "dripctl.json")]
    config: PathBuf,

    /// Override the data directory from the configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the serial device from the configuration
    #[arg(long)]
    port: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// sysfs GPIO root for the relay board
    #[arg(long, default_value = "/sys/class/gpio")]
    gpio_root: PathBuf,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .format_target(false)
        .init();

    info!("dripctl v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Configuration ──────────────────────────────────────
    let mut config = JsonConfigFile::new(&cli.config)
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = cli.port {
        config.bus_port = port;
    }
    config.validate().context("invalid configuration")?;

    // ── 2. Adapters ───────────────────────────────────────────
    let store = Arc::new(
        JsonStore::open(&config.data_dir)
            .with_context(|| format!("opening data dir {}", config.data_dir.display()))?,
    );
    let bus = Arc::new(open_bus(&config)?);

    let mut writer = FrameWriter::new(
        Arc::clone(&bus),
        config.frame.base_address,
        config.controller_slave,
    );
    if config.relay_enabled {
        match RelayBoardDriver::open_sysfs(&cli.gpio_root, &config.relay_pins, config.relay_active_low)
        {
            Ok(board) => writer = writer.with_relay_board(Box::new(board)),
            Err(e) => warn!("Relay board unavailable ({}), continuing with the bus only", e),
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink::new());
    let ports = Ports {
        outputs: Arc::new(writer),
        settings: Arc::clone(&store) as _,
        history: Arc::clone(&store) as _,
        state: Arc::clone(&store) as _,
        clock: Arc::clone(&clock),
        events: Arc::clone(&events),
    };

    // ── 3. Service + boot recovery ────────────────────────────
    let mut app = AppService::new(config.clone(), Arc::clone(&bus), ports);
    app.recover_after_restart();

    {
        let bus = Arc::clone(&bus);
        let config = config.clone();
        let clock = Arc::clone(&clock);
        let events = Arc::clone(&events);
        thread::Builder::new()
            .name("boot-connect".into())
            .spawn(move || {
                if let Err(e) =
                    service::boot_auto_connect(&bus, &config, clock.as_ref(), events.as_ref())
                {
                    error!("Boot connect failed: {}", e);
                }
            })
            .context("spawning boot-connect thread")?;
    }

    // ── 4. Operator console ───────────────────────────────────
    let queue = Arc::new(CommandQueue::new());
    if !cli.no_console {
        let queue = Arc::clone(&queue);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || console::run_reader(io::stdin().lock(), &queue))
            .context("spawning console thread")?;
    }

    info!("System ready. Entering poll loop.");

    // ── 5. Poll loop ──────────────────────────────────────────
    let mut tick: u64 = 0;
    'poll: loop {
        while let Ok(cmd) = queue.try_receive() {
            if !dispatch(&mut app, &config, cmd) {
                break 'poll;
            }
        }

        app.tick();

        tick += 1;
        if tick % STATUS_EVERY_TICKS == 0 {
            info!("Status: {}", app.status());
        }
        thread::sleep(config.poll_interval());
    }

    info!("Shutting down");
    app.shutdown();
    Ok(())
}

#[cfg(feature = "modbus-rtu")]
fn open_bus(config: &SystemConfig) -> Result<BusSession> {
    use dripctl::adapters::modbus_rtu::ModbusRtuTransport;

    let transport = ModbusRtuTransport::new().context("starting Modbus RTU runtime")?;
    BusSession::spawn(Box::new(transport), config.bus_timing()).context("starting bus worker")
}

#[cfg(not(feature = "modbus-rtu"))]
fn open_bus(_config: &SystemConfig) -> Result<BusSession> {
    anyhow::bail!("built without the `modbus-rtu` feature; no serial transport available")
}

/// Carry out one console command.  Returns `false` on quit.
fn dispatch(app: &mut AppService, config: &SystemConfig, cmd: ConsoleCommand) -> bool {
    match cmd {
        ConsoleCommand::App(cmd) => {
            let label = format!("{cmd:?}");
            if !app.handle_command(cmd) {
                warn!("Console: {} not carried out", label);
            }
        }
        ConsoleCommand::Connect { port, baud } => {
            let cmd = AppCommand::Connect {
                port: port.unwrap_or_else(|| config.bus_port.clone()),
                baud: baud.unwrap_or(config.bus_baud),
            };
            app.handle_command(cmd);
        }
        ConsoleCommand::ReadOutputs => match app.read_outputs() {
            Ok((pump, valves)) => {
                let bits: String = valves.iter().map(|v| if *v { '1' } else { '0' }).collect();
                info!("Outputs: pump={} valves={}", if pump { "on" } else { "off" }, bits);
            }
            Err(e) => warn!("Outputs: read failed: {}", e),
        },
        ConsoleCommand::ReadRegisters => match app.read_registers() {
            Ok(words) => info!("Registers @{}: {:?}", config.register_start, words),
            Err(e) => warn!("Registers: read failed: {}", e),
        },
        ConsoleCommand::History { limit } => match app.recent_history(limit) {
            Ok(rows) => {
                for row in rows {
                    let ended = row
                        .ended_at
                        .map_or_else(|| "running".to_owned(), |t| t.format("%H:%M:%S").to_string());
                    info!(
                        "History #{}: zone {} {} -> {}",
                        row.id,
                        row.zone_id,
                        row.started_at.format("%Y-%m-%d %H:%M:%S"),
                        ended
                    );
                }
            }
            Err(e) => warn!("History: unreadable: {}", e),
        },
        ConsoleCommand::Status => info!("Status: {}", app.status()),
        ConsoleCommand::Quit => return false,
    }
    true
}
