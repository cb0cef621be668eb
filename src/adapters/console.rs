//! Line-oriented operator console.
//!
//! A reader thread parses stdin lines into [`ConsoleCommand`]s and pushes
//! them into a bounded queue; the poll loop drains the queue once per tick.
//!
//! ```text
//!   stdin ──▶ parse_line ──▶ CommandQueue (embassy Channel) ──▶ poll loop
//! ```
//!
//! Grammar (whitespace separated, case-insensitive verbs):
//!
//! | Line                       | Command                         |
//! |----------------------------|---------------------------------|
//! | `start`                    | start-once                      |
//! | `stop`                     | stop                            |
//! | `ack [start\|stop]`        | acknowledge (any when omitted)  |
//! | `connect [port] [baud]`    | reconnect (config defaults)     |
//! | `disconnect`               | close the bus                   |
//! | `write <bits>`             | manual write, e.g. `write 1010` |
//! | `read`                     | read the coil block back        |
//! | `regs`                     | read the holding-register block |
//! | `history [n]`              | last `n` history rows (10)      |
//! | `status`                   | print a status line             |
//! | `quit`                     | leave the poll loop             |

use std::io::BufRead;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future::block_on;
use log::{info, warn};

use crate::app::commands::{AppCommand, PendingCommand};
use crate::output::{MAX_FRAME_WIDTH, OutputFrame};

const QUEUE_DEPTH: usize = 8;

const DEFAULT_HISTORY_ROWS: usize = 10;

/// Queue between the console thread and the poll loop.
pub type CommandQueue = Channel<CriticalSectionRawMutex, ConsoleCommand, QUEUE_DEPTH>;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    App(AppCommand),
    /// `connect` with fields left to the configured defaults.
    Connect {
        port: Option<String>,
        baud: Option<u32>,
    },
    ReadOutputs,
    ReadRegisters,
    History {
        limit: usize,
    },
    Status,
    Quit,
}

/// Parse one console line.  Blank lines are `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "start" => ConsoleCommand::App(AppCommand::StartOnce),
        "stop" => ConsoleCommand::App(AppCommand::Stop),
        "ack" => {
            let target = match words.next().map(str::to_ascii_lowercase).as_deref() {
                None => None,
                Some("start") => Some(PendingCommand::StartOnce),
                Some("stop") => Some(PendingCommand::Stop),
                Some(other) => return Err(format!("unknown command to ack: {other}")),
            };
            ConsoleCommand::App(AppCommand::Acknowledge(target))
        }
        "connect" => {
            let port = words.next().map(str::to_owned);
            let baud = match words.next() {
                Some(b) => Some(b.parse().map_err(|_| format!("bad baud rate: {b}"))?),
                None => None,
            };
            ConsoleCommand::Connect { port, baud }
        }
        "disconnect" => ConsoleCommand::App(AppCommand::Disconnect),
        "write" => {
            let bits = words.next().ok_or("write needs a bit string")?;
            ConsoleCommand::App(AppCommand::WriteOutputs(parse_bits(bits)?))
        }
        "read" => ConsoleCommand::ReadOutputs,
        "regs" => ConsoleCommand::ReadRegisters,
        "history" => {
            let limit = match words.next() {
                Some(n) => n.parse().map_err(|_| format!("bad row count: {n}"))?,
                None => DEFAULT_HISTORY_ROWS,
            };
            ConsoleCommand::History { limit }
        }
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {other}")),
    };

    if words.next().is_some() {
        return Err(format!("trailing arguments after '{verb}'"));
    }
    Ok(Some(cmd))
}

/// `"1010"` as a frame, index 0 first.
fn parse_bits(raw: &str) -> Result<OutputFrame, String> {
    if raw.len() > MAX_FRAME_WIDTH {
        return Err(format!("at most {MAX_FRAME_WIDTH} bits"));
    }
    let bits = raw
        .chars()
        .map(|c| match c {
            '1' => Ok(true),
            '0' => Ok(false),
            other => Err(format!("not a bit: '{other}'")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(OutputFrame::from_bits(&bits))
}

/// Read `input` line by line until EOF or `quit`, queueing every command.
pub fn run_reader(input: impl BufRead, queue: &Arc<CommandQueue>) {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Console: read failed: {}", e);
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(cmd)) => {
                let quit = cmd == ConsoleCommand::Quit;
                block_on(queue.send(cmd));
                if quit {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Console: {}", e),
        }
    }
    info!("Console: input closed");
}
