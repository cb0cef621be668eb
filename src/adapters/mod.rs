//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements          | Connects to                 |
//! |----------------|---------------------|-----------------------------|
//! | `console`      | (driving)           | stdin operator commands     |
//! | `frame_writer` | OutputPort          | BusSession + relay board    |
//! | `json_store`   | SettingsPort        | JSON files in the data dir  |
//! |                | HistoryPort         |                             |
//! |                | StatePort           |                             |
//! |                | ConfigPort          | JSON configuration file     |
//! | `log_sink`     | EventSink           | `log` facade                |
//! | `modbus_rtu`   | BusTransport        | tokio-modbus over a serial  |
//! | `relay_board`  | RelayBoard          | sysfs GPIO (embedded-hal)   |
//! | `time`         | Clock               | local wall clock            |

pub mod console;
pub mod frame_writer;
pub mod json_store;
pub mod log_sink;
#[cfg(feature = "modbus-rtu")]
pub mod modbus_rtu;
pub mod relay_board;
pub mod time;
