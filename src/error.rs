//! Error types for the irrigation controller, one enum per concern.
//!
//! Variants carry short owned messages from the transport or store so they
//! can be logged after the worker thread that produced them has moved on.

use core::fmt;

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No session is open.
    NotConnected,
    /// The serial port could not be opened.
    ConnectFailed(String),
    /// The port is locked by another process or not yet released.
    PortBusy(String),
    /// The slave did not answer within the operation timeout.
    Timeout,
    /// The slave answered with a Modbus exception.
    Rejected(String),
    /// Any other transport-level failure.
    Io(String),
    /// The link dropped underneath an open session.
    LinkLost(String),
    /// The bus worker thread is no longer running.
    WorkerGone,
}

impl BusError {
    /// Whether this failure means the session is no longer usable.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::LinkLost(_) | Self::WorkerGone)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
            Self::PortBusy(msg) => write!(f, "port busy: {msg}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Rejected(msg) => write!(f, "rejected by slave: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::LinkLost(msg) => write!(f, "link lost: {msg}"),
            Self::WorkerGone => write!(f, "bus worker stopped"),
        }
    }
}

impl std::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No zone is enabled, so there is nothing to water.
    NoEnabledZones,
    /// The tank pump start level is not below its stop level.
    InvertedThresholds,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// No stored configuration exists.
    NotFound,
    /// Stored configuration could not be parsed.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEnabledZones => write!(f, "no enabled zones"),
            Self::InvertedThresholds => write!(f, "tank start level must be below stop level"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The backing store could not be read or written.
    Unavailable(String),
    /// A stored document failed to deserialize.
    Corrupted(String),
    /// The addressed row does not exist.
    NotFound,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Corrupted(msg) => write!(f, "stored data corrupted: {msg}"),
            Self::NotFound => write!(f, "row not found"),
        }
    }
}

impl std::error::Error for PersistenceError {}
