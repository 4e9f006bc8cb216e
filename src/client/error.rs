// ABOUTME: Error types for modem client operations across transport, protocol and session layers
// ABOUTME: Provides structured error reporting with automatic conversion from I/O and codec errors

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Error type for modem client operations.
///
/// Covers command execution, the SMS session layer and client lifecycle
/// management.
#[derive(Debug, Error)]
pub enum Sim800Error {
    /// I/O error on the serial transport (open, write, stream failure)
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The modem answered a command with its error terminator
    #[error("Modem error: {0}")]
    Protocol(String),

    /// A command deadline elapsed without a terminal response
    #[error("Operation timeout")]
    Timeout,

    /// An unusable command rule set, or a missing required setting such as
    /// the SIM PIN
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The SIM demands a PUK; unlocking needs manual intervention
    #[error("SIM is PUK-locked")]
    SimLocked,

    /// An operation needs network registration before the gate has opened
    #[error("Not registered on the network")]
    NetworkNotReady,

    /// PDU encode or decode failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Client not in a usable state for the operation
    #[error("Invalid client state: {0}")]
    InvalidState(String),

    /// The command engine has shut down
    #[error("Client closed")]
    Closed,
}

/// Result type alias for modem operations
pub type Sim800Result<T> = Result<T, Sim800Error>;
