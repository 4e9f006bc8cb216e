//! Async driver for SIM800-class GSM modems speaking the AT command set.
//!
//! The crate is organized in three layers:
//!
//! * the command engine runs [`CommandSpec`]s one at a time over a
//!   line-oriented serial transport, matching response lines to the command
//!   in flight
//! * the SMS session layer spools outgoing messages part by part, reassembles
//!   incoming multipart messages, correlates delivery reports and gates
//!   transmission on network registration
//! * [`Sim800Client`] is the facade: it wires the layers together and drives
//!   the deterministic startup sequence
//!
//! PDU encoding is a seam: supply any [`PduCodec`] implementation and the
//! session layer stays byte-format agnostic.

pub mod client;
pub mod codec;
pub mod command;
pub mod commands;
mod engine;
pub mod events;
pub mod network;
pub mod sms;
pub mod transport;


pub use client::{ClientState, Sim800Client, Sim800Config, Sim800Error, Sim800Result};
pub use codec::{
    CodecError, DeliverPdu, MultipartHeader, Pdu, PduCodec, PduPart, StatusReportPdu, SubmitPdu,
};
pub use command::{CommandOutcome, CommandSpec, LineMatcher};
pub use events::{DeliveryNotice, Event, IncomingSms};
pub use network::RegistrationStatus;
pub use sms::types::{DeliveryDetail, OutgoingPart, OutgoingSms, SmsStatus};
pub use transport::{IoLink, SerialEvent, SerialLink};
