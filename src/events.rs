// ABOUTME: Broadcast event surface of the client facade
// ABOUTME: One enum per notification kind instead of a stringly-typed emitter

use std::time::SystemTime;

use crate::sms::types::{DeliveryDetail, OutgoingPart, SmsStatus};

/// A complete incoming message, single-part or fully reassembled.
#[derive(Debug, Clone)]
pub struct IncomingSms {
    pub number: String,
    pub text: String,
    pub date: SystemTime,
}

/// Aggregate delivery notification for one logical outgoing message.
#[derive(Debug, Clone)]
pub struct DeliveryNotice {
    /// Message references of every part of the logical message.
    pub composite_id: Vec<u8>,
    pub status: SmsStatus,
    /// Raw detail of the triggering report when the aggregate is not
    /// `Delivered`.
    pub detail: Option<DeliveryDetail>,
    /// Per-part outcomes, populated once every part reports `Delivered`.
    pub parts: Vec<OutgoingPart>,
}

/// Notifications published by the client.
#[derive(Debug, Clone)]
pub enum Event {
    /// Init reached the Initialized state: handshake and PIN handling done.
    DeviceReady,
    /// The registration gate opened.
    NetworkReady,
    IncomingSms(IncomingSms),
    /// A logical message finished transmission; carries its composite id.
    SmsSent(Vec<u8>),
    DeliveryReport(DeliveryNotice),
    /// Unsolicited line not claimed by any subsystem.
    Input(String),
    Error(String),
}
