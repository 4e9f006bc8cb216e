// ABOUTME: SMS PDU codec collaborator contract consumed by the session layer
// ABOUTME: Encoding splits text into transport parts, decoding classifies received frames

use std::time::SystemTime;

use thiserror::Error;

/// Error type for the PDU codec seam.
///
/// Decode failures on unsolicited frames are isolated per frame: the session
/// logs them and discards the frame rather than propagating.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("PDU encode failed: {0}")]
    Encode(String),
    #[error("PDU decode failed: {0}")]
    Decode(String),
}

/// One transport part of an outgoing message, ready for `AT+CMGS`.
#[derive(Debug, Clone)]
pub struct PduPart {
    /// TPDU length announced to the modem before the payload is written.
    pub tpdu_length: usize,
    /// Hex payload written in input mode, terminated by Ctrl-Z.
    pub payload: String,
}

/// Concatenation header of a multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHeader {
    /// Carrier-assigned correlation id shared by all segments of one message.
    pub reference: u16,
    /// Declared total segment count.
    pub total: u8,
    /// This segment's position, 1-based.
    pub sequence: u8,
}

/// A message delivered to us by the network.
#[derive(Debug, Clone)]
pub struct DeliverPdu {
    pub sender: String,
    pub text: String,
    pub timestamp: Option<SystemTime>,
    pub multipart: Option<MultipartHeader>,
}

/// A message we previously submitted, as stored on the SIM.
#[derive(Debug, Clone)]
pub struct SubmitPdu {
    pub recipient: String,
    pub text: String,
    pub multipart: Option<MultipartHeader>,
}

/// A delivery status report, keyed by the modem-assigned message reference.
#[derive(Debug, Clone)]
pub struct StatusReportPdu {
    pub reference: u8,
    /// Raw TP-Status code; mapped to a delivery detail by the session layer.
    pub status: u8,
    pub timestamp: Option<SystemTime>,
}

/// A decoded PDU frame.
#[derive(Debug, Clone)]
pub enum Pdu {
    Deliver(DeliverPdu),
    Submit(SubmitPdu),
    StatusReport(StatusReportPdu),
}

/// The PDU codec collaborator.
///
/// The session layer is codec-agnostic: any implementation that can split
/// `(number, text, delivery_report)` into ordered transport parts and
/// classify raw frames can drive it.
pub trait PduCodec: Send + Sync + 'static {
    fn encode(
        &self,
        number: &str,
        text: &str,
        delivery_report: bool,
    ) -> Result<Vec<PduPart>, CodecError>;

    fn decode(&self, raw: &str) -> Result<Pdu, CodecError>;
}
