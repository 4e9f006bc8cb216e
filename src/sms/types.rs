// ABOUTME: Outgoing SMS record model: per-part tracking, status taxonomy and delivery detail codes
// ABOUTME: Holds the record-update rule applied as each transport part is accepted by the modem

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use num_enum::TryFromPrimitive;

/// Aggregate status of a logical outgoing message, or of one of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsStatus {
    Pending,
    Sending,
    Sent,
    Error,
    Delivered,
    DeliveryFailure,
    DeliveryDelayed,
    DeliveryUnknown,
}

/// GSM 03.40 TP-Status codes carried by delivery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum DeliveryDetail {
    Delivered = 0,
    Unknown = 1,
    Replaced = 2,
    Congestion = 32,
    SmeBusy = 33,
    NoResponse = 34,
    ServiceRejected = 35,
    QualityOfServiceNotAvailable = 36,
    ErrorInSme = 37,
    RemoteProcedureError = 64,
    IncompatibleDestination = 65,
    ConnectionRejectedBySme = 66,
    NotObtainable = 67,
    QualityOfServiceUnavailable = 68,
    NoInterworkingAvailable = 69,
    ValidityPeriodExpired = 70,
    DeletedByOriginatingSme = 71,
    DeletedByScAdministration = 72,
    MessageDoesNotExist = 73,
    PermanentCongestion = 96,
    PermanentSmeBusy = 97,
    PermanentNoResponse = 98,
    PermanentServiceRejected = 99,
    PermanentQualityOfServiceNotAvailable = 100,
    PermanentErrorInSme = 101,
}

impl DeliveryDetail {
    /// Collapse the raw code into the aggregate status taxonomy: temporary
    /// conditions map to `DeliveryDelayed`, everything permanent to
    /// `DeliveryFailure`.
    pub fn sms_status(self) -> SmsStatus {
        use DeliveryDetail::*;
        match self {
            Delivered => SmsStatus::Delivered,
            Unknown => SmsStatus::DeliveryUnknown,
            Congestion | SmeBusy | NoResponse | ServiceRejected
            | QualityOfServiceNotAvailable | ErrorInSme => SmsStatus::DeliveryDelayed,
            _ => SmsStatus::DeliveryFailure,
        }
    }

    /// Human-readable description of the condition.
    pub fn description(self) -> &'static str {
        use DeliveryDetail::*;
        match self {
            Delivered => "Short message received by the SME",
            Unknown => "Forwarded by the SC but delivery could not be confirmed",
            Replaced => "Short message replaced by the SC",
            Congestion => "Congestion",
            SmeBusy => "SME busy",
            NoResponse => "No response from the SME",
            ServiceRejected => "Service rejected",
            QualityOfServiceNotAvailable => "Quality of service not available",
            ErrorInSme => "Error in SME",
            RemoteProcedureError => "Remote procedure error",
            IncompatibleDestination => "Incompatible destination",
            ConnectionRejectedBySme => "Connection rejected by SME",
            NotObtainable => "Not obtainable",
            QualityOfServiceUnavailable => "Quality of service not available (permanent)",
            NoInterworkingAvailable => "No interworking available",
            ValidityPeriodExpired => "SM validity period expired",
            DeletedByOriginatingSme => "SM deleted by originating SME",
            DeletedByScAdministration => "SM deleted by SC administration",
            MessageDoesNotExist => "SM does not exist",
            PermanentCongestion => "Permanent congestion",
            PermanentSmeBusy => "Permanent SME busy",
            PermanentNoResponse => "Permanent no response from the SME",
            PermanentServiceRejected => "Permanent service rejected",
            PermanentQualityOfServiceNotAvailable => {
                "Permanent quality of service not available"
            }
            PermanentErrorInSme => "Permanent error in SME",
        }
    }
}

/// One transport part of an outgoing message, keyed by the modem-assigned
/// message reference.
#[derive(Debug, Clone)]
pub struct OutgoingPart {
    pub reference: u8,
    pub status: SmsStatus,
    pub detail: Option<DeliveryDetail>,
    pub delivery_date: Option<SystemTime>,
}

/// Audit record for one logical outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingSms {
    /// References of every part transmitted so far, in send order.
    pub composite_id: Vec<u8>,
    pub number: String,
    pub text: String,
    /// Declared part count from the codec.
    pub parts_total: usize,
    pub delivery_report: bool,
    pub status: SmsStatus,
    pub parts: Vec<OutgoingPart>,
}

/// A parsed delivery report, correlated against the outbox by reference.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub reference: u8,
    pub status: SmsStatus,
    pub detail: DeliveryDetail,
    pub date: SystemTime,
}

/// The outbox spooler, shared between the send worker and the delivery
/// watcher. Records are retained for audit; they are never evicted.
#[derive(Clone, Default)]
pub(crate) struct SharedOutbox(Arc<Mutex<Vec<OutgoingSms>>>);

impl SharedOutbox {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<OutgoingSms>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Vec<OutgoingSms> {
        self.lock().clone()
    }
}

/// Record-update rule applied after the modem accepts one transport part.
///
/// A single-part message is recorded as `Sent` outright. The first part of a
/// multipart message opens a `Sending` record; later parts attach to the
/// record owning any reference of the growing composite id, and the record
/// flips to `Sent` once the declared count is reached with every part sent.
pub(crate) fn record_part_sent(
    records: &mut Vec<OutgoingSms>,
    composite_id: &[u8],
    reference: u8,
    parts_total: usize,
    number: &str,
    text: &str,
    delivery_report: bool,
) {
    let part = OutgoingPart {
        reference,
        status: SmsStatus::Sent,
        detail: None,
        delivery_date: None,
    };

    if parts_total == 1 {
        records.push(OutgoingSms {
            composite_id: composite_id.to_vec(),
            number: number.to_string(),
            text: text.to_string(),
            parts_total,
            delivery_report,
            status: SmsStatus::Sent,
            parts: vec![part],
        });
        return;
    }

    if let Some(existing) = records
        .iter_mut()
        .find(|sms| sms.parts.iter().any(|p| composite_id.contains(&p.reference)))
    {
        existing.composite_id.push(reference);
        existing.parts.push(part);
        if existing.parts.len() == existing.parts_total
            && existing.parts.iter().all(|p| p.status == SmsStatus::Sent)
        {
            existing.status = SmsStatus::Sent;
        }
    } else {
        records.push(OutgoingSms {
            composite_id: composite_id.to_vec(),
            number: number.to_string(),
            text: text.to_string(),
            parts_total,
            delivery_report,
            status: SmsStatus::Sending,
            parts: vec![part],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_record_is_sent_immediately() {
        let mut records = Vec::new();
        record_part_sent(&mut records, &[42], 42, 1, "+15551234567", "Hello", false);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SmsStatus::Sent);
        assert_eq!(records[0].parts.len(), 1);
        assert_eq!(records[0].parts[0].reference, 42);
    }

    #[test]
    fn multipart_record_flips_to_sent_after_last_part() {
        let mut records = Vec::new();
        record_part_sent(&mut records, &[10], 10, 2, "+15551234567", "long", true);
        assert_eq!(records[0].status, SmsStatus::Sending);

        record_part_sent(&mut records, &[10, 11], 11, 2, "+15551234567", "long", true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SmsStatus::Sent);
        assert_eq!(records[0].composite_id, vec![10, 11]);
        assert_eq!(records[0].parts.len(), 2);
    }

    #[test]
    fn concurrent_messages_keep_separate_records() {
        let mut records = Vec::new();
        record_part_sent(&mut records, &[1], 1, 2, "+1", "a", false);
        record_part_sent(&mut records, &[7], 7, 2, "+2", "b", false);
        assert_eq!(records.len(), 2);
        record_part_sent(&mut records, &[1, 2], 2, 2, "+1", "a", false);
        assert_eq!(records[0].status, SmsStatus::Sent);
        assert_eq!(records[1].status, SmsStatus::Sending);
    }

    #[test]
    fn temporary_codes_map_to_delayed_and_permanent_to_failure() {
        assert_eq!(DeliveryDetail::Delivered.sms_status(), SmsStatus::Delivered);
        assert_eq!(DeliveryDetail::Unknown.sms_status(), SmsStatus::DeliveryUnknown);
        assert_eq!(DeliveryDetail::Congestion.sms_status(), SmsStatus::DeliveryDelayed);
        assert_eq!(DeliveryDetail::SmeBusy.sms_status(), SmsStatus::DeliveryDelayed);
        assert_eq!(
            DeliveryDetail::PermanentCongestion.sms_status(),
            SmsStatus::DeliveryFailure
        );
        assert_eq!(
            DeliveryDetail::NotObtainable.sms_status(),
            SmsStatus::DeliveryFailure
        );
    }

    #[test]
    fn raw_codes_resolve_to_details() {
        assert_eq!(DeliveryDetail::try_from(0u8).unwrap(), DeliveryDetail::Delivered);
        assert_eq!(DeliveryDetail::try_from(32u8).unwrap(), DeliveryDetail::Congestion);
        assert_eq!(
            DeliveryDetail::try_from(70u8).unwrap(),
            DeliveryDetail::ValidityPeriodExpired
        );
        assert!(DeliveryDetail::try_from(200u8).is_err());
    }
}
