// ABOUTME: Delivery report watcher: pairs the +CDS marker with the PDU line that follows it
// ABOUTME: Correlates parsed reports to outbox records and resolves aggregate delivery status

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::codec::{Pdu, PduCodec};
use crate::events::{DeliveryNotice, Event};
use crate::sms::types::{DeliveryDetail, DeliveryEvent, OutgoingSms, SharedOutbox, SmsStatus};

/// Watches the unsolicited stream for delivery reports.
///
/// A report arrives as two lines: a `+CDS: <len>` marker followed by the raw
/// PDU. Malformed frames are logged and dropped without disturbing the
/// stream.
pub(crate) fn spawn<C: PduCodec>(
    mut unsolicited: broadcast::Receiver<String>,
    codec: Arc<C>,
    records: SharedOutbox,
    events: broadcast::Sender<Event>,
) {
    tokio::spawn(async move {
        let mut awaiting_report = false;
        loop {
            let line = match unsolicited.recv().await {
                Ok(line) => line,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "delivery watcher lagged behind the line stream");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if line.contains("+CDS:") {
                awaiting_report = true;
                continue;
            }
            if !awaiting_report {
                continue;
            }
            awaiting_report = false;

            let report = match codec.decode(&line) {
                Ok(Pdu::StatusReport(report)) => report,
                Ok(_) => {
                    warn!("frame after +CDS did not decode to a status report");
                    continue;
                }
                Err(err) => {
                    warn!(%err, "undecodable delivery report frame discarded");
                    continue;
                }
            };
            let Ok(detail) = DeliveryDetail::try_from(report.status) else {
                warn!(code = report.status, "unknown delivery status code discarded");
                continue;
            };

            let event = DeliveryEvent {
                reference: report.reference,
                status: detail.sms_status(),
                detail,
                date: report.timestamp.unwrap_or_else(SystemTime::now),
            };
            debug!(reference = event.reference, ?detail, "delivery report received");

            let notice = {
                let mut records = records.lock();
                apply_delivery_event(&mut records, &event)
            };
            if let Some(notice) = notice {
                let _ = events.send(Event::DeliveryReport(notice));
            }
        }
    });
}

/// Correlate one delivery event against the outbox.
///
/// Events for unknown references, or for parts already in a final state, are
/// ignored silently; a part stuck on a temporary condition stays open for
/// the service center's next report. Returns the notification to publish, if
/// the event changed the aggregate picture.
pub(crate) fn apply_delivery_event(
    records: &mut [OutgoingSms],
    event: &DeliveryEvent,
) -> Option<DeliveryNotice> {
    let sms = records
        .iter_mut()
        .find(|sms| sms.parts.iter().any(|p| p.reference == event.reference))?;
    let index = sms
        .parts
        .iter()
        .position(|p| p.reference == event.reference)?;
    // Delivered and permanent failures are final; a temporary condition is
    // superseded by whatever the service center reports next.
    if matches!(
        sms.parts[index].status,
        SmsStatus::Delivered | SmsStatus::DeliveryFailure
    ) {
        return None;
    }

    sms.parts[index].status = event.status;
    sms.parts[index].detail = Some(event.detail);
    if event.status == SmsStatus::Delivered {
        sms.parts[index].delivery_date = Some(event.date);
    }

    if event.status != SmsStatus::Delivered {
        sms.status = event.status;
        return Some(DeliveryNotice {
            composite_id: sms.composite_id.clone(),
            status: sms.status,
            detail: Some(event.detail),
            parts: Vec::new(),
        });
    }

    if sms.parts.len() == sms.parts_total
        && sms.parts.iter().all(|p| p.status == SmsStatus::Delivered)
    {
        sms.status = SmsStatus::Delivered;
        return Some(DeliveryNotice {
            composite_id: sms.composite_id.clone(),
            status: SmsStatus::Delivered,
            detail: None,
            parts: sms.parts.clone(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::types::record_part_sent;

    fn delivered(reference: u8) -> DeliveryEvent {
        DeliveryEvent {
            reference,
            status: SmsStatus::Delivered,
            detail: DeliveryDetail::Delivered,
            date: SystemTime::now(),
        }
    }

    fn two_part_outbox() -> Vec<OutgoingSms> {
        let mut records = Vec::new();
        record_part_sent(&mut records, &[10], 10, 2, "+1", "long", true);
        record_part_sent(&mut records, &[10, 11], 11, 2, "+1", "long", true);
        records
    }

    #[test]
    fn aggregate_resolves_only_after_every_part_delivers() {
        let mut records = two_part_outbox();

        assert!(apply_delivery_event(&mut records, &delivered(10)).is_none());
        assert_eq!(records[0].status, SmsStatus::Sent);
        assert!(records[0].parts[0].delivery_date.is_some());

        let notice = apply_delivery_event(&mut records, &delivered(11)).unwrap();
        assert_eq!(notice.status, SmsStatus::Delivered);
        assert_eq!(notice.composite_id, vec![10, 11]);
        assert_eq!(notice.parts.len(), 2);
        assert_eq!(records[0].status, SmsStatus::Delivered);
    }

    #[test]
    fn failure_report_resolves_aggregate_immediately() {
        let mut records = two_part_outbox();
        let event = DeliveryEvent {
            reference: 11,
            status: DeliveryDetail::NotObtainable.sms_status(),
            detail: DeliveryDetail::NotObtainable,
            date: SystemTime::now(),
        };
        let notice = apply_delivery_event(&mut records, &event).unwrap();
        assert_eq!(notice.status, SmsStatus::DeliveryFailure);
        assert_eq!(notice.detail, Some(DeliveryDetail::NotObtainable));
        assert_eq!(records[0].status, SmsStatus::DeliveryFailure);
    }

    #[test]
    fn delayed_report_keeps_part_open() {
        let mut records = two_part_outbox();
        let event = DeliveryEvent {
            reference: 10,
            status: DeliveryDetail::Congestion.sms_status(),
            detail: DeliveryDetail::Congestion,
            date: SystemTime::now(),
        };
        let notice = apply_delivery_event(&mut records, &event).unwrap();
        assert_eq!(notice.status, SmsStatus::DeliveryDelayed);
        assert_eq!(records[0].parts[1].detail, None);
    }

    #[test]
    fn unknown_reference_is_ignored() {
        let mut records = two_part_outbox();
        assert!(apply_delivery_event(&mut records, &delivered(99)).is_none());
        assert_eq!(records[0].status, SmsStatus::Sent);
    }

    #[test]
    fn delayed_part_is_superseded_by_the_final_report() {
        let mut records = two_part_outbox();
        let congestion = DeliveryEvent {
            reference: 10,
            status: DeliveryDetail::Congestion.sms_status(),
            detail: DeliveryDetail::Congestion,
            date: SystemTime::now(),
        };
        let notice = apply_delivery_event(&mut records, &congestion).unwrap();
        assert_eq!(notice.status, SmsStatus::DeliveryDelayed);

        // the service center retried and eventually delivered both parts
        assert!(apply_delivery_event(&mut records, &delivered(10)).is_none());
        assert_eq!(records[0].parts[0].status, SmsStatus::Delivered);
        assert_eq!(records[0].parts[0].detail, Some(DeliveryDetail::Delivered));
        assert!(records[0].parts[0].delivery_date.is_some());

        let notice = apply_delivery_event(&mut records, &delivered(11)).unwrap();
        assert_eq!(notice.status, SmsStatus::Delivered);
        assert_eq!(records[0].status, SmsStatus::Delivered);
    }

    #[test]
    fn resolved_part_ignores_a_second_report() {
        let mut records = two_part_outbox();
        apply_delivery_event(&mut records, &delivered(10));
        // a duplicate for the same reference changes nothing
        assert!(apply_delivery_event(&mut records, &delivered(10)).is_none());
        assert_eq!(records[0].status, SmsStatus::Sent);
    }
}
