// ABOUTME: Incoming SMS path: +CMTI notification, storage read, multipart reassembly
// ABOUTME: Segments are stitched by their declared sequence index, not arrival order

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::codec::{DeliverPdu, Pdu, PduCodec};
use crate::commands;
use crate::engine::CommandSender;
use crate::events::{Event, IncomingSms};

/// Reassembles multipart deliveries into whole messages.
///
/// Segments are keyed by `(sender, reference)` and placed at their declared
/// 1-based sequence index, so out-of-order arrival produces correctly ordered
/// text. A repeated sequence index overwrites the earlier segment. The
/// occupied storage slot of each segment is kept so the whole message can be
/// deleted from the modem once it completes.
#[derive(Debug, Default)]
pub(crate) struct Reassembler {
    pending: HashMap<(String, u16), Vec<Option<(DeliverPdu, u32)>>>,
}

impl Reassembler {
    /// Accept one segment; returns the whole message plus its storage slots
    /// once every declared segment has arrived.
    pub(crate) fn offer(&mut self, pdu: DeliverPdu, slot: u32) -> Option<(IncomingSms, Vec<u32>)> {
        let header = pdu.multipart.clone()?;
        if header.sequence == 0 || header.sequence > header.total {
            warn!(
                sequence = header.sequence,
                total = header.total,
                "segment index outside the declared range, dropped"
            );
            return None;
        }

        let key = (pdu.sender.clone(), header.reference);
        let segments = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| vec![None; header.total as usize]);
        if segments.len() != header.total as usize {
            // sender reused the reference with a different segment count
            *segments = vec![None; header.total as usize];
        }
        segments[header.sequence as usize - 1] = Some((pdu, slot));

        if segments.iter().any(Option::is_none) {
            return None;
        }
        let segments = self.pending.remove(&key)?;
        let mut text = String::new();
        let mut date = None;
        let mut number = String::new();
        let mut slots = Vec::with_capacity(segments.len());
        for (segment, slot) in segments.into_iter().flatten() {
            text.push_str(&segment.text);
            number = segment.sender;
            slots.push(slot);
            if date.is_none() {
                date = segment.timestamp;
            }
        }
        let sms = IncomingSms {
            number,
            text,
            date: date.unwrap_or_else(SystemTime::now),
        };
        Some((sms, slots))
    }
}

/// Parse the storage slot out of a `+CMTI: "SM",<slot>` notification.
pub(crate) fn parse_slot(line: &str) -> Option<u32> {
    line.rsplit(',').next()?.trim().parse().ok()
}

/// Watches for new-message notifications, reads each message out of modem
/// storage, and publishes complete messages. A clear signal discards pending
/// partial reassemblies so pre-reset segments cannot leak into a new session.
pub(crate) fn spawn<C: PduCodec>(
    mut unsolicited: broadcast::Receiver<String>,
    mut clear: broadcast::Receiver<()>,
    sender: CommandSender,
    codec: Arc<C>,
    events: broadcast::Sender<Event>,
    prevent_wipe: bool,
) {
    tokio::spawn(async move {
        let mut reassembler = Reassembler::default();
        loop {
            let line = tokio::select! {
                line = unsolicited.recv() => match line {
                    Ok(line) => line,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "inbox lagged behind the line stream");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                signal = clear.recv() => {
                    if matches!(signal, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                    debug!("pending partial reassemblies discarded");
                    reassembler = Reassembler::default();
                    continue;
                }
            };
            if !line.starts_with("+CMTI:") {
                continue;
            }
            let Some(slot) = parse_slot(&line) else {
                warn!(%line, "unparseable new-message notification");
                continue;
            };
            debug!(slot, "new message stored on the modem");

            let outcome = match sender.send(commands::read_message(slot)).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(slot, %err, "failed to read stored message");
                    continue;
                }
            };
            // raw[0] is the +CMGR header, raw[1] the PDU line
            let Some(frame) = outcome.raw.get(1) else {
                warn!(slot, "read returned no PDU line");
                continue;
            };
            match codec.decode(frame) {
                Ok(Pdu::Deliver(pdu)) => {
                    let complete = if pdu.multipart.is_some() {
                        reassembler.offer(pdu, slot)
                    } else {
                        let sms = IncomingSms {
                            number: pdu.sender,
                            date: pdu.timestamp.unwrap_or_else(SystemTime::now),
                            text: pdu.text,
                        };
                        Some((sms, vec![slot]))
                    };
                    if let Some((sms, slots)) = complete {
                        let _ = events.send(Event::IncomingSms(sms));
                        if !prevent_wipe {
                            wipe_slots(sender.clone(), slots);
                        }
                    }
                }
                Ok(_) => debug!(slot, "stored frame was not a delivery, ignored"),
                Err(err) => warn!(slot, %err, "undecodable stored message discarded"),
            }
        }
    });
}

/// Delete the storage slots of a completed message, fire and forget: a
/// failed delete only costs storage space.
fn wipe_slots(sender: CommandSender, slots: Vec<u32>) {
    tokio::spawn(async move {
        for slot in slots {
            if let Err(err) = sender.send(commands::delete_message(slot)).await {
                warn!(slot, %err, "failed to delete stored message");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MultipartHeader;

    fn segment(reference: u16, sequence: u8, total: u8, text: &str) -> DeliverPdu {
        DeliverPdu {
            sender: "+15550001111".to_string(),
            text: text.to_string(),
            timestamp: Some(SystemTime::now()),
            multipart: Some(MultipartHeader {
                reference,
                total,
                sequence,
            }),
        }
    }

    #[test]
    fn reassembles_by_declared_index_regardless_of_arrival_order() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.offer(segment(7, 3, 3, "CCC"), 1).is_none());
        assert!(reassembler.offer(segment(7, 1, 3, "AAA"), 2).is_none());
        let (sms, slots) = reassembler.offer(segment(7, 2, 3, "BBB"), 3).unwrap();
        assert_eq!(sms.text, "AAABBBCCC");
        assert_eq!(sms.number, "+15550001111");
        // slots come back in segment order for the cleanup pass
        assert_eq!(slots, vec![2, 3, 1]);
    }

    #[test]
    fn interleaved_messages_do_not_mix() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.offer(segment(1, 1, 2, "one-"), 1).is_none());
        assert!(reassembler.offer(segment(2, 1, 2, "two-"), 2).is_none());
        let (first, _) = reassembler.offer(segment(1, 2, 2, "one"), 3).unwrap();
        assert_eq!(first.text, "one-one");
        let (second, _) = reassembler.offer(segment(2, 2, 2, "two"), 4).unwrap();
        assert_eq!(second.text, "two-two");
    }

    #[test]
    fn duplicate_segment_replaces_the_earlier_one() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.offer(segment(3, 1, 2, "old"), 1).is_none());
        assert!(reassembler.offer(segment(3, 1, 2, "new"), 2).is_none());
        let (sms, _) = reassembler.offer(segment(3, 2, 2, "!"), 3).unwrap();
        assert_eq!(sms.text, "new!");
    }

    #[test]
    fn out_of_range_sequence_is_dropped() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.offer(segment(4, 0, 2, "x"), 1).is_none());
        assert!(reassembler.offer(segment(4, 3, 2, "x"), 2).is_none());
        assert!(reassembler.pending.is_empty());
    }

    #[test]
    fn parses_slot_from_notification() {
        assert_eq!(parse_slot("+CMTI: \"SM\",3"), Some(3));
        assert_eq!(parse_slot("+CMTI: \"SM\",12"), Some(12));
        assert_eq!(parse_slot("+CMTI: garbage"), None);
    }
}
