// ABOUTME: Outgoing SMS worker: serializes logical sends and drives the CMGS two-step per part
// ABOUTME: Parses modem-assigned message references and applies the outbox record-update rule

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::client::error::{Sim800Error, Sim800Result};
use crate::codec::PduCodec;
use crate::commands::{send_length, send_payload};
use crate::engine::CommandSender;
use crate::events::Event;
use crate::network::NetworkGate;
use crate::sms::types::{record_part_sent, SharedOutbox};

pub(crate) struct SendJob {
    pub(crate) number: String,
    pub(crate) text: String,
    pub(crate) delivery_report: bool,
    pub(crate) reply: oneshot::Sender<Sim800Result<Vec<u8>>>,
}

/// One worker per session: the job queue admits a single logical SMS at a
/// time, so all parts of one message go out before the next message starts.
/// A clear signal drains queued jobs, failing their callers promptly.
pub(crate) fn spawn<C: PduCodec>(
    mut jobs: mpsc::Receiver<SendJob>,
    mut clear: broadcast::Receiver<()>,
    sender: CommandSender,
    codec: Arc<C>,
    gate: NetworkGate,
    records: SharedOutbox,
    events: broadcast::Sender<Event>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(SendJob {
                        number,
                        text,
                        delivery_report,
                        reply,
                    }) = job
                    else {
                        break;
                    };
                    let result = transmit(
                        &sender,
                        codec.as_ref(),
                        &gate,
                        &records,
                        &number,
                        &text,
                        delivery_report,
                    )
                    .await;
                    if let Ok(composite) = &result {
                        debug!(?composite, "sms transmission complete");
                        let _ = events.send(Event::SmsSent(composite.clone()));
                    }
                    let _ = reply.send(result);
                }
                signal = clear.recv() => {
                    if matches!(signal, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                    let mut flushed = 0;
                    while let Ok(job) = jobs.try_recv() {
                        let _ = job.reply.send(Err(Sim800Error::InvalidState(
                            "send queue flushed".into(),
                        )));
                        flushed += 1;
                    }
                    if flushed > 0 {
                        debug!(flushed, "send queue flushed");
                    }
                }
            }
        }
    });
}

async fn transmit<C: PduCodec>(
    sender: &CommandSender,
    codec: &C,
    gate: &NetworkGate,
    records: &SharedOutbox,
    number: &str,
    text: &str,
    delivery_report: bool,
) -> Sim800Result<Vec<u8>> {
    if !gate.is_ready() {
        return Err(Sim800Error::NetworkNotReady);
    }

    let parts = codec.encode(number, text, delivery_report)?;
    let total = parts.len();
    let mut composite = Vec::with_capacity(total);

    for part in &parts {
        sender.send(send_length(part.tpdu_length)).await?;
        let outcome = sender.send(send_payload(&part.payload)).await?;
        let reference = parse_reference(&outcome.raw)?;
        composite.push(reference);
        debug!(reference, sent = composite.len(), total, "sms part accepted");
        {
            let mut records = records.lock();
            record_part_sent(
                &mut records,
                &composite,
                reference,
                total,
                number,
                text,
                delivery_report,
            );
        }
    }

    Ok(composite)
}

/// The `+CMGS: <reference>` line is the first capture of the payload command.
fn parse_reference(raw: &[String]) -> Sim800Result<u8> {
    let line = raw
        .first()
        .ok_or_else(|| Sim800Error::Protocol("missing +CMGS response".into()))?;
    line.split(':')
        .nth(1)
        .map(str::trim)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| Sim800Error::Protocol(format!("malformed +CMGS response: {line}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_reference() {
        assert_eq!(parse_reference(&["+CMGS: 42".to_string()]).unwrap(), 42);
        assert_eq!(parse_reference(&["+CMGS:0".to_string()]).unwrap(), 0);
    }

    #[test]
    fn rejects_missing_or_malformed_response() {
        assert!(matches!(parse_reference(&[]), Err(Sim800Error::Protocol(_))));
        assert!(matches!(
            parse_reference(&["+CMGS: lots".to_string()]),
            Err(Sim800Error::Protocol(_))
        ));
    }
}
