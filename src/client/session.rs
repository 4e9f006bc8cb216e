// ABOUTME: Client facade wiring the engine, SMS workers and network monitor together
// ABOUTME: Drives the deterministic init sequence and exposes the public operation surface

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::builder::Sim800Config;
use crate::client::error::{Sim800Error, Sim800Result};
use crate::codec::PduCodec;
use crate::command::{CommandOutcome, CommandSpec};
use crate::commands::{self, CmgfMode, CmglStat};
use crate::engine::{self, CommandSender};
use crate::events::Event;
use crate::network::{self, NetworkGate, NetworkMonitor, RegistrationStatus};
use crate::sms::types::{OutgoingSms, SharedOutbox};
use crate::sms::{delivery, inbox, outbox};
use crate::transport::{SerialEvent, SerialLink};

/// Lifecycle of a client session.
///
/// States only move forward during normal operation; `Error` is terminal
/// until a reset starts the sequence over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    /// Waiting for the serial port to open.
    Opening,
    /// The serial port is open; handshake not yet confirmed.
    Opened,
    /// Handshake and SIM unlock complete, modem configured.
    Initialized,
    /// Registered on the network and ready to transmit.
    Connected,
    /// Initialization failed; only reset recovers.
    Error,
}

/// Shared, watchable session state.
#[derive(Clone)]
pub(crate) struct SessionState {
    inner: Arc<watch::Sender<ClientState>>,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            inner: Arc::new(watch::channel(ClientState::Opening).0),
        }
    }

    pub(crate) fn current(&self) -> ClientState {
        *self.inner.borrow()
    }

    /// Move forward only; a late `Initialized` cannot demote `Connected`.
    pub(crate) fn advance(&self, next: ClientState) {
        self.inner.send_if_modified(|state| {
            if next > *state && *state != ClientState::Error {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Unconditional transition, used for `Error` and reset.
    pub(crate) fn force(&self, next: ClientState) {
        self.inner.send_replace(next);
    }
}

/// SIM credential states reported by `AT+CPIN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PinState {
    Ready,
    NeedPin,
    NeedPuk,
    Unknown(String),
}

impl PinState {
    fn from_line(line: &str) -> Self {
        if line.contains("READY") {
            PinState::Ready
        } else if line.contains("SIM PUK") {
            PinState::NeedPuk
        } else if line.contains("SIM PIN") {
            PinState::NeedPin
        } else {
            PinState::Unknown(line.to_string())
        }
    }
}

/// Handle to a running modem session.
///
/// Cloning is cheap; every clone talks to the same engine and workers. The
/// session runs on the tokio runtime it was spawned on and stops when the
/// serial event stream closes.
#[derive(Clone)]
pub struct Sim800Client {
    sender: CommandSender,
    events: broadcast::Sender<Event>,
    state: SessionState,
    gate: NetworkGate,
    jobs: mpsc::Sender<outbox::SendJob>,
    clear: broadcast::Sender<()>,
    records: SharedOutbox,
    config: Sim800Config,
    opened: watch::Receiver<bool>,
    monitor_started: Arc<AtomicBool>,
}

impl Sim800Client {
    /// Wire up a session over an opened serial link and start initialization.
    ///
    /// `serial` carries transport events: `Opened` once the port is usable,
    /// one `Line` per received line, `Failed` on stream errors.
    pub fn spawn<L, C>(
        link: L,
        serial: mpsc::Receiver<SerialEvent>,
        codec: Arc<C>,
        config: Sim800Config,
    ) -> Sim800Client
    where
        L: SerialLink,
        C: PduCodec,
    {
        let (events, _) = broadcast::channel(64);
        let handles = engine::spawn(link, serial, events.clone());
        let state = SessionState::new();
        let gate = NetworkGate::new();
        let records = SharedOutbox::default();
        let (clear, _) = broadcast::channel(4);

        let (jobs, job_queue) = mpsc::channel(16);
        outbox::spawn(
            job_queue,
            clear.subscribe(),
            handles.commands.clone(),
            Arc::clone(&codec),
            gate.clone(),
            records.clone(),
            events.clone(),
        );
        inbox::spawn(
            handles.unsolicited.subscribe(),
            clear.subscribe(),
            handles.commands.clone(),
            Arc::clone(&codec),
            events.clone(),
            config.prevent_wipe,
        );
        delivery::spawn(
            handles.unsolicited.subscribe(),
            codec,
            records.clone(),
            events.clone(),
        );

        let client = Sim800Client {
            sender: handles.commands,
            events,
            state,
            gate,
            jobs,
            clear,
            records,
            config,
            opened: handles.opened,
            monitor_started: Arc::new(AtomicBool::new(false)),
        };
        client.spawn_init();
        client
    }

    /// Execute one raw AT command through the session queue.
    pub async fn send(&self, spec: CommandSpec) -> Sim800Result<CommandOutcome> {
        if self.state.current() == ClientState::Error {
            return Err(Sim800Error::InvalidState(
                "session is in the error state".to_string(),
            ));
        }
        self.sender.send(spec).await
    }

    /// Send one logical SMS, splitting into parts as the codec dictates.
    ///
    /// Returns the composite id: the modem-assigned reference of every part,
    /// in transmission order. Fails fast with [`Sim800Error::NetworkNotReady`]
    /// when the registration gate is closed.
    pub async fn send_sms(
        &self,
        number: &str,
        text: &str,
        delivery_report: bool,
    ) -> Sim800Result<Vec<u8>> {
        let (reply, result) = oneshot::channel();
        self.jobs
            .send(outbox::SendJob {
                number: number.to_string(),
                text: text.to_string(),
                delivery_report,
                reply,
            })
            .await
            .map_err(|_| Sim800Error::Closed)?;
        result.await.map_err(|_| Sim800Error::Closed)?
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ClientState {
        self.state.current()
    }

    /// Whether the registration gate is currently open.
    pub fn network_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Wait until the registration gate opens.
    pub async fn wait_for_network(&self) {
        self.gate.wait_ready().await;
    }

    /// Query `AT+CREG?` directly, bypassing the monitor.
    pub async fn network_status(&self) -> Sim800Result<Option<RegistrationStatus>> {
        network::query(&self.sender).await
    }

    /// Snapshot of the outgoing message records.
    pub fn outbox(&self) -> Vec<OutgoingSms> {
        self.records.snapshot()
    }

    /// Restart the modem with `AT+CFUN=1,1` and run initialization again.
    ///
    /// Pending commands are flushed first so their callers fail promptly
    /// instead of timing out against a rebooting modem. With `empty_buffers`
    /// the outgoing records, queued sends and pending partial reassemblies
    /// are cleared as well. `settle` is how long to wait for the modem to
    /// come back before re-initializing.
    pub async fn reset(&self, empty_buffers: bool, settle: Duration) -> Sim800Result<()> {
        info!("resetting modem");
        self.sender.flush().await?;
        if empty_buffers {
            self.records.lock().clear();
            let _ = self.clear.send(());
        }
        self.gate.reset();
        self.sender.send(commands::hardware_reset()).await?;
        tokio::time::sleep(settle).await;
        self.state.force(ClientState::Opening);
        self.spawn_init();
        Ok(())
    }

    fn spawn_init(&self) {
        let task = InitTask {
            sender: self.sender.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            gate: self.gate.clone(),
            config: self.config.clone(),
            opened: self.opened.clone(),
            monitor_started: Arc::clone(&self.monitor_started),
        };
        tokio::spawn(task.run());
    }
}

/// The deterministic startup sequence.
///
/// Open wait, `AT` handshake, PIN handling, notification routing, PDU mode,
/// then the delayed storage wipe. Any failure moves the session to `Error`.
struct InitTask {
    sender: CommandSender,
    events: broadcast::Sender<Event>,
    state: SessionState,
    gate: NetworkGate,
    config: Sim800Config,
    opened: watch::Receiver<bool>,
    monitor_started: Arc<AtomicBool>,
}

impl InitTask {
    async fn run(self) {
        if let Err(err) = self.initialize().await {
            warn!(%err, "initialization failed");
            self.state.force(ClientState::Error);
            let _ = self.events.send(Event::Error(err.to_string()));
        }
    }

    async fn initialize(&self) -> Sim800Result<()> {
        self.await_open().await?;
        self.state.advance(ClientState::Opened);
        self.sender.send(commands::handshake()).await?;
        self.handle_pin_state().await?;

        self.state.advance(ClientState::Initialized);
        let _ = self.events.send(Event::DeviceReady);
        self.start_monitor();

        self.sender
            .send(commands::notification_mode(&self.config.cnmi_mode))
            .await?;
        self.sender
            .send(commands::message_format(CmgfMode::Pdu))
            .await?;

        if !self.config.prevent_wipe {
            self.schedule_wipe();
        }
        info!("modem initialized");
        Ok(())
    }

    async fn await_open(&self) -> Sim800Result<()> {
        let mut opened = self.opened.clone();
        match timeout(self.config.open_timeout, opened.wait_for(|open| *open)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Sim800Error::Closed),
            Err(_) => Err(Sim800Error::Timeout),
        }
    }

    async fn handle_pin_state(&self) -> Sim800Result<()> {
        let outcome = self.sender.send(commands::pin_status()).await?;
        let line = outcome.result.unwrap_or_default();
        match PinState::from_line(&line) {
            PinState::Ready => Ok(()),
            PinState::NeedPin => {
                let Some(pin) = self.config.pin.as_deref() else {
                    return Err(Sim800Error::Configuration(
                        "SIM requires a PIN but none is configured".to_string(),
                    ));
                };
                debug!("unlocking SIM");
                self.sender.send(commands::pin_unlock(pin)).await?;
                Ok(())
            }
            PinState::NeedPuk => {
                warn!("SIM requires a PUK, refusing to guess");
                Err(Sim800Error::SimLocked)
            }
            PinState::Unknown(line) => Err(Sim800Error::Protocol(format!(
                "unexpected PIN status: {line}"
            ))),
        }
    }

    fn start_monitor(&self) {
        // the monitor loops for the whole session; spawn it once
        if self.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        NetworkMonitor::spawn(
            self.sender.clone(),
            self.gate.clone(),
            self.events.clone(),
            self.state.clone(),
            self.config.network_poll_interval,
        );
    }

    /// Clear leftover message storage shortly after startup.
    ///
    /// The grace period lets +CMTI notifications for already-stored messages
    /// be read first.
    fn schedule_wipe(&self) {
        let sender = self.sender.clone();
        let grace = self.config.wipe_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match sender.send(commands::list_messages(CmglStat::All)).await {
                Ok(outcome) if !outcome.raw.is_empty() => {
                    info!("wiping leftover message storage");
                    if let Err(err) = sender.send(commands::wipe_storage()).await {
                        warn!(%err, "storage wipe failed");
                    }
                }
                Ok(_) => debug!("message storage already empty"),
                Err(err) => warn!(%err, "storage list failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_state_classification() {
        assert_eq!(PinState::from_line("+CPIN: READY"), PinState::Ready);
        assert_eq!(PinState::from_line("+CPIN: SIM PIN"), PinState::NeedPin);
        assert_eq!(PinState::from_line("+CPIN: SIM PUK"), PinState::NeedPuk);
        assert_eq!(
            PinState::from_line("+CPIN: PH-SIM PIN"),
            PinState::NeedPin
        );
        assert!(matches!(
            PinState::from_line("garbage"),
            PinState::Unknown(_)
        ));
    }

    #[test]
    fn state_only_advances_forward() {
        let state = SessionState::new();
        assert_eq!(state.current(), ClientState::Opening);
        state.advance(ClientState::Opened);
        assert_eq!(state.current(), ClientState::Opened);
        state.advance(ClientState::Connected);
        assert_eq!(state.current(), ClientState::Connected);
        // a late Initialized cannot demote
        state.advance(ClientState::Initialized);
        assert_eq!(state.current(), ClientState::Connected);
    }

    #[test]
    fn error_state_is_sticky_until_forced() {
        let state = SessionState::new();
        state.force(ClientState::Error);
        state.advance(ClientState::Connected);
        assert_eq!(state.current(), ClientState::Error);
        state.force(ClientState::Opening);
        assert_eq!(state.current(), ClientState::Opening);
    }
}
