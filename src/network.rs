// ABOUTME: Network registration monitor driving the SMS readiness gate
// ABOUTME: Polls AT+CREG? until registered; registration denial clears the gate again

use std::sync::Arc;
use std::time::Duration;

use num_enum::TryFromPrimitive;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::client::error::Sim800Result;
use crate::client::session::{ClientState, SessionState};
use crate::commands::registration_status;
use crate::engine::CommandSender;
use crate::events::Event;

/// GSM registration codes reported by `AT+CREG?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RegistrationStatus {
    NotRegistered = 0,
    Home = 1,
    Searching = 2,
    Denied = 3,
    Unknown = 4,
    Roaming = 5,
}

impl RegistrationStatus {
    pub fn is_registered(self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

/// Terminal digit of a `+CREG: <n>,<stat>` result line.
pub(crate) fn parse_registration(result: &str) -> Option<RegistrationStatus> {
    let digit = result.trim_end().chars().last()?.to_digit(10)?;
    RegistrationStatus::try_from(digit as u8).ok()
}

/// Readiness gate guarding SMS transmission.
///
/// Unset until the monitor observes a registered status; cleared again when
/// registration is denied, so future waiters block until re-registration.
#[derive(Clone)]
pub(crate) struct NetworkGate {
    ready: Arc<watch::Sender<bool>>,
}

impl NetworkGate {
    pub(crate) fn new() -> Self {
        NetworkGate {
            ready: Arc::new(watch::channel(false).0),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub(crate) fn set_ready(&self) {
        self.ready.send_replace(true);
    }

    pub(crate) fn reset(&self) {
        self.ready.send_replace(false);
    }

    pub(crate) async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // the gate outlives every waiter; the sender half is never dropped first
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn wait_cleared(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| !*ready).await;
    }
}

/// Periodic registration poll.
///
/// Runs for the life of the session: while the gate is set it sleeps on the
/// gate, so polling stops once registered and resumes only when the gate is
/// explicitly reset (denial or client reset).
pub(crate) struct NetworkMonitor {
    sender: CommandSender,
    gate: NetworkGate,
    events: broadcast::Sender<Event>,
    state: SessionState,
    interval: Duration,
}

impl NetworkMonitor {
    pub(crate) fn spawn(
        sender: CommandSender,
        gate: NetworkGate,
        events: broadcast::Sender<Event>,
        state: SessionState,
        interval: Duration,
    ) {
        let monitor = NetworkMonitor {
            sender,
            gate,
            events,
            state,
            interval,
        };
        tokio::spawn(monitor.run());
    }

    async fn run(self) {
        loop {
            if self.gate.is_ready() {
                self.gate.wait_cleared().await;
                continue;
            }
            tokio::time::sleep(self.interval).await;
            if self.gate.is_ready() {
                continue;
            }
            match query(&self.sender).await {
                Ok(Some(status)) => self.apply(status),
                Ok(None) => warn!("unreadable registration result"),
                // transient poll failures are swallowed; the next tick retries
                Err(err) => debug!(%err, "registration poll failed"),
            }
        }
    }

    fn apply(&self, status: RegistrationStatus) {
        if status.is_registered() {
            debug!(?status, "network registered");
            self.gate.set_ready();
            self.state.advance(ClientState::Connected);
            let _ = self.events.send(Event::NetworkReady);
        } else if status == RegistrationStatus::Denied {
            warn!("network registration denied");
            self.gate.reset();
        } else {
            trace!(?status, "network not ready yet");
        }
    }
}

/// On-demand registration query; does not touch the gate.
pub(crate) async fn query(sender: &CommandSender) -> Sim800Result<Option<RegistrationStatus>> {
    let outcome = sender.send(registration_status()).await?;
    Ok(outcome.result.as_deref().and_then(parse_registration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_terminal_digit() {
        assert_eq!(parse_registration("+CREG: 0,1"), Some(RegistrationStatus::Home));
        assert_eq!(parse_registration("+CREG: 0,5"), Some(RegistrationStatus::Roaming));
        assert_eq!(parse_registration("+CREG: 0,3"), Some(RegistrationStatus::Denied));
        assert_eq!(parse_registration("+CREG: 1,2"), Some(RegistrationStatus::Searching));
        assert_eq!(parse_registration("garbage"), None);
        assert_eq!(parse_registration("+CREG: 0,9"), None);
    }

    #[test]
    fn only_home_and_roaming_are_registered() {
        assert!(RegistrationStatus::Home.is_registered());
        assert!(RegistrationStatus::Roaming.is_registered());
        assert!(!RegistrationStatus::Denied.is_registered());
        assert!(!RegistrationStatus::Searching.is_registered());
    }

    #[test]
    fn gate_reset_blocks_again() {
        let gate = NetworkGate::new();
        assert!(!gate.is_ready());
        gate.set_ready();
        assert!(gate.is_ready());
        gate.reset();
        assert!(!gate.is_ready());
    }
}
