// ABOUTME: Command engine task: single-flight FIFO dispatcher plus response correlator
// ABOUTME: Owns the transport write half; routes every incoming line to the head command or the unsolicited stream

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace, warn};

use crate::client::error::{Sim800Error, Sim800Result};
use crate::command::{ActiveCommand, CommandOutcome, CommandSpec, CommandState};
use crate::events::Event;
use crate::transport::{SerialEvent, SerialLink};

pub(crate) enum EngineRequest {
    Submit {
        spec: CommandSpec,
        reply: oneshot::Sender<Sim800Result<CommandOutcome>>,
    },
    /// Fail every queued command; used by `reset` when emptying buffers.
    Flush,
}

/// Cloneable handle submitting commands to the engine and awaiting their
/// terminal transition.
#[derive(Clone)]
pub(crate) struct CommandSender {
    tx: mpsc::Sender<EngineRequest>,
}

impl CommandSender {
    pub(crate) async fn send(&self, spec: CommandSpec) -> Sim800Result<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Submit { spec, reply })
            .await
            .map_err(|_| Sim800Error::Closed)?;
        rx.await.map_err(|_| Sim800Error::Closed)?
    }

    pub(crate) async fn flush(&self) -> Sim800Result<()> {
        self.tx
            .send(EngineRequest::Flush)
            .await
            .map_err(|_| Sim800Error::Closed)
    }
}

pub(crate) struct EngineHandles {
    pub(crate) commands: CommandSender,
    /// Unsolicited lines, fanned out to the SMS subsystems.
    pub(crate) unsolicited: broadcast::Sender<String>,
    /// Set once the transport reports the port is open.
    pub(crate) opened: watch::Receiver<bool>,
}

pub(crate) fn spawn<L: SerialLink>(
    link: L,
    serial: mpsc::Receiver<SerialEvent>,
    events: broadcast::Sender<Event>,
) -> EngineHandles {
    let (tx, requests) = mpsc::channel(32);
    let (unsolicited, _) = broadcast::channel(64);
    let (opened_tx, opened) = watch::channel(false);

    let engine = Engine {
        link,
        events,
        unsolicited: unsolicited.clone(),
        opened: opened_tx,
        queue: VecDeque::new(),
        next_id: 0,
    };
    tokio::spawn(engine.run(requests, serial));

    EngineHandles {
        commands: CommandSender { tx },
        unsolicited,
        opened,
    }
}

struct Engine<L: SerialLink> {
    link: L,
    events: broadcast::Sender<Event>,
    unsolicited: broadcast::Sender<String>,
    opened: watch::Sender<bool>,
    queue: VecDeque<ActiveCommand>,
    next_id: u64,
}

impl<L: SerialLink> Engine<L> {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<EngineRequest>,
        mut serial: mpsc::Receiver<SerialEvent>,
    ) {
        loop {
            let deadline = self.queue.front().and_then(|cmd| cmd.deadline);
            tokio::select! {
                request = requests.recv() => match request {
                    Some(EngineRequest::Submit { spec, reply }) => self.submit(spec, reply).await,
                    Some(EngineRequest::Flush) => self.flush(),
                    None => break,
                },
                event = serial.recv() => match event {
                    Some(SerialEvent::Line(line)) => self.handle_line(&line).await,
                    Some(SerialEvent::Opened) => {
                        debug!("serial link opened");
                        self.opened.send_replace(true);
                    }
                    Some(SerialEvent::Failed(err)) => self.handle_transport_failure(err).await,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.handle_timeout().await;
                }
            }
        }
        trace!("command engine stopped");
    }

    async fn submit(
        &mut self,
        spec: CommandSpec,
        reply: oneshot::Sender<Sim800Result<CommandOutcome>>,
    ) {
        self.next_id += 1;
        let command = ActiveCommand::new(self.next_id, spec, reply);
        trace!(id = command.id, command = %command.spec.command, "command queued");
        self.queue.push_back(command);
        if self.queue.len() == 1 {
            self.dispatch_head().await;
        }
    }

    /// Write the head command to the wire. Loops because a write failure
    /// fails that command and promotes the next one.
    async fn dispatch_head(&mut self) {
        while let Some(head) = self.queue.front_mut() {
            debug!(id = head.id, command = %head.spec.command, "dispatching command");
            let bytes = head.spec.wire_bytes();
            match self.link.write(&bytes).await {
                Ok(()) => {
                    head.mark_transmitting(Instant::now());
                    return;
                }
                Err(err) => {
                    error!(id = head.id, %err, "transport write failed");
                    head.fail(Sim800Error::Transport(err));
                    self.queue.pop_front();
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        if let Some(head) = self.queue.front_mut() {
            if head.is_line_mine(line) {
                trace!(id = head.id, line, "line correlated to active command");
                if head.feed(line) {
                    debug!(id = head.id, state = ?head.state, "command completed");
                    let id = head.id;
                    self.remove(id);
                    self.dispatch_head().await;
                }
                return;
            }
        }
        // Bare acknowledgements are never meaningful unsolicited traffic.
        if line == "OK" || line == "ERROR" {
            return;
        }
        trace!(line, "unsolicited line");
        let _ = self.unsolicited.send(line.to_string());
        let _ = self.events.send(Event::Input(line.to_string()));
    }

    async fn handle_timeout(&mut self) {
        if let Some(head) = self.queue.front_mut() {
            warn!(id = head.id, command = %head.spec.command, "command timed out");
            head.fail(Sim800Error::Timeout);
            self.queue.pop_front();
            self.dispatch_head().await;
        }
    }

    async fn handle_transport_failure(&mut self, err: io::Error) {
        error!(%err, "serial transport failure");
        let message = err.to_string();
        if let Some(head) = self.queue.front_mut() {
            if head.state != CommandState::Created {
                head.fail(Sim800Error::Transport(err));
                self.queue.pop_front();
                self.dispatch_head().await;
            }
        }
        let _ = self.events.send(Event::Error(message));
    }

    /// Removal is by identity rather than position, so a stale id can never
    /// evict the wrong command.
    fn remove(&mut self, id: u64) {
        if let Some(position) = self.queue.iter().position(|cmd| cmd.id == id) {
            self.queue.remove(position);
        }
    }

    fn flush(&mut self) {
        let flushed = self.queue.len();
        while let Some(mut command) = self.queue.pop_front() {
            command.fail(Sim800Error::InvalidState("command buffer flushed".into()));
        }
        if flushed > 0 {
            debug!(flushed, "command buffer flushed");
        }
    }
}

fn far_future() -> Instant {
    // A deadline that never fires while the disabled select branch exists.
    Instant::now() + Duration::from_secs(86_400 * 365)
}
