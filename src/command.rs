// ABOUTME: AT command descriptor and per-command state machine
// ABOUTME: Covers line matching, echo acknowledgment, raw capture and terminal transitions

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::client::error::{Sim800Error, Sim800Result};

/// Default per-command response budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A rule deciding whether an incoming line is relevant to a command.
///
/// Literals compare by exact equality when used as a terminal rule and by
/// prefix when used as an expected-data filter. Predicates run an arbitrary
/// line-level test in both positions.
#[derive(Clone)]
pub enum LineMatcher {
    Literal(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl LineMatcher {
    pub fn literal(line: impl Into<String>) -> Self {
        LineMatcher::Literal(line.into())
    }

    pub fn predicate(test: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        LineMatcher::Predicate(Arc::new(test))
    }

    /// Terminal rule: literals must match the whole line.
    pub fn is_terminal_match(&self, line: &str) -> bool {
        match self {
            LineMatcher::Literal(expected) => line == expected,
            LineMatcher::Predicate(test) => test(line),
        }
    }

    /// Expected-data rule: literals match as a prefix.
    pub fn is_data_match(&self, line: &str) -> bool {
        match self {
            LineMatcher::Literal(prefix) => line.starts_with(prefix.as_str()),
            LineMatcher::Predicate(test) => test(line),
        }
    }
}

impl fmt::Debug for LineMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineMatcher::Literal(line) => f.debug_tuple("Literal").field(line).finish(),
            LineMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Lifecycle of a single command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Transmitting,
    Acknowledged,
    Done,
    Error,
}

/// Configuration of one request/response cycle.
///
/// Built through [`CommandSpec::builder`] for custom commands; the standard
/// AT command set lives in [`crate::commands`].
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Command text written to the wire, or the raw payload in input mode.
    pub command: String,
    /// Optional argument appended directly after the command text.
    pub arg: Option<String>,
    /// Terminal success rule. Required unless an observer is attached.
    pub complete_when: Option<LineMatcher>,
    /// Terminal failure rule.
    pub error_when: Option<LineMatcher>,
    /// Whitelist of line matchers deciding what goes into the raw capture.
    /// When empty, capture is gated on the command echo instead.
    pub expected_data: Vec<LineMatcher>,
    /// Raw payload transmission: terminated by Ctrl-Z instead of a newline.
    pub input_mode: bool,
    /// Budget for the terminal transition to occur.
    pub timeout: Duration,
    /// Streaming observer receiving every line owned by this command.
    pub observer: Option<mpsc::UnboundedSender<String>>,
}

impl CommandSpec {
    pub fn builder(command: impl Into<String>) -> CommandBuilder {
        CommandBuilder {
            spec: CommandSpec {
                command: command.into(),
                arg: None,
                complete_when: None,
                error_when: None,
                expected_data: Vec::new(),
                input_mode: false,
                timeout: DEFAULT_TIMEOUT,
                observer: None,
            },
        }
    }

    /// Bytes written to the transport when this command is dispatched.
    pub(crate) fn wire_bytes(&self) -> Vec<u8> {
        if self.input_mode {
            let mut out = self.command.clone().into_bytes();
            out.push(0x1A);
            out
        } else {
            let mut out = match &self.arg {
                Some(arg) => format!("{}{}", self.command, arg).into_bytes(),
                None => self.command.clone().into_bytes(),
            };
            out.push(b'\n');
            out
        }
    }
}

/// Builder for [`CommandSpec`].
#[derive(Debug)]
pub struct CommandBuilder {
    spec: CommandSpec,
}

impl CommandBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.arg = Some(arg.into());
        self
    }

    /// Complete when a line equals `line` exactly.
    pub fn complete_on(mut self, line: impl Into<String>) -> Self {
        self.spec.complete_when = Some(LineMatcher::literal(line));
        self
    }

    pub fn complete_when(mut self, matcher: LineMatcher) -> Self {
        self.spec.complete_when = Some(matcher);
        self
    }

    /// Fail when a line equals `line` exactly.
    pub fn error_on(mut self, line: impl Into<String>) -> Self {
        self.spec.error_when = Some(LineMatcher::literal(line));
        self
    }

    pub fn error_when(mut self, matcher: LineMatcher) -> Self {
        self.spec.error_when = Some(matcher);
        self
    }

    /// Capture lines starting with `prefix` into the raw result.
    pub fn expect_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.spec.expected_data.push(LineMatcher::literal(prefix));
        self
    }

    pub fn expect(mut self, matcher: LineMatcher) -> Self {
        self.spec.expected_data.push(matcher);
        self
    }

    pub fn input_mode(mut self) -> Self {
        self.spec.input_mode = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn observer(mut self, observer: mpsc::UnboundedSender<String>) -> Self {
        self.spec.observer = Some(observer);
        self
    }

    /// A command with neither an observer nor a completion rule could never
    /// self-terminate, so construction rejects it.
    pub fn build(self) -> Sim800Result<CommandSpec> {
        if self.spec.observer.is_none() && self.spec.complete_when.is_none() {
            return Err(Sim800Error::Configuration(format!(
                "command \"{}\" has neither a completion rule nor an observer",
                self.spec.command
            )));
        }
        Ok(self.spec)
    }
}

/// What a completed command hands back to its awaiter.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The line that matched the completion rule.
    pub result: Option<String>,
    /// Every line captured verbatim while the command was active.
    pub raw: Vec<String>,
}

/// A command in flight, owned by the engine's FIFO buffer.
pub(crate) struct ActiveCommand {
    pub(crate) id: u64,
    pub(crate) spec: CommandSpec,
    pub(crate) state: CommandState,
    pub(crate) deadline: Option<Instant>,
    acked: bool,
    result: Option<String>,
    raw: Vec<String>,
    reply: Option<oneshot::Sender<Sim800Result<CommandOutcome>>>,
}

impl ActiveCommand {
    pub(crate) fn new(
        id: u64,
        spec: CommandSpec,
        reply: oneshot::Sender<Sim800Result<CommandOutcome>>,
    ) -> Self {
        ActiveCommand {
            id,
            spec,
            state: CommandState::Created,
            deadline: None,
            acked: false,
            result: None,
            raw: Vec::new(),
            reply: Some(reply),
        }
    }

    pub(crate) fn mark_transmitting(&mut self, now: Instant) {
        self.state = CommandState::Transmitting;
        self.deadline = Some(now + self.spec.timeout);
    }

    /// Ownership test used by the correlator: does this incoming line belong
    /// to this command rather than the unsolicited stream?
    pub(crate) fn is_line_mine(&self, line: &str) -> bool {
        if !self.spec.expected_data.is_empty()
            && self.spec.expected_data.iter().any(|m| m.is_data_match(line))
        {
            return true;
        }
        if self.state == CommandState::Created {
            return false;
        }
        line.contains(self.spec.command.as_str())
            || self
                .spec
                .complete_when
                .as_ref()
                .is_some_and(|m| m.is_terminal_match(line))
            || self
                .spec
                .error_when
                .as_ref()
                .is_some_and(|m| m.is_terminal_match(line))
            || (self.spec.input_mode && line.starts_with("> "))
    }

    /// Feed one owned line through the state machine.
    ///
    /// Returns `true` when this line drove the terminal transition; the
    /// caller must then drop the command from the buffer so no later line
    /// can trigger a second transition.
    pub(crate) fn feed(&mut self, line: &str) -> bool {
        // Capture before the echo check: the echo line itself is not part of
        // the response unless an expected-data filter claims it.
        if self.spec.expected_data.is_empty() {
            if self.acked {
                self.raw.push(line.to_string());
            }
        } else if self.spec.expected_data.iter().any(|m| m.is_data_match(line)) {
            self.raw.push(line.to_string());
        }

        if let Some(observer) = &self.spec.observer {
            let _ = observer.send(line.to_string());
        }

        if !self.spec.input_mode && line.starts_with(self.spec.command.as_str()) {
            self.acked = true;
            self.state = CommandState::Acknowledged;
        }

        if let Some(matcher) = &self.spec.complete_when {
            if matcher.is_terminal_match(line) {
                self.result = Some(line.to_string());
                self.state = CommandState::Done;
                self.send_outcome();
                return true;
            }
        }
        if let Some(matcher) = &self.spec.error_when {
            if matcher.is_terminal_match(line) {
                self.fail(Sim800Error::Protocol(line.to_string()));
                return true;
            }
        }
        false
    }

    /// Terminal failure: timeout, matched error rule or transport loss.
    pub(crate) fn fail(&mut self, error: Sim800Error) {
        self.state = CommandState::Error;
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn send_outcome(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(CommandOutcome {
                result: self.result.clone(),
                raw: std::mem::take(&mut self.raw),
            }));
        }
    }
}
