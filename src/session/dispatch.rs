//! Command dispatch and reply correlation.
//!
//! Two strategies live behind one [`Correlator`]:
//! * token based - every command line is prefixed with an increasing numeric token
//!   that gdb echoes on the matching result record, any number of commands may be in flight;
//! * serialized - a single command is in flight, others wait in FIFO order until gdb
//!   returns to interactive mode, the reply is the last result/exec record seen before
//!   the prompt.

use crate::mi::{OutputCategory, Record, RecordKind};
use crate::session::error::SessionError;
use crate::session::state::{Requirement, SessionState};
use crate::{mux_debug, mux_warn};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use strum_macros::{Display, EnumString};

pub type CommandResult = Result<Record, SessionError>;

/// Caller completion, called exactly once.
pub type Continuation = Box<dyn FnOnce(CommandResult) + Send + 'static>;

/// Continuation together with the result it must be called with.
pub type Resolution = (Continuation, CommandResult);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CorrelationStrategy {
    #[default]
    Token,
    Serialized,
}

/// Logical debugger command: MI (or CLI) command name and arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl MiCommand {
    pub fn new<ARGS: IntoIterator<Item = I>, I: Into<String>>(
        name: impl Into<String>,
        args: ARGS,
    ) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a wire line: `[token]name arg1 arg2 ...\n`.
    pub fn wire_line(&self, token: Option<u64>) -> String {
        let mut line = token.map(|t| t.to_string()).unwrap_or_default();
        line.push_str(&self.name);
        if !self.args.is_empty() {
            line.push(' ');
            line.push_str(&self.args.iter().join(" "));
        }
        line.push('\n');
        line
    }
}

/// What a dispatched command does on the control path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Command(MiCommand),
    /// Out-of-band interrupt of the debugee (signal sent to inferiors directly).
    Interrupt,
}

impl Action {
    fn name(&self) -> String {
        match self {
            Action::Command(cmd) => cmd.name.clone(),
            Action::Interrupt => "interrupt".to_string(),
        }
    }
}

/// Session state a command needs at the moment it is written to the debugger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gate {
    pub command: &'static str,
    pub requirement: Requirement,
}

impl Gate {
    pub fn new(command: &'static str, requirement: Requirement) -> Self {
        Self {
            command,
            requirement,
        }
    }

    fn check(&self, state: &SessionState) -> Result<(), SessionError> {
        state
            .check(self.requirement)
            .map_err(|violation| SessionError::Precondition {
                command: self.command,
                violation,
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Implicit single-flight slot of the serialized strategy.
    Current,
    Token(u64),
    /// Signal interrupt waiting for the next `*stopped` record.
    Interrupt(u64),
}

/// One in-flight request.
pub struct PendingCommand {
    pub key: CorrelationKey,
    pub name: String,
    pub issued_at: Instant,
    continuation: Continuation,
}

impl PendingCommand {
    fn new(key: CorrelationKey, name: String, continuation: Continuation) -> Self {
        Self {
            key,
            name,
            issued_at: Instant::now(),
            continuation,
        }
    }

    fn resolve(self, result: CommandResult) -> Resolution {
        mux_debug!(
            "command `{}` ({:?}) resolved after {:?}",
            self.name,
            self.key,
            self.issued_at.elapsed()
        );
        (self.continuation, result)
    }

    pub fn into_continuation(self) -> Continuation {
        self.continuation
    }
}

/// Work for the control channel, produced under the session lock, performed outside it.
#[derive(Debug, PartialEq, Eq)]
pub enum Outgoing {
    Line { key: CorrelationKey, line: String },
    Interrupt { key: CorrelationKey },
}

/// Convert a reply record into a command result.
fn reply(record: &Record) -> CommandResult {
    match record.error_message() {
        Some(msg) => Err(SessionError::Rejected(msg.to_string())),
        None => Ok(record.clone()),
    }
}

#[derive(Default)]
pub struct TokenCorrelator {
    last_token: u64,
    last_interrupt: u64,
    pending: BTreeMap<u64, PendingCommand>,
    interrupts: VecDeque<PendingCommand>,
}

impl TokenCorrelator {
    fn submit(&mut self, action: Action, continuation: Continuation) -> Outgoing {
        let name = action.name();
        match action {
            Action::Command(cmd) => {
                self.last_token += 1;
                let token = self.last_token;
                let key = CorrelationKey::Token(token);
                self.pending
                    .insert(token, PendingCommand::new(key, name, continuation));
                Outgoing::Line {
                    key,
                    line: cmd.wire_line(Some(token)),
                }
            }
            Action::Interrupt => {
                self.last_interrupt += 1;
                let key = CorrelationKey::Interrupt(self.last_interrupt);
                self.interrupts
                    .push_back(PendingCommand::new(key, name, continuation));
                Outgoing::Interrupt { key }
            }
        }
    }

    fn on_record(&mut self, record: &Record) -> Vec<Resolution> {
        if record.kind == RecordKind::Result {
            let Some(token) = record.token else {
                mux_warn!("protocol violation: reply without token: {record}");
                return vec![];
            };
            return match self.pending.remove(&token) {
                Some(pending) => vec![pending.resolve(reply(record))],
                None => {
                    mux_warn!("protocol violation: reply with unknown token {token}: {record}");
                    vec![]
                }
            };
        }

        if record.category == OutputCategory::Exec && record.class == "stopped" {
            return self
                .interrupts
                .drain(..)
                .map(|p| p.resolve(Ok(record.clone())))
                .collect();
        }

        vec![]
    }

    fn abandon(&mut self, key: CorrelationKey) -> Option<PendingCommand> {
        match key {
            CorrelationKey::Token(token) => self.pending.remove(&token),
            CorrelationKey::Interrupt(_) => {
                let pos = self.interrupts.iter().position(|p| p.key == key)?;
                self.interrupts.remove(pos)
            }
            CorrelationKey::Current => None,
        }
    }

    fn drain(&mut self) -> Vec<PendingCommand> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_values()
            .chain(self.interrupts.drain(..))
            .collect()
    }

    fn in_flight(&self) -> usize {
        self.pending.len() + self.interrupts.len()
    }
}

struct Queued {
    action: Action,
    gate: Gate,
    pending: PendingCommand,
}

#[derive(Default)]
pub struct SerialQueue {
    interactive: bool,
    current: Option<PendingCommand>,
    last_reply: Option<Record>,
    queue: VecDeque<Queued>,
}

impl SerialQueue {
    fn submit(&mut self, action: Action, gate: Gate, continuation: Continuation) -> Option<Outgoing> {
        let pending = PendingCommand::new(CorrelationKey::Current, action.name(), continuation);
        if self.interactive && self.current.is_none() {
            Some(self.release(action, pending))
        } else {
            self.queue.push_back(Queued {
                action,
                gate,
                pending,
            });
            None
        }
    }

    fn release(&mut self, action: Action, pending: PendingCommand) -> Outgoing {
        self.interactive = false;
        self.last_reply = None;
        self.current = Some(pending);
        match action {
            Action::Command(cmd) => Outgoing::Line {
                key: CorrelationKey::Current,
                line: cmd.wire_line(None),
            },
            Action::Interrupt => Outgoing::Interrupt {
                key: CorrelationKey::Current,
            },
        }
    }

    /// Release the first queued command whose gate still holds, the ones in front of it
    /// fail with a precondition error and never reach the debugger.
    fn release_next(&mut self, state: &SessionState) -> (Vec<Resolution>, Option<Outgoing>) {
        let mut rejected = vec![];
        if !self.interactive || self.current.is_some() {
            return (rejected, None);
        }

        while let Some(queued) = self.queue.pop_front() {
            match queued.gate.check(state) {
                Ok(()) => return (rejected, Some(self.release(queued.action, queued.pending))),
                Err(e) => {
                    mux_debug!("queued {} rejected: {e}", queued.gate.command);
                    rejected.push(queued.pending.resolve(Err(e)));
                }
            }
        }
        (rejected, None)
    }

    fn on_record(&mut self, record: &Record) -> Vec<Resolution> {
        if self.current.is_none() {
            return vec![];
        }

        // gdb prints no prompt after `^exit`
        if record.kind == RecordKind::Result && record.class == "exit" {
            self.last_reply = None;
            return self
                .current
                .take()
                .map(|pending| pending.resolve(reply(record)))
                .into_iter()
                .collect();
        }

        if record.kind == RecordKind::Result || record.category == OutputCategory::Exec {
            self.last_reply = Some(record.clone());
        }
        vec![]
    }

    fn on_terminator(&mut self, state: &SessionState) -> (Vec<Resolution>, Option<Outgoing>) {
        self.interactive = true;

        let mut resolutions = vec![];
        if let Some(pending) = self.current.take() {
            match self.last_reply.take() {
                Some(record) => resolutions.push(pending.resolve(reply(&record))),
                None => {
                    // a prompt without any reply belongs to earlier async output, keep waiting
                    self.current = Some(pending);
                    self.interactive = false;
                    return (resolutions, None);
                }
            }
        }

        let (rejected, outgoing) = self.release_next(state);
        resolutions.extend(rejected);
        (resolutions, outgoing)
    }

    fn abandon(
        &mut self,
        key: CorrelationKey,
        error: SessionError,
        state: &SessionState,
    ) -> (Vec<Resolution>, Option<Outgoing>) {
        if key != CorrelationKey::Current {
            return (vec![], None);
        }
        let mut resolutions = vec![];
        if let Some(pending) = self.current.take() {
            self.interactive = true;
            resolutions.push(pending.resolve(Err(error)));
        }
        let (rejected, outgoing) = self.release_next(state);
        resolutions.extend(rejected);
        (resolutions, outgoing)
    }

    fn drain(&mut self) -> Vec<PendingCommand> {
        self.current
            .take()
            .into_iter()
            .chain(self.queue.drain(..).map(|q| q.pending))
            .collect()
    }

    fn in_flight(&self) -> usize {
        self.current.iter().count() + self.queue.len()
    }
}

/// Reply correlation with a strategy chosen once at session construction.
pub enum Correlator {
    Token(TokenCorrelator),
    Serialized(SerialQueue),
}

impl Correlator {
    pub fn new(strategy: CorrelationStrategy) -> Self {
        match strategy {
            CorrelationStrategy::Token => Correlator::Token(TokenCorrelator::default()),
            CorrelationStrategy::Serialized => Correlator::Serialized(SerialQueue::default()),
        }
    }

    pub fn strategy(&self) -> CorrelationStrategy {
        match self {
            Correlator::Token(_) => CorrelationStrategy::Token,
            Correlator::Serialized(_) => CorrelationStrategy::Serialized,
        }
    }

    /// Register a command, return control channel work if it may be issued right now.
    ///
    /// The caller has already checked `gate`, a serialized queue checks it again
    /// when the command leaves the queue.
    pub fn submit(
        &mut self,
        action: Action,
        gate: Gate,
        continuation: Continuation,
    ) -> Option<Outgoing> {
        match self {
            Correlator::Token(c) => Some(c.submit(action, continuation)),
            Correlator::Serialized(q) => q.submit(action, gate, continuation),
        }
    }

    /// Observe a classified record (in arrival order).
    pub fn on_record(&mut self, record: &Record) -> Vec<Resolution> {
        match self {
            Correlator::Token(c) => c.on_record(record),
            Correlator::Serialized(q) => q.on_record(record),
        }
    }

    /// Debugger returned to interactive mode.
    pub fn on_terminator(&mut self, state: &SessionState) -> (Vec<Resolution>, Option<Outgoing>) {
        match self {
            Correlator::Token(_) => (vec![], None),
            Correlator::Serialized(q) => q.on_terminator(state),
        }
    }

    /// Fail a command that never reached the debugger (write failure).
    pub fn abandon(
        &mut self,
        key: CorrelationKey,
        error: SessionError,
        state: &SessionState,
    ) -> (Vec<Resolution>, Option<Outgoing>) {
        match self {
            Correlator::Token(c) => (
                c.abandon(key)
                    .map(|pending| pending.resolve(Err(error)))
                    .into_iter()
                    .collect(),
                None,
            ),
            Correlator::Serialized(q) => q.abandon(key, error, state),
        }
    }

    /// Take every outstanding command, used at teardown.
    pub fn drain(&mut self) -> Vec<PendingCommand> {
        match self {
            Correlator::Token(c) => c.drain(),
            Correlator::Serialized(q) => q.drain(),
        }
    }

    pub fn in_flight(&self) -> usize {
        match self {
            Correlator::Token(c) => c.in_flight(),
            Correlator::Serialized(q) => q.in_flight(),
        }
    }
}
