//! GDB/MI debug session.
//!
//! [`Session`] owns a debugger process (or caller supplied control streams), classifies
//! everything the debugger prints, tracks program state and correlates replies with
//! issued commands. Every command takes a continuation that is called exactly once:
//! synchronously if the command is rejected by the state machine, later with the
//! debugger reply, or with [`SessionError::Terminated`] if the session ends first.
//!
//! Continuations and event handlers are called from the control channel reader thread,
//! they may issue new commands but must not block waiting for their results.

pub mod channel;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod process;
pub mod state;

pub use channel::FifoSet;
pub use classifier::History;
pub use config::{InterruptStrategy, Mode, RemoteConfig, SessionConfig};
pub use dispatch::{CommandResult, Continuation, CorrelationStrategy};
pub use error::SessionError;
pub use event::{EventKind, ProcessRole, SessionEvent, SubscriptionId};
pub use state::{Execution, Inferior, Lifecycle};

use crate::mi::{quote_arg, Framer, GdbMiParser, Record};
use crate::session::channel::ChannelManager;
use crate::session::classifier::Classifier;
use crate::session::dispatch::{Action, Correlator, Gate, MiCommand, Outgoing};
use crate::session::event::EventBus;
use crate::session::process::{DebuggerProcess, ProcessOutcome};
use crate::session::state::{Requirement, SessionState};
use crate::version::Version;
use crate::{mux_debug, mux_info, mux_warn, weak_error};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use strum::IntoEnumIterator;

const READ_BUF_SIZE: usize = 4096;

type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Readiness gate: program channels are usable and the debugger printed its first prompt.
#[derive(Default)]
struct Readiness {
    channels: bool,
    interactive: bool,
    registered: bool,
    callback: Option<ReadyCallback>,
}

impl Readiness {
    fn is_open(&self) -> bool {
        self.channels && self.interactive
    }

    fn take_if_open(&mut self) -> Option<ReadyCallback> {
        if self.is_open() {
            self.callback.take()
        } else {
            None
        }
    }
}

struct Core {
    state: SessionState,
    correlator: Correlator,
    classifier: Classifier,
    readiness: Readiness,
    terminated: bool,
    /// One-time debugger setup already done by an earlier load.
    setup: Vec<Setup>,
}

/// Load steps that are issued once per debugger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Setup {
    AsyncMode,
    TargetConnected,
}

/// One step of a command sequence, `setup` is recorded once the step succeeds.
struct Step {
    command: &'static str,
    mi: MiCommand,
    setup: Option<Setup>,
}

impl Step {
    fn new(command: &'static str, mi: MiCommand) -> Self {
        Self {
            command,
            mi,
            setup: None,
        }
    }

    fn setup(command: &'static str, mi: MiCommand, setup: Setup) -> Self {
        Self {
            command,
            mi,
            setup: Some(setup),
        }
    }
}

/// Command admission: label for error messages, state requirement and wire action.
struct Request {
    command: &'static str,
    requirement: Requirement,
    action: Action,
    starts_program: bool,
}

impl Request {
    fn new(command: &'static str, requirement: Requirement, action: Action) -> Self {
        Self {
            command,
            requirement,
            action,
            starts_program: false,
        }
    }

    fn mi(command: &'static str, requirement: Requirement, name: &str, args: Vec<String>) -> Self {
        Self::new(
            command,
            requirement,
            Action::Command(MiCommand::new(name, args)),
        )
    }
}

struct Shared {
    config: SessionConfig,
    core: Mutex<Core>,
    ready_cv: Condvar,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    events: Arc<EventBus>,
    channels: ChannelManager,
    debugger_pid: Option<Pid>,
    server_pid: Option<Pid>,
    server_addr: Option<String>,
}

impl Shared {
    fn new(
        config: SessionConfig,
        events: Arc<EventBus>,
        channels: ChannelManager,
        writer: Box<dyn Write + Send>,
        debugger_pid: Option<Pid>,
        server: Option<(Pid, String)>,
    ) -> Self {
        let core = Core {
            state: SessionState::default(),
            correlator: Correlator::new(config.correlation),
            classifier: Classifier::new(Box::new(GdbMiParser::new()), config.history_capacity),
            readiness: Readiness::default(),
            terminated: false,
            setup: vec![],
        };
        let (server_pid, server_addr) = server.unzip();

        Self {
            config,
            core: Mutex::new(core),
            ready_cv: Condvar::new(),
            writer: Mutex::new(Some(writer)),
            events,
            channels,
            debugger_pid,
            server_pid,
            server_addr,
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_ready(&self) {
        let callback = {
            let mut core = self.core();
            core.readiness.channels = true;
            self.ready_cv.notify_all();
            core.readiness.take_if_open()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Classify a chunk under the lock, then act on the results without it.
    fn process_chunk(&self, chunk: &str) {
        mux_debug!("<- {}", chunk.trim_end());

        let ingested = {
            let mut core = self.core();
            let core = &mut *core;
            core.classifier
                .ingest(chunk, &mut core.state, &mut core.correlator)
        };

        for event in &ingested.events {
            self.events.emit(event);
        }
        for (continuation, result) in ingested.resolutions {
            continuation(result);
        }

        // waiters are released only after the first prompt chunk is delivered
        if ingested.first_terminator {
            let ready = {
                let mut core = self.core();
                core.readiness.interactive = true;
                self.ready_cv.notify_all();
                core.readiness.take_if_open()
            };
            if let Some(ready) = ready {
                ready();
            }
        }
        if let Some(outgoing) = ingested.outgoing {
            self.perform(outgoing);
        }
    }

    fn submit(&self, request: Request, continuation: Continuation) {
        let admitted = {
            let mut core = self.core();
            let check = if core.terminated {
                Err(SessionError::Terminated)
            } else {
                core.state
                    .check(request.requirement)
                    .map_err(|violation| SessionError::Precondition {
                        command: request.command,
                        violation,
                    })
            };

            let check = check.and_then(|_| {
                if request.starts_program {
                    self.channels.attach()?;
                    core.state.activate();
                }
                Ok(())
            });

            // a started program must still be ours when a queued run is released
            let requirement = if request.starts_program {
                Requirement::Active
            } else {
                request.requirement
            };
            match check {
                Ok(()) => Ok(core.correlator.submit(
                    request.action,
                    Gate::new(request.command, requirement),
                    continuation,
                )),
                Err(e) => Err((e, continuation)),
            }
        };

        match admitted {
            Ok(Some(outgoing)) => self.perform(outgoing),
            Ok(None) => {}
            Err((e, continuation)) => {
                mux_debug!("{} rejected: {e}", request.command);
                continuation(Err(e));
            }
        }
    }

    /// Issue commands one after another, stop at the first failure.
    fn submit_sequence(
        self: &Arc<Self>,
        requirement: Requirement,
        mut steps: VecDeque<Step>,
        continuation: Continuation,
    ) {
        let Some(Step { command, mi, setup }) = steps.pop_front() else {
            return;
        };

        let next: Continuation = if steps.is_empty() {
            continuation
        } else {
            let weak = Arc::downgrade(self);
            Box::new(move |result: CommandResult| match (result, weak.upgrade()) {
                (Ok(_), Some(shared)) => {
                    if let Some(setup) = setup {
                        shared.core().setup.push(setup);
                    }
                    shared.submit_sequence(requirement, steps, continuation);
                }
                (Ok(_), None) => continuation(Err(SessionError::Terminated)),
                (Err(e), _) => continuation(Err(e)),
            })
        };

        self.submit(
            Request::new(command, requirement, Action::Command(mi)),
            next,
        );
    }

    /// Write a command or deliver an interrupt, a failure fails only this command.
    fn perform(&self, outgoing: Outgoing) {
        let (key, result) = match outgoing {
            Outgoing::Line { key, line } => (key, self.write_line(&line)),
            Outgoing::Interrupt { key } => (key, self.interrupt_inferiors()),
        };

        if let Err(e) = result {
            mux_warn!("command {key:?} not delivered: {e}");
            let (resolutions, next) = {
                let mut core = self.core();
                let core = &mut *core;
                core.correlator.abandon(key, e, &core.state)
            };
            for (continuation, result) in resolutions {
                continuation(result);
            }
            if let Some(next) = next {
                self.perform(next);
            }
        }
    }

    fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = writer.as_mut() else {
            return Err(SessionError::Terminated);
        };
        mux_debug!("-> {}", line.trim_end());
        writer.write_all(line.as_bytes())?;
        Ok(writer.flush()?)
    }

    fn interrupt_inferiors(&self) -> Result<(), SessionError> {
        let pids = self.core().state.inferior_pids();
        if pids.is_empty() {
            return Err(SessionError::NoInferior);
        }
        for pid in pids {
            mux_debug!("interrupt inferior {pid}");
            process::send_signal(pid, Signal::SIGINT)?;
        }
        Ok(())
    }

    /// Release everything once, fail outstanding commands.
    fn teardown(&self) -> bool {
        let pending = {
            let mut core = self.core();
            if core.terminated {
                return false;
            }
            core.terminated = true;
            core.state.deactivate();
            core.readiness.callback = None;
            self.ready_cv.notify_all();
            core.correlator.drain()
        };
        mux_info!("session teardown, {} command(s) outstanding", pending.len());

        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.channels.release();
        if let Some(pid) = self.server_pid {
            weak_error!(process::send_signal(pid, Signal::SIGKILL), "stop server:");
        }

        for command in pending {
            command.into_continuation()(Err(SessionError::Terminated));
        }
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn outcome_event(outcome: ProcessOutcome) -> SessionEvent {
    match outcome {
        ProcessOutcome::Exited { role, code, signal } => SessionEvent::Exit { role, code, signal },
        ProcessOutcome::Failed { role, message } => SessionEvent::Error { role, message },
    }
}

/// Read the control channel, frame it into chunks and feed them to the session.
fn spawn_control_reader(shared: &Arc<Shared>, mut source: impl Read + Send + 'static) {
    let weak = Arc::downgrade(shared);
    std::thread::spawn(move || {
        let mut framer = Framer::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    mux_warn!("read control channel: {e}");
                    break;
                }
            };
            let Some(shared) = weak.upgrade() else {
                return;
            };
            for chunk in framer.push(&buf[..n]) {
                shared.process_chunk(&chunk);
            }
        }

        if let Some(shared) = weak.upgrade() {
            if let Some(chunk) = framer.finish() {
                shared.process_chunk(&chunk);
            }
            mux_info!("debugger control channel closed");
            shared.events.emit(&SessionEvent::Disconnect);
            shared.teardown();
        }
    });
}

/// Issue a command and block until its continuation is called.
///
/// Must not be used from event handlers or continuations, they run on the thread
/// that delivers replies.
pub fn call(issue: impl FnOnce(Continuation)) -> CommandResult {
    let (tx, rx) = mpsc::channel();
    issue(Box::new(move |result: CommandResult| {
        _ = tx.send(result);
    }));
    rx.recv().unwrap_or(Err(SessionError::Terminated))
}

/// Like [`call`] but gives up after `timeout`.
pub fn call_timeout(timeout: Duration, issue: impl FnOnce(Continuation)) -> Option<CommandResult> {
    let (tx, rx) = mpsc::channel();
    issue(Box::new(move |result: CommandResult| {
        _ = tx.send(result);
    }));
    match rx.recv_timeout(timeout) {
        Ok(result) => Some(result),
        Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(SessionError::Terminated)),
        Err(mpsc::RecvTimeoutError::Timeout) => None,
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Handle of a debug session, clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Spawn the debugger (and gdbserver in remote mode) according to configuration.
    pub fn start(config: SessionConfig) -> Result<Self, SessionError> {
        let events = Arc::new(EventBus::new());
        let target: Arc<OnceLock<Weak<Shared>>> = Arc::default();
        let listening = Arc::new(AtomicBool::new(false));

        let (channels, server) = match config.mode {
            Mode::Local => (
                ChannelManager::local(&config.pipes_dir(), events.clone())?,
                None,
            ),
            Mode::Remote => {
                let channels = ChannelManager::remote(events.clone(), {
                    let target = target.clone();
                    let listening = listening.clone();
                    move || {
                        listening.store(true, Ordering::SeqCst);
                        if let Some(shared) = target.get().and_then(Weak::upgrade) {
                            shared.channels_ready();
                        }
                    }
                })?;
                let port = match config.remote.port {
                    Some(port) => port,
                    None => process::free_port(&config.remote.host)?,
                };
                let addr = config.remote.addr(port);
                let server =
                    process::spawn_server(&config.remote.server, &addr, channels.server_stdio()?)?;
                (channels, Some((server, addr)))
            }
            Mode::Detached => {
                return Err(SessionError::Unsupported(
                    "detached mode without control streams",
                ))
            }
        };

        let debugger = match DebuggerProcess::spawn(&config.debugger, &config.debugger_args) {
            Ok(debugger) => debugger,
            Err(e) => {
                if let Some((mut server, _)) = server {
                    weak_error!(server.kill(), "stop server:");
                    _ = server.wait();
                }
                return Err(e);
            }
        };
        let debugger_pid = debugger.pid();
        let DebuggerProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = debugger;

        let remote = config.mode == Mode::Remote;
        let server_info = server
            .as_ref()
            .map(|(server, addr)| (Pid::from_raw(server.id() as i32), addr.clone()));
        let shared = Arc::new(Shared::new(
            config,
            events,
            channels,
            Box::new(stdin),
            Some(debugger_pid),
            server_info,
        ));
        _ = target.set(Arc::downgrade(&shared));
        if !remote || listening.load(Ordering::SeqCst) {
            shared.channels_ready();
        }

        spawn_control_reader(&shared, stdout);

        let weak = Arc::downgrade(&shared);
        process::forward_lines(stderr, move |line| {
            if let Some(shared) = weak.upgrade() {
                shared.events.emit(&SessionEvent::DebuggerStderr(line));
            }
        });

        let weak = Arc::downgrade(&shared);
        process::watch(child, ProcessRole::Debugger, move |outcome| {
            if let Some(shared) = weak.upgrade() {
                shared.teardown();
                shared.events.emit(&outcome_event(outcome));
            }
        });

        if let Some((server, _)) = server {
            let weak = Arc::downgrade(&shared);
            process::watch(server, ProcessRole::Server, move |outcome| {
                if let Some(shared) = weak.upgrade() {
                    shared.events.emit(&outcome_event(outcome));
                }
            });
        }

        Ok(Session { shared })
    }

    /// Drive a debugger launched by someone else over its control streams,
    /// program I/O is not managed.
    pub fn from_streams(
        mut config: SessionConfig,
        control_in: impl Write + Send + 'static,
        control_out: impl Read + Send + 'static,
    ) -> Self {
        config.mode = Mode::Detached;
        let events = Arc::new(EventBus::new());
        let channels = ChannelManager::detached(events.clone());
        let shared = Arc::new(Shared::new(
            config,
            events,
            channels,
            Box::new(control_in),
            None,
            None,
        ));
        shared.channels_ready();
        spawn_control_reader(&shared, control_out);
        Session { shared }
    }

    // ------------------------------------ observation --------------------------------------------

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.events.subscribe(kind, handler)
    }

    /// Subscribe one handler to every event kind.
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Vec<SubscriptionId> {
        let handler = Arc::new(handler);
        EventKind::iter()
            .map(|kind| {
                let handler = handler.clone();
                self.shared.events.subscribe(kind, move |e| handler(e))
            })
            .collect()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Register a readiness callback, only the first registration counts.
    /// Called once program channels are usable and the debugger is interactive.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let fire = {
            let mut core = self.shared.core();
            if core.readiness.registered || core.terminated {
                mux_debug!("readiness callback ignored");
                return;
            }
            core.readiness.registered = true;
            core.readiness.callback = Some(Box::new(callback));
            core.readiness.take_if_open()
        };
        if let Some(callback) = fire {
            callback();
        }
    }

    /// Block until the session is ready, return false on timeout or teardown.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let core = self.shared.core();
        let (core, _) = self
            .shared
            .ready_cv
            .wait_timeout_while(core, timeout, |core| {
                !core.readiness.is_open() && !core.terminated
            })
            .unwrap_or_else(PoisonError::into_inner);
        core.readiness.is_open() && !core.terminated
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.core().state.lifecycle()
    }

    pub fn execution(&self) -> Execution {
        self.shared.core().state.execution()
    }

    pub fn inferiors(&self) -> Vec<Inferior> {
        self.shared.core().state.inferiors().to_vec()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.core().terminated
    }

    /// Version from the debugger banner, if it was printed.
    pub fn debugger_version(&self) -> Option<Version> {
        self.shared.core().classifier.version()
    }

    pub fn recent_records(&self, history: History) -> Vec<Arc<Record>> {
        self.shared.core().classifier.history(history)
    }

    pub fn debugger_pid(&self) -> Option<Pid> {
        self.shared.debugger_pid
    }

    /// gdbserver address, remote mode only.
    pub fn server_addr(&self) -> Option<&str> {
        self.shared.server_addr.as_deref()
    }

    /// Program pipes, local mode only.
    pub fn fifos(&self) -> Option<&FifoSet> {
        self.shared.channels.fifos()
    }

    /// Where program stderr is written, local mode only.
    pub fn program_stderr(&self) -> Result<&Path, SessionError> {
        self.shared.channels.program_stderr()
    }

    pub fn correlation(&self) -> CorrelationStrategy {
        self.shared.core().correlator.strategy()
    }

    /// Number of commands waiting for a reply (or queued, in serialized mode).
    pub fn pending_commands(&self) -> usize {
        self.shared.core().correlator.in_flight()
    }

    // ------------------------------------ program control ----------------------------------------

    /// Load a program and set its arguments, does not start it.
    pub fn load(
        &self,
        program: &str,
        args: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        let shared = &self.shared;
        let done = shared.core().setup.clone();
        let mut steps = VecDeque::new();

        // sync mode gdb does not read `-exec-interrupt` while the program runs
        if shared.config.interrupt_strategy() == InterruptStrategy::Native
            && !done.contains(&Setup::AsyncMode)
        {
            steps.push_back(Step::setup(
                "load",
                MiCommand::new("-gdb-set", ["mi-async", "on"]),
                Setup::AsyncMode,
            ));
        }

        if let Some(addr) = shared.server_addr.as_deref() {
            if !done.contains(&Setup::TargetConnected) {
                steps.push_back(Step::setup(
                    "load",
                    MiCommand::new("-target-select", ["extended-remote", addr]),
                    Setup::TargetConnected,
                ));
            }
            steps.push_back(Step::new(
                "load",
                MiCommand::new(
                    "-gdb-set",
                    ["remote".to_string(), "exec-file".to_string(), quote_arg(program)],
                ),
            ));
        }

        steps.push_back(Step::new(
            "load",
            MiCommand::new("-file-exec-and-symbols", [quote_arg(program)]),
        ));
        for location in &shared.config.breakpoints {
            steps.push_back(Step::new(
                "load",
                MiCommand::new("-break-insert", [location.as_str()]),
            ));
        }
        let mut program_args = owned(args);
        program_args.extend(shared.channels.redirect_args());
        steps.push_back(Step::new(
            "load",
            MiCommand::new("-exec-arguments", program_args),
        ));

        shared.submit_sequence(Requirement::Idle, steps, Box::new(continuation));
    }

    /// Start the loaded program, the session becomes active.
    pub fn run(&self, args: &[&str], continuation: impl FnOnce(CommandResult) + Send + 'static) {
        let weak = Arc::downgrade(&self.shared);
        let continuation = move |result: CommandResult| {
            if let (Err(SessionError::Rejected(_)), Some(shared)) = (&result, weak.upgrade()) {
                let mut core = shared.core();
                if core.state.inferiors().is_empty() {
                    mux_info!("program did not start, session is idle");
                    core.state.deactivate();
                }
            }
            continuation(result);
        };

        let mut request = Request::mi("run", Requirement::Idle, "-exec-run", owned(args));
        request.starts_program = true;
        self.shared.submit(request, Box::new(continuation));
    }

    pub fn continue_execution(
        &self,
        args: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("continue", "-exec-continue", owned(args), continuation);
    }

    /// Interrupt the running program.
    pub fn pause(&self, continuation: impl FnOnce(CommandResult) + Send + 'static) {
        let action = match self.shared.config.interrupt_strategy() {
            InterruptStrategy::Signal => Action::Interrupt,
            InterruptStrategy::Native => {
                Action::Command(MiCommand::new("-exec-interrupt", Vec::<String>::new()))
            }
        };
        self.shared.submit(
            Request::new("pause", Requirement::ActiveRunning, action),
            Box::new(continuation),
        );
    }

    /// Kill the program, pausing it first if it is running.
    pub fn stop(&self, continuation: impl FnOnce(CommandResult) + Send + 'static) {
        let kill = Request::mi("stop", Requirement::Active, "kill", vec![]);

        let running = {
            let core = self.shared.core();
            !core.terminated
                && core.state.lifecycle() == Lifecycle::Active
                && core.state.execution() == Execution::Running
        };
        if !running {
            self.shared.submit(kill, Box::new(continuation));
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        self.pause(move |result: CommandResult| match (result, weak.upgrade()) {
            (Ok(_), Some(shared)) => shared.submit(kill, Box::new(continuation)),
            // program stopped on its own meanwhile
            (Err(e), Some(shared)) if e.is_precondition() => {
                shared.submit(kill, Box::new(continuation))
            }
            (Ok(_), None) => continuation(Err(SessionError::Terminated)),
            (Err(e), _) => continuation(Err(e)),
        });
    }

    pub fn step_over(&self, args: &[&str], continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("step over", "-exec-next", owned(args), continuation);
    }

    pub fn step_into(&self, args: &[&str], continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("step into", "-exec-step", owned(args), continuation);
    }

    pub fn step_out(&self, args: &[&str], continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("step out", "-exec-finish", owned(args), continuation);
    }

    // ------------------------------------ data -------------------------------------------------

    pub fn eval_expression(
        &self,
        expression: &str,
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command(
            "eval expression",
            "-data-evaluate-expression",
            vec![quote_arg(expression)],
            continuation,
        );
    }

    pub fn set_variable(
        &self,
        name: &str,
        value: &str,
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command(
            "set variable",
            "-data-evaluate-expression",
            vec![quote_arg(&format!("{name}={value}"))],
            continuation,
        );
    }

    pub fn list_variables(
        &self,
        args: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("list variables", "-stack-list-variables", owned(args), continuation);
    }

    pub fn call_stack(&self, args: &[&str], continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("call stack", "-stack-list-frames", owned(args), continuation);
    }

    pub fn selected_frame_info(&self, continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("selected frame info", "-stack-info-frame", vec![], continuation);
    }

    pub fn set_selected_frame(
        &self,
        frame: u32,
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command(
            "set selected frame",
            "-stack-select-frame",
            vec![frame.to_string()],
            continuation,
        );
    }

    // ------------------------------------ breakpoints ------------------------------------------

    pub fn insert_breakpoint(
        &self,
        args: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("insert breakpoint", "-break-insert", owned(args), continuation);
    }

    pub fn enable_breakpoints(
        &self,
        numbers: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("enable breakpoints", "-break-enable", owned(numbers), continuation);
    }

    pub fn disable_breakpoints(
        &self,
        numbers: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("disable breakpoints", "-break-disable", owned(numbers), continuation);
    }

    pub fn delete_breakpoints(
        &self,
        numbers: &[&str],
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.stopped_command("delete breakpoints", "-break-delete", owned(numbers), continuation);
    }

    pub fn list_breakpoints(&self, continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.stopped_command("list breakpoints", "-break-list", vec![], continuation);
    }

    fn stopped_command(
        &self,
        command: &'static str,
        name: &str,
        args: Vec<String>,
        continuation: impl FnOnce(CommandResult) + Send + 'static,
    ) {
        self.shared.submit(
            Request::mi(command, Requirement::ActiveStopped, name, args),
            Box::new(continuation),
        );
    }

    // ------------------------------------ debugger process -------------------------------------

    /// Ask the debugger to exit, resolved with the `^exit` reply. The session is torn down
    /// once the debugger closes its control channel.
    pub fn quit(&self, continuation: impl FnOnce(CommandResult) + Send + 'static) {
        self.shared.submit(
            Request::mi("quit", Requirement::Nothing, "-gdb-exit", vec![]),
            Box::new(continuation),
        );
    }

    /// Send a signal to the debugger process.
    pub fn kill(&self, signal: Signal) -> Result<(), SessionError> {
        let pid = self
            .shared
            .debugger_pid
            .ok_or(SessionError::Unsupported("signal to a detached debugger"))?;
        process::send_signal(pid, signal)
    }

    /// Release resources and fail outstanding commands, return false if already done.
    pub fn teardown(&self) -> bool {
        self.shared.teardown()
    }

    // ------------------------------------ program I/O ------------------------------------------

    pub fn write_program_input(&self, data: &[u8]) -> Result<(), SessionError> {
        self.shared.channels.write_program_input(data)
    }

    /// Copy `reader` into program stdin on a background thread.
    pub fn pipe_program_input(
        &self,
        mut reader: impl Read + Send + 'static,
    ) -> Result<(), SessionError> {
        if !self.shared.channels.input_supported() {
            return Err(SessionError::Unsupported("program input"));
        }

        let weak = Arc::downgrade(&self.shared);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        mux_debug!("program input source: {e}");
                        break;
                    }
                };
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if weak_error!(shared.channels.write_program_input(&buf[..n]), "program input:")
                    .is_none()
                {
                    break;
                }
            }
        });
        Ok(())
    }
}
