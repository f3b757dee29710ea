use gdbmux::session::{
    CommandResult, Continuation, EventKind, Execution, InterruptStrategy, Session, SessionConfig,
};
use gdbmux::SessionEvent;
use std::io::{BufRead, BufReader, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Plays the debugger side of a detached session over a pair of pipes.
pub struct FakeGdb {
    commands: mpsc::Receiver<String>,
    output: Option<os_pipe::PipeWriter>,
}

impl FakeGdb {
    /// Print raw MI text to the session.
    pub fn send(&mut self, text: &str) {
        let output = self.output.as_mut().expect("fake gdb already hung up");
        output.write_all(text.as_bytes()).unwrap();
        output.flush().unwrap();
    }

    /// Print the interactive prompt.
    pub fn prompt(&mut self) {
        self.send("(gdb)\n");
    }

    /// Next command line written by the session (without line feed).
    pub fn expect_command(&self) -> String {
        self.commands
            .recv_timeout(TIMEOUT)
            .expect("session must write a command")
    }

    /// Nothing was written to the control channel.
    pub fn assert_silent(&self) {
        assert_eq!(
            self.commands.recv_timeout(Duration::from_millis(200)).ok(),
            None
        );
    }

    /// Read the next command, answer `<token>^<reply>` followed by a prompt.
    /// Return the command without its token.
    pub fn reply(&mut self, reply: &str) -> String {
        let line = self.expect_command();
        let (token, command) = split_token(&line);
        self.send(&format!("{token}^{reply}\n(gdb)\n"));
        command.to_string()
    }

    /// Close the control channel, like a crashed debugger.
    pub fn hang_up(&mut self) {
        self.output.take();
    }
}

/// Split `12-exec-run` into `("12", "-exec-run")`.
pub fn split_token(line: &str) -> (&str, &str) {
    let pos = line
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(line.len());
    line.split_at(pos)
}

/// Session driven by a fake debugger.
pub fn fake_session(config: SessionConfig) -> (Session, FakeGdb) {
    let (command_reader, command_writer) = os_pipe::pipe().unwrap();
    let (output_reader, output_writer) = os_pipe::pipe().unwrap();

    let session = Session::from_streams(config, command_writer, output_reader);

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let reader = BufReader::new(command_reader);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    (
        session,
        FakeGdb {
            commands: rx,
            output: Some(output_writer),
        },
    )
}

/// Ready session: banner and the first prompt are already printed.
pub fn ready_session(config: SessionConfig) -> (Session, FakeGdb) {
    let (session, mut gdb) = fake_session(config);
    gdb.send("=thread-group-added,id=\"i1\"\n~\"GNU gdb (GDB) 14.2\\n\"\n");
    gdb.prompt();
    assert!(session.wait_ready(TIMEOUT));
    (session, gdb)
}

/// Issue a command, the returned receiver gets its result.
pub fn issue(command: impl FnOnce(Continuation)) -> mpsc::Receiver<CommandResult> {
    let (tx, rx) = mpsc::channel();
    command(Box::new(move |result: CommandResult| {
        tx.send(result).unwrap();
    }));
    rx
}

/// Wait for a continuation result.
pub fn result(rx: &mpsc::Receiver<CommandResult>) -> CommandResult {
    rx.recv_timeout(TIMEOUT)
        .expect("continuation must be called")
}

/// Issue a command and return its result only if it was delivered synchronously.
pub fn sync_result(command: impl FnOnce(Continuation)) -> Option<CommandResult> {
    issue(command).try_recv().ok()
}

/// Collect events of given kinds in arrival order.
pub fn collect(session: &Session, kinds: &[EventKind]) -> Arc<Mutex<Vec<SessionEvent>>> {
    let events = Arc::new(Mutex::new(vec![]));
    for kind in kinds {
        let events = events.clone();
        session.subscribe(*kind, move |e| events.lock().unwrap().push(e.clone()));
    }
    events
}

/// Load and run a program, the fake debugger reports inferior `i1` with `pid`
/// stopped at `main`.
pub fn start_program(session: &Session, gdb: &mut FakeGdb, pid: i32) {
    let load = issue(|k| session.load("/bin/prog", &["arg"], k));
    if session.config().interrupt_strategy() == InterruptStrategy::Native {
        assert_eq!(gdb.reply("done"), "-gdb-set mi-async on");
    }
    assert_eq!(gdb.reply("done"), "-file-exec-and-symbols /bin/prog");
    assert_eq!(gdb.reply("done"), "-exec-arguments arg");
    result(&load).unwrap();

    let run = issue(|k| session.run(&[], k));
    let line = gdb.expect_command();
    let (token, command) = split_token(&line);
    assert_eq!(command, "-exec-run");
    gdb.send(&format!(
        "=thread-group-started,id=\"i1\",pid=\"{pid}\"\n=thread-created,id=\"1\",group-id=\"i1\"\n*running,thread-id=\"all\"\n{token}^running\n(gdb)\n"
    ));
    result(&run).unwrap();

    assert_eq!(session.execution(), Execution::Running);

    gdb.send("*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",frame={addr=\"0x1139\",func=\"main\",args=[],file=\"prog.c\",line=\"5\"},thread-id=\"1\"\n(gdb)\n");
    assert!(eventually(|| session.execution() == Execution::Stopped));
}

#[macro_export]
macro_rules! assert_precondition {
    ($result: expr, $violation: pat) => {
        match $result {
            Some(Err(gdbmux::SessionError::Precondition {
                violation: $violation,
                ..
            })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    };
}

/// Wait until `cond` holds.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
