use crate::session::error::SessionError;
use crate::session::event::ProcessRole;
use crate::{mux_debug, mux_info, mux_warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

/// Interpreter flag, always passed after user supplied arguments.
pub const MI_INTERPRETER_ARG: &str = "--interpreter=mi";

/// How a watched process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    Exited {
        role: ProcessRole,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Failed {
        role: ProcessRole,
        message: String,
    },
}

/// Resolve an executable: existing path as is, otherwise lookup in `PATH`.
pub fn resolve_executable(program: &str) -> Result<PathBuf, SessionError> {
    if Path::new(program).exists() {
        return Ok(PathBuf::from(program));
    }
    which::which(program).map_err(|_| SessionError::DebuggerNotFound(program.to_string()))
}

/// Spawned debugger with its control streams.
pub struct DebuggerProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl DebuggerProcess {
    /// Spawn `<debugger> [args] --interpreter=mi` in its own process group.
    pub fn spawn(debugger: &str, args: &[String]) -> Result<Self, SessionError> {
        let path = resolve_executable(debugger)?;

        let mut child = Command::new(&path)
            .args(args)
            .arg(MI_INTERPRETER_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: path.display().to_string(),
                source,
            })?;
        mux_info!("debugger {} started, pid: {}", path.display(), child.id());

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            _ = child.kill();
            return Err(SessionError::Spawn {
                program: path.display().to_string(),
                source: std::io::Error::other("debugger stdio is not piped"),
            });
        };

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }
}

/// Spawn `gdbserver --multi <addr>` with given stdio (pty slave).
pub fn spawn_server(
    server: &str,
    addr: &str,
    stdio: (Stdio, Stdio, Stdio),
) -> Result<Child, SessionError> {
    let path = resolve_executable(server)?;
    let (stdin, stdout, stderr) = stdio;
    let child = Command::new(&path)
        .arg("--multi")
        .arg(addr)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(|source| SessionError::Spawn {
            program: path.display().to_string(),
            source,
        })?;
    mux_info!("server {} started at {addr}, pid: {}", path.display(), child.id());
    Ok(child)
}

/// Ask the OS for a free port on `host`.
pub fn free_port(host: &str) -> Result<u16, SessionError> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Wait for process end on a dedicated thread, `on_end` is called exactly once.
pub fn watch(
    mut child: Child,
    role: ProcessRole,
    on_end: impl FnOnce(ProcessOutcome) + Send + 'static,
) {
    std::thread::spawn(move || {
        let outcome = match child.wait() {
            Ok(status) => {
                mux_info!("{role} exited with {status}");
                ProcessOutcome::Exited {
                    role,
                    code: status.code(),
                    signal: status.signal(),
                }
            }
            Err(e) => {
                mux_warn!("wait for {role}: {e}");
                ProcessOutcome::Failed {
                    role,
                    message: e.to_string(),
                }
            }
        };
        on_end(outcome);
    });
}

/// Forward debugger stderr line by line.
pub fn forward_lines(
    stream: impl std::io::Read + Send + 'static,
    mut on_line: impl FnMut(String) + Send + 'static,
) {
    std::thread::spawn(move || {
        let mut stream = BufReader::new(stream);
        loop {
            let mut line = String::new();
            let Ok(size) = stream.read_line(&mut line) else {
                break;
            };
            if size == 0 {
                break;
            }
            on_line(line);
        }
        mux_debug!("debugger stderr closed");
    });
}

/// Send a signal to a process, a process that is already gone is not an error.
pub fn send_signal(pid: Pid, sig: Signal) -> Result<(), SessionError> {
    match signal::kill(pid, sig) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(SessionError::Signal(pid, e)),
    }
}
