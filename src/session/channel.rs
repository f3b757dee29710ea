//! Program I/O endpoints.
//!
//! Depending on the deployment mode the debugee talks to the session through:
//! * three named pipes (local mode), passed to gdb as shell redirections of the program arguments;
//! * a pseudo-terminal (remote mode), the slave side becomes gdbserver stdio;
//! * nothing (detached mode), program I/O belongs to whoever launched the debugger.

use crate::session::error::SessionError;
use crate::session::event::{EventBus, SessionEvent};
use crate::{muted_error, mux_debug, mux_info, weak_error};
use nix::sys::stat::Mode;
use nix::sys::termios;
use nix::unistd::mkfifo;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Marker printed by gdbserver when it is ready to accept a debugger connection.
pub const SERVER_LISTENING: &str = "Listening on port";

const READ_BUF_SIZE: usize = 4096;

/// Decode UTF-8 across read boundaries, an incomplete trailing sequence
/// is carried to the next call.
#[derive(Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, data: &[u8]) -> String {
        self.carry.extend_from_slice(data);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(s) => {
                    text.push_str(s);
                    self.carry.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        None => {
                            self.carry.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Read a byte stream until EOF, hand decoded text to `on_text`.
fn pump(name: &str, mut source: impl Read, mut on_text: impl FnMut(String)) {
    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    on_text(text);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO on a pty master after the last slave fd is closed
                mux_debug!("{name} reader stopped: {e}");
                break;
            }
        }
    }
    mux_debug!("{name} reader finished");
}

/// Three named pipes for program stdin, stdout and stderr.
#[derive(Debug, Clone, PartialEq)]
pub struct FifoSet {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl FifoSet {
    /// Create FIFOs with unique names in `dir`, on failure already created ones are removed.
    pub fn create(dir: &Path) -> Result<Self, SessionError> {
        let base = format!(
            "gdbmux-{}-{:08x}",
            chrono::Local::now().format("%Y%m%d%H%M%S%3f"),
            rand::thread_rng().gen::<u32>()
        );

        let [stdin, stdout, stderr] =
            ["in", "out", "err"].map(|ext| dir.join(format!("{base}.{ext}")));
        let fifos = Self {
            stdin,
            stdout,
            stderr,
        };

        let paths = [&fifos.stdin, &fifos.stdout, &fifos.stderr];
        for (i, path) in paths.iter().enumerate() {
            if let Err(source) = mkfifo(*path, Mode::from_bits_truncate(0o644)) {
                for created in &paths[..i] {
                    muted_error!(std::fs::remove_file(created));
                }
                return Err(SessionError::ResourceSetup {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        Ok(fifos)
    }

    /// Shell redirections appended to the program arguments.
    pub fn redirections(&self) -> Vec<String> {
        vec![
            "<".to_string(),
            self.stdin.display().to_string(),
            ">".to_string(),
            self.stdout.display().to_string(),
            "2>".to_string(),
            self.stderr.display().to_string(),
        ]
    }

    /// Unblock readers stuck in `open` and remove pipes from the filesystem.
    fn remove(&self) {
        for path in [&self.stdout, &self.stderr] {
            // a reader blocked in open(O_RDONLY) returns once a writer appears,
            // ENXIO here just means nobody is waiting
            _ = OpenOptions::new()
                .write(true)
                .custom_flags(nix::libc::O_NONBLOCK)
                .open(path);
        }
        for path in [&self.stdin, &self.stdout, &self.stderr] {
            weak_error!(std::fs::remove_file(path), "remove fifo:");
        }
    }
}

enum Endpoints {
    Local {
        fifos: FifoSet,
        stdin: Mutex<Option<File>>,
        stdout_reader: Arc<AtomicBool>,
        stderr_reader: Arc<AtomicBool>,
    },
    Remote {
        master: Mutex<File>,
        slave: Mutex<Option<OwnedFd>>,
    },
    Detached,
}

/// Owner of program I/O endpoints of one session.
pub struct ChannelManager {
    endpoints: Endpoints,
    events: Arc<EventBus>,
    released: AtomicBool,
}

impl ChannelManager {
    /// Local mode, create FIFOs in `dir`.
    pub fn local(dir: &Path, events: Arc<EventBus>) -> Result<Self, SessionError> {
        let fifos = FifoSet::create(dir)?;
        mux_info!("program channels: {}", fifos.redirections().join(" "));
        Ok(Self {
            endpoints: Endpoints::Local {
                fifos,
                stdin: Mutex::new(None),
                stdout_reader: Arc::default(),
                stderr_reader: Arc::default(),
            },
            events,
            released: AtomicBool::new(false),
        })
    }

    /// Remote mode, open a pseudo-terminal and start reading its master side.
    /// `on_listening` is called once the server announces it accepts connections.
    pub fn remote(
        events: Arc<EventBus>,
        on_listening: impl Fn() + Send + 'static,
    ) -> Result<Self, SessionError> {
        let pty = nix::pty::openpty(None, None).map_err(SessionError::Pty)?;

        // raw mode: no input echo, no CRLF translation
        let mut attrs = termios::tcgetattr(&pty.slave).map_err(SessionError::Pty)?;
        termios::cfmakeraw(&mut attrs);
        termios::tcsetattr(&pty.slave, termios::SetArg::TCSANOW, &attrs)
            .map_err(SessionError::Pty)?;

        let master = File::from(pty.master);
        let reader = master.try_clone()?;
        std::thread::spawn({
            let events = events.clone();
            move || {
                let mut listening = false;
                pump("pty", reader, |text| {
                    if !listening && text.contains(SERVER_LISTENING) {
                        listening = true;
                        on_listening();
                    }
                    events.emit(&SessionEvent::ProgramOutput(text));
                })
            }
        });

        Ok(Self {
            endpoints: Endpoints::Remote {
                master: Mutex::new(master),
                slave: Mutex::new(Some(pty.slave)),
            },
            events,
            released: AtomicBool::new(false),
        })
    }

    /// Program I/O is not managed by the session.
    pub fn detached(events: Arc<EventBus>) -> Self {
        Self {
            endpoints: Endpoints::Detached,
            events,
            released: AtomicBool::new(false),
        }
    }

    /// Paths of program pipes, local mode only.
    pub fn fifos(&self) -> Option<&FifoSet> {
        match &self.endpoints {
            Endpoints::Local { fifos, .. } => Some(fifos),
            _ => None,
        }
    }

    /// Arguments appended to `-exec-arguments`.
    pub fn redirect_args(&self) -> Vec<String> {
        self.fifos().map(FifoSet::redirections).unwrap_or_default()
    }

    pub fn input_supported(&self) -> bool {
        !matches!(self.endpoints, Endpoints::Detached)
    }

    /// Where program stderr goes.
    pub fn program_stderr(&self) -> Result<&Path, SessionError> {
        match &self.endpoints {
            Endpoints::Local { fifos, .. } => Ok(&fifos.stderr),
            _ => Err(SessionError::Unsupported("program stderr")),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stdio for the gdbserver process (pty slave), can be taken once.
    pub fn server_stdio(&self) -> Result<(Stdio, Stdio, Stdio), SessionError> {
        let Endpoints::Remote { slave, .. } = &self.endpoints else {
            return Err(SessionError::Unsupported("server stdio"));
        };
        let slave = slave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SessionError::Unsupported("second server stdio"))?;
        let stdout = slave.try_clone()?;
        let stderr = slave.try_clone()?;
        Ok((Stdio::from(slave), Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// (Re)attach program endpoints before the program starts.
    pub fn attach(&self) -> Result<(), SessionError> {
        if self.is_released() {
            return Err(SessionError::Terminated);
        }

        let Endpoints::Local {
            fifos,
            stdin,
            stdout_reader,
            stderr_reader,
        } = &self.endpoints
        else {
            return Ok(());
        };

        {
            let mut stdin = stdin.lock().unwrap_or_else(PoisonError::into_inner);
            if stdin.is_none() {
                *stdin = Some(open_fifo_stdin(&fifos.stdin)?);
            }
        }

        self.spawn_fifo_reader(&fifos.stdout, stdout_reader, SessionEvent::ProgramOutput);
        self.spawn_fifo_reader(&fifos.stderr, stderr_reader, SessionEvent::ProgramError);
        Ok(())
    }

    fn spawn_fifo_reader(
        &self,
        path: &Path,
        active: &Arc<AtomicBool>,
        make_event: fn(String) -> SessionEvent,
    ) {
        if active.swap(true, Ordering::SeqCst) {
            return;
        }

        let path = path.to_path_buf();
        let active = active.clone();
        let events = self.events.clone();
        std::thread::spawn(move || {
            // blocks until the program opens its end of the pipe
            match File::open(&path) {
                Ok(file) => pump(&path.display().to_string(), file, |text| {
                    events.emit(&make_event(text))
                }),
                Err(e) => mux_debug!("open {}: {e}", path.display()),
            }
            active.store(false, Ordering::SeqCst);
        });
    }

    /// Write to program stdin.
    pub fn write_program_input(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.is_released() {
            return Err(SessionError::Terminated);
        }

        match &self.endpoints {
            Endpoints::Local { fifos, stdin, .. } => {
                let mut stdin = stdin.lock().unwrap_or_else(PoisonError::into_inner);
                if stdin.is_none() {
                    *stdin = Some(open_fifo_stdin(&fifos.stdin)?);
                }
                if let Some(file) = stdin.as_mut() {
                    file.write_all(data)?;
                    file.flush()?;
                }
                Ok(())
            }
            Endpoints::Remote { master, .. } => {
                let mut master = master.lock().unwrap_or_else(PoisonError::into_inner);
                master.write_all(data)?;
                Ok(master.flush()?)
            }
            Endpoints::Detached => Err(SessionError::Unsupported("program input")),
        }
    }

    /// Release endpoints, return false if already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        match &self.endpoints {
            Endpoints::Local { fifos, stdin, .. } => {
                stdin.lock().unwrap_or_else(PoisonError::into_inner).take();
                fifos.remove();
            }
            Endpoints::Remote { slave, .. } => {
                slave.lock().unwrap_or_else(PoisonError::into_inner).take();
            }
            Endpoints::Detached => {}
        }
        mux_debug!("program channels released");
        true
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open stdin pipe for both reading and writing so the open never blocks
/// and the program never sees EOF between writes.
fn open_fifo_stdin(path: &Path) -> Result<File, SessionError> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}
