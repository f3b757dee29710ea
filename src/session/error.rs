use crate::session::state::Violation;
use nix::unistd::Pid;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // --------------------------------- command errors --------------------------------------------
    #[error("{command}: {violation}")]
    Precondition {
        command: &'static str,
        violation: Violation,
    },
    #[error("debugger rejected command: {0}")]
    Rejected(String),
    #[error("debug session terminated")]
    Terminated,
    #[error("{0} is not supported in this deployment mode")]
    Unsupported(&'static str),
    #[error("no inferior process to interrupt")]
    NoInferior,

    // --------------------------------- setup errors ----------------------------------------------
    #[error("create program channel {path}: {source}")]
    ResourceSetup {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("open pseudo-terminal: {0}")]
    Pty(nix::Error),
    #[error("debugger executable `{0}` not found")]
    DebuggerNotFound(String),
    #[error("spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // --------------------------------- syscall errors --------------------------------------------
    #[error("send signal to {0}: {1}")]
    Signal(Pid, nix::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// True if the error is reported synchronously, before anything reaches the debugger.
    pub fn is_precondition(&self) -> bool {
        matches!(self, SessionError::Precondition { .. })
    }

    /// Return a hint to a caller - the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Precondition { .. } => false,
            SessionError::Rejected(_) => false,
            SessionError::Unsupported(_) => false,
            SessionError::NoInferior => false,
            SessionError::Signal(_, _) => false,
            SessionError::Io(_) => false,

            SessionError::Terminated => true,
            SessionError::ResourceSetup { .. } => true,
            SessionError::Pty(_) => true,
            SessionError::DebuggerNotFound(_) => true,
            SessionError::Spawn { .. } => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: $crate::log::TARGET, "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: $crate::log::TARGET, concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(::log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(::log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(::log::debug, $res, $msg)
    };
}
