use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString, IntoStaticStr};

pub use crate::session::dispatch::CorrelationStrategy;

/// Where the debugee runs and how its I/O reaches the session.
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Debugger spawned locally, program I/O through named pipes.
    #[default]
    Local,
    /// Debugger connected to a spawned gdbserver, program I/O through a pseudo-terminal.
    Remote,
    /// Control streams supplied by the caller, program I/O not managed.
    Detached,
}

/// How `pause` interrupts a running program.
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterruptStrategy {
    /// Send SIGINT to every known inferior directly.
    Signal,
    /// `-exec-interrupt` command.
    Native,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// gdbserver executable.
    pub server: String,
    pub host: String,
    /// Listening port, a free one is chosen if not set.
    pub port: Option<u16>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: "gdbserver".to_string(),
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }
}

impl RemoteConfig {
    pub fn addr(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }
}

/// Debug session configuration.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Debugger executable, path or a name looked up in `PATH`.
    pub debugger: String,
    /// Extra debugger arguments, `--interpreter=mi` is always added.
    pub debugger_args: Vec<String>,
    pub mode: Mode,
    pub correlation: CorrelationStrategy,
    /// Pause strategy, defaults to `signal` in local mode and `native` otherwise.
    pub interrupt: Option<InterruptStrategy>,
    /// Directory for program pipes, system temp dir if not set.
    pub temp_dir: Option<PathBuf>,
    /// Capacity of each recent records log.
    pub history_capacity: usize,
    /// Breakpoints inserted by every `load`, for example `main` or `prog.c:28`.
    pub breakpoints: Vec<String>,
    pub remote: RemoteConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debugger: "gdb".to_string(),
            debugger_args: vec![],
            mode: Mode::default(),
            correlation: CorrelationStrategy::default(),
            interrupt: None,
            temp_dir: None,
            history_capacity: 100,
            breakpoints: vec![],
            remote: RemoteConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file, missing fields take default values.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn interrupt_strategy(&self) -> InterruptStrategy {
        self.interrupt.unwrap_or(match self.mode {
            Mode::Local => InterruptStrategy::Signal,
            Mode::Remote | Mode::Detached => InterruptStrategy::Native,
        })
    }

    pub fn pipes_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
