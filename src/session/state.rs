use crate::mux_warn;
use nix::unistd::Pid;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Debugger lifecycle: is a program being debugged right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Idle,
    Active,
}

/// Execution state of the debugee, driven by `exec` async records only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Execution {
    #[default]
    Stopped,
    Running,
}

/// Inferior (thread group) discovered from `thread-group-started` notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inferior {
    pub pid: Option<Pid>,
    pub group_id: String,
}

/// State a command needs before it may be written to the debugger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Nothing,
    Idle,
    Active,
    ActiveStopped,
    ActiveRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("not debugging a program")]
    NotDebugging,
    #[error("already debugging a program")]
    AlreadyDebugging,
    #[error("program is running")]
    ProgramRunning,
    #[error("program is already stopped")]
    ProgramStopped,
}

/// Two state axes of a debug session.
#[derive(Debug, Default)]
pub struct SessionState {
    lifecycle: Lifecycle,
    execution: Execution,
    inferiors: Vec<Inferior>,
}

impl SessionState {
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    pub fn inferiors(&self) -> &[Inferior] {
        &self.inferiors
    }

    pub fn inferior_pids(&self) -> Vec<Pid> {
        self.inferiors.iter().filter_map(|i| i.pid).collect()
    }

    /// Validate requirement against current state.
    pub fn check(&self, requirement: Requirement) -> Result<(), Violation> {
        use Execution::*;
        use Lifecycle::*;

        match (requirement, self.lifecycle, self.execution) {
            (Requirement::Nothing, _, _) => Ok(()),
            (Requirement::Idle, Active, _) => Err(Violation::AlreadyDebugging),
            (Requirement::Idle, Idle, _) => Ok(()),
            (_, Idle, _) => Err(Violation::NotDebugging),
            (Requirement::Active, Active, _) => Ok(()),
            (Requirement::ActiveStopped, Active, Running) => Err(Violation::ProgramRunning),
            (Requirement::ActiveStopped, Active, Stopped) => Ok(()),
            (Requirement::ActiveRunning, Active, Stopped) => Err(Violation::ProgramStopped),
            (Requirement::ActiveRunning, Active, Running) => Ok(()),
        }
    }

    /// Mark session as active (first execution command).
    pub fn activate(&mut self) {
        self.lifecycle = Lifecycle::Active;
    }

    /// Return to idle state, used at teardown and when program start fails.
    pub fn deactivate(&mut self) {
        self.lifecycle = Lifecycle::Idle;
        self.inferiors.clear();
    }

    /// Apply class of an `exec` async record, return true if execution state changed.
    pub fn apply_exec(&mut self, class: &str) -> bool {
        match Execution::from_str(class) {
            Ok(execution) => {
                let changed = self.execution != execution;
                self.execution = execution;
                changed
            }
            Err(_) => {
                mux_warn!("unexpected exec record class: {class}");
                false
            }
        }
    }

    pub fn inferior_started(&mut self, group_id: &str, pid: Option<Pid>) {
        self.inferiors.push(Inferior {
            pid,
            group_id: group_id.to_string(),
        });
    }

    /// Forget an exited inferior, return true if session became idle.
    pub fn inferior_exited(&mut self, group_id: &str) -> bool {
        self.inferiors.retain(|i| i.group_id != group_id);
        if self.inferiors.is_empty() && self.lifecycle == Lifecycle::Active {
            self.lifecycle = Lifecycle::Idle;
            return true;
        }
        false
    }
}
