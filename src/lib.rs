//! Session controller for the GDB machine interface.
//!
//! One debugger process, one control channel: commands go in, classified records come
//! out as events, replies are correlated with the commands that caused them.

pub mod log;
pub mod mi;
pub mod session;
pub mod version;

pub use session::{Session, SessionConfig, SessionError, SessionEvent};
