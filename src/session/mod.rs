//! Shell session management.
//!
//! This module spawns an interactive shell on a pseudo-terminal and
//! manages its lifecycle: output streaming to a caller-supplied sink,
//! input forwarding, window resizing, termination-signal relay, and a
//! graceful-then-forced shutdown protocol.

pub mod controller;
pub mod pty;

mod reader;
mod signals;

pub use controller::{
    OutputSink, SessionState, ShellSession, DEFAULT_COLS, DEFAULT_ROWS, NOTICE_PREFIX, STOP_GRACE,
};
pub use pty::{SessionError, ShellPty, EXEC_FAILURE_STATUS, SHELL_CANDIDATES};
