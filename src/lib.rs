//! # ptysh
//!
//! Interactive shell sessions on a pseudo-terminal, with asynchronous
//! output streaming and lifecycle management.
//!
//! ## Overview
//!
//! The crate manages exactly one shell session per [`ShellSession`]
//! instance. Starting a session allocates a pty pair, forks, and execs a
//! command shell with the pty slave as its controlling terminal. While
//! the session runs:
//!
//! - a reader loop multiplexes on the master descriptor and forwards
//!   every output chunk to a caller-supplied sink,
//! - a signal forwarder relays SIGINT/SIGTERM/SIGHUP to the child so it
//!   can handle its own termination signals,
//! - a SIGWINCH watcher records external terminal-resize notifications.
//!
//! Stopping is a two-phase protocol: a graceful-termination signal, a
//! short grace interval, then a forced kill and reap.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ptysh::session::{OutputSink, ShellSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sink: OutputSink = Arc::new(|chunk: String| print!("{chunk}"));
//!
//!     let mut session = ShellSession::new();
//!     session.start(sink).await?;
//!     session.write("echo hello").await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration for the console binary
//! - [`session`]: pty spawning and session lifecycle management

pub mod config;
pub mod session;

// Re-export the main types for convenience
pub use config::{Config, ConfigError};
pub use session::{
    OutputSink, SessionError, SessionState, ShellPty, ShellSession, NOTICE_PREFIX,
};
