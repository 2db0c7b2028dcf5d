//! Session controller.
//!
//! [`ShellSession`] is the façade coordinating pty spawning, the output
//! reader, signal relay, and the shutdown protocol. It owns the
//! session's mutable state and exposes the caller-facing lifecycle
//! operations: start, stop, write, resize-notify, and the running query.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tokio::task::JoinHandle;

use super::pty::{self, SessionError, ShellPty};
use super::reader;
use super::signals;

/// Fixed literal prefix carried by lifecycle notices on the output sink.
/// Content chunks are forwarded verbatim, without it, so a consumer can
/// separate passthrough bytes from status text.
pub const NOTICE_PREFIX: &str = "[ptysh] ";

/// Grace interval between the graceful-termination signal and escalation
/// to a forced kill.
pub const STOP_GRACE: Duration = Duration::from_millis(200);

/// Shorter grace used by the synchronous teardown in `Drop`, kept brief
/// so destruction never stalls an async runtime worker.
const DROP_GRACE: Duration = Duration::from_millis(20);

/// Default terminal dimensions used before any resize notification.
pub const DEFAULT_COLS: u16 = 80;
/// Default terminal dimensions used before any resize notification.
pub const DEFAULT_ROWS: u16 = 24;

/// Callback receiving one string per invocation: either a raw output
/// chunk (no framing guarantees, partial lines possible) or a lifecycle
/// notice prefixed with [`NOTICE_PREFIX`].
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

/// Lifecycle state of a session, visible to all concurrent contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No shell has been spawned yet.
    NotStarted = 0,
    /// A shell is attached and the background tasks are live.
    Running = 1,
    /// The session ended, by `stop()` or because the stream closed.
    Stopped = 2,
}

/// State shared between the controller and its background tasks.
///
/// All fields are single-word atomics; no mutex is needed because every
/// mutation is an independent flag or integer update.
pub(crate) struct SessionShared {
    state: AtomicU8,
    cols: AtomicU16,
    rows: AtomicU16,
    /// Set by the SIGWINCH watcher to coalesce resize bursts. Currently
    /// advisory: nothing consumes it yet.
    resize_pending: AtomicBool,
}

impl SessionShared {
    fn new(cols: u16, rows: u16) -> Self {
        Self {
            state: AtomicU8::new(SessionState::NotStarted as u8),
            cols: AtomicU16::new(cols),
            rows: AtomicU16::new(rows),
            resize_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            1 => SessionState::Running,
            2 => SessionState::Stopped,
            _ => SessionState::NotStarted,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SessionState::Running as u8
    }

    fn mark_running(&self) {
        self.state.store(SessionState::Running as u8, Ordering::SeqCst);
    }

    /// Idempotent: both the reader loop and `stop()` may call this.
    pub(crate) fn mark_stopped(&self) {
        self.state.store(SessionState::Stopped as u8, Ordering::SeqCst);
    }

    /// Signal-safe by construction: a single atomic store.
    pub(crate) fn set_resize_pending(&self) {
        self.resize_pending.store(true, Ordering::SeqCst);
    }

    fn dimensions(&self) -> (u16, u16) {
        (
            self.cols.load(Ordering::SeqCst),
            self.rows.load(Ordering::SeqCst),
        )
    }

    fn set_dimensions(&self, cols: u16, rows: u16) {
        self.cols.store(cols, Ordering::SeqCst);
        self.rows.store(rows, Ordering::SeqCst);
    }
}

/// Everything tied to one spawned shell. Torn down as a unit by `stop()`.
struct ActiveRun {
    /// Master descriptor; the reader task holds its own clone, so the fd
    /// closes only once both sides have released it.
    master: Arc<OwnedFd>,
    child: Pid,
    reader: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    winch: JoinHandle<()>,
}

/// One interactive shell session.
///
/// The controller owns at most one child process and one master
/// descriptor at a time. After `stop()` the same instance can be started
/// again; each start constructs a fresh run.
pub struct ShellSession {
    shared: Arc<SessionShared>,
    sink: Option<OutputSink>,
    run: Option<ActiveRun>,
}

impl ShellSession {
    /// Creates a session with the default terminal dimensions.
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_COLS, DEFAULT_ROWS)
    }

    /// Creates a session with the given initial terminal dimensions.
    pub fn with_dimensions(cols: u16, rows: u16) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(cols, rows)),
            sink: None,
            run: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Process id of the shell child, while a run is active.
    pub fn pid(&self) -> Option<i32> {
        self.run.as_ref().map(|run| run.child.as_raw())
    }

    /// True only while the running flag is set and the child still
    /// answers a zero-signal liveness probe.
    pub fn is_running(&self) -> bool {
        match &self.run {
            Some(run) => self.shared.is_running() && pty::process_alive(run.child),
            None => false,
        }
    }

    /// Spawns the shell and launches the background tasks.
    ///
    /// No-op if the session is already running. On spawn failure a
    /// failure notice is reported through `sink` and the session stays
    /// not-running. On success the reader and signal-forwarder tasks are
    /// launched, the SIGWINCH watcher is installed, and a startup notice
    /// is emitted.
    pub async fn start(&mut self, sink: OutputSink) -> Result<(), SessionError> {
        if self.is_running() {
            return Ok(());
        }
        if self.run.is_some() {
            // A previous run ended on its own; reap it before reuse.
            self.stop().await;
        }

        let (cols, rows) = self.shared.dimensions();
        let term = pty::terminal_attributes();

        let ShellPty { master, child } = match ShellPty::spawn(cols, rows, Some(term)) {
            Ok(pty) => pty,
            Err(err) => {
                tracing::warn!(error = %err, "shell spawn failed");
                sink(format!("{NOTICE_PREFIX}shell spawn failed: {err}\n"));
                return Err(err);
            }
        };
        let master = Arc::new(master);

        self.shared.mark_running();

        let reader = {
            let master = Arc::clone(&master);
            let shared = Arc::clone(&self.shared);
            let sink = Arc::clone(&sink);
            tokio::task::spawn_blocking(move || reader::output_loop(master, shared, sink))
        };
        let forwarder = signals::spawn_signal_forwarder(child, Arc::clone(&self.shared));
        let winch = signals::spawn_winch_watcher(Arc::clone(&self.shared));

        self.run = Some(ActiveRun {
            master,
            child,
            reader,
            forwarder,
            winch,
        });
        self.sink = Some(Arc::clone(&sink));

        tracing::info!(pid = child.as_raw(), "shell session started");
        sink(format!(
            "{NOTICE_PREFIX}shell session started (pid {})\n",
            child.as_raw()
        ));
        Ok(())
    }

    /// Terminates the session: graceful signal, grace interval, forced
    /// kill, reap, descriptor release, task joins, termination notice.
    ///
    /// Safe to call repeatedly and from teardown; calls after the first
    /// are no-ops.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        // Clear the flag first so the reader's next poll observes
        // termination instead of racing on the descriptor.
        self.shared.mark_stopped();

        terminate_child(run.child, STOP_GRACE).await;

        // Release our descriptor clone; the fd itself closes once the
        // reader task drops its own clone on exit.
        drop(run.master);

        run.forwarder.abort();
        run.winch.abort();
        let _ = run.reader.await;
        let _ = run.forwarder.await;
        let _ = run.winch.await;

        tracing::info!(pid = run.child.as_raw(), "shell session stopped");
        if let Some(sink) = &self.sink {
            sink(format!("{NOTICE_PREFIX}shell session terminated\n"));
        }
    }

    /// Forwards one line of input to the shell, appending a trailing
    /// newline if absent.
    ///
    /// No-op when the session is not running. A write failure other than
    /// transient non-blocking backpressure is fatal and triggers a full
    /// `stop()`.
    pub async fn write(&mut self, command: &str) -> Result<(), SessionError> {
        if !self.shared.is_running() {
            return Ok(());
        }
        let Some(run) = &self.run else {
            return Ok(());
        };

        let data = ensure_newline(command);
        // SAFETY: writing from a valid buffer to a descriptor the active
        // run keeps open.
        let rc = unsafe {
            libc::write(
                run.master.as_raw_fd(),
                data.as_ptr().cast::<libc::c_void>(),
                data.len(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(error = %err, "write to shell failed, stopping session");
                self.stop().await;
                return Err(SessionError::WriteFailed(err.to_string()));
            }
        }
        Ok(())
    }

    /// Updates the stored dimensions, the pty's window-size metadata, and
    /// nudges the child with SIGWINCH so full-screen programs redraw.
    ///
    /// No-op when the session is not running.
    pub fn notify_resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.shared.is_running() {
            return Ok(());
        }
        let Some(run) = &self.run else {
            return Ok(());
        };

        self.shared.set_dimensions(cols, rows);
        pty::set_window_size(run.master.as_fd(), cols, rows)?;
        let _ = kill(run.child, Signal::SIGWINCH);
        tracing::debug!(cols, rows, "resized shell terminal");
        Ok(())
    }
}

impl Default for ShellSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        // Synchronous best-effort teardown; the async `stop()` is the
        // graceful path. The reader task exits on its own once the flag
        // clears or the descriptor hangs up, and holds the last fd clone.
        let Some(run) = self.run.take() else {
            return;
        };
        self.shared.mark_stopped();
        let _ = kill(run.child, Signal::SIGTERM);
        std::thread::sleep(DROP_GRACE);
        if pty::process_alive(run.child) {
            let _ = kill(run.child, Signal::SIGKILL);
        }
        let _ = waitpid(run.child, None);
        run.forwarder.abort();
        run.winch.abort();
    }
}

/// Two-phase termination: graceful signal, bounded grace, forced kill,
/// reap. The reaped id is trusted to be the session's only child.
async fn terminate_child(child: Pid, grace: Duration) {
    let _ = kill(child, Signal::SIGTERM);
    tokio::time::sleep(grace).await;
    if pty::process_alive(child) {
        tracing::debug!(pid = child.as_raw(), "child survived SIGTERM, escalating");
        let _ = kill(child, Signal::SIGKILL);
    }
    let _ = waitpid(child, None);
}

/// Appends a trailing newline unless the command already ends with one.
/// Empty input is passed through untouched.
fn ensure_newline(command: &str) -> String {
    if command.is_empty() || command.ends_with('\n') {
        command.to_owned()
    } else {
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture_sink() -> (OutputSink, Arc<Mutex<String>>) {
        let captured = Arc::new(Mutex::new(String::new()));
        let writer = Arc::clone(&captured);
        let sink: OutputSink = Arc::new(move |chunk: String| {
            writer.lock().unwrap().push_str(&chunk);
        });
        (sink, captured)
    }

    #[test]
    fn ensure_newline_appends_exactly_once() {
        assert_eq!(ensure_newline("echo hello"), "echo hello\n");
        assert_eq!(ensure_newline("echo hello\n"), "echo hello\n");
        assert_eq!(ensure_newline(""), "");
    }

    #[test]
    fn shared_state_transitions() {
        let shared = SessionShared::new(80, 24);
        assert_eq!(shared.state(), SessionState::NotStarted);
        assert!(!shared.is_running());

        shared.mark_running();
        assert_eq!(shared.state(), SessionState::Running);
        assert!(shared.is_running());

        shared.mark_stopped();
        shared.mark_stopped();
        assert_eq!(shared.state(), SessionState::Stopped);
        assert!(!shared.is_running());
    }

    #[test]
    fn shared_dimensions_roundtrip() {
        let shared = SessionShared::new(80, 24);
        assert_eq!(shared.dimensions(), (80, 24));
        shared.set_dimensions(132, 43);
        assert_eq!(shared.dimensions(), (132, 43));
    }

    #[test]
    fn resize_pending_is_recorded() {
        let shared = SessionShared::new(80, 24);
        assert!(!shared.resize_pending.load(Ordering::SeqCst));
        shared.set_resize_pending();
        assert!(shared.resize_pending.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn resize_updates_pty_window_metadata() {
        let mut session = ShellSession::new();
        let (sink, _captured) = capture_sink();
        session.start(sink).await.expect("failed to start session");

        session
            .notify_resize(120, 40)
            .expect("failed to resize session");

        let master = session.run.as_ref().unwrap().master.as_fd();
        let (cols, rows) = pty::window_size(master).expect("failed to query winsize");
        assert_eq!((cols, rows), (120, 40));

        session.stop().await;
    }

    #[tokio::test]
    async fn start_is_noop_while_running() {
        let mut session = ShellSession::new();
        let (sink, _captured) = capture_sink();
        session.start(sink).await.expect("failed to start session");
        let pid = session.pid().unwrap();

        let (second_sink, second_captured) = capture_sink();
        session
            .start(second_sink)
            .await
            .expect("restart should be a no-op");
        assert_eq!(session.pid(), Some(pid));
        assert!(second_captured.lock().unwrap().is_empty());

        session.stop().await;
    }
}
