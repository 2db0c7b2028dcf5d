//! Signal plumbing.
//!
//! Two per-session tokio tasks: one relays termination-style signals to
//! the child, the other records terminal-resize notifications. Both are
//! launched by `start()` and aborted by `stop()`.

use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use super::controller::SessionShared;

/// Relays SIGINT, SIGTERM and SIGHUP to the child for the lifetime of
/// the running session.
///
/// Registering the streams takes the three signals out of their default
/// dispositions, so the manager is not killed in the child's stead; the
/// child decides how to handle its own interrupt. The task is purely a
/// forwarding relay and never initiates shutdown itself.
pub(crate) fn spawn_signal_forwarder(child: Pid, shared: Arc<SessionShared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut interrupt) = forward_stream(SignalKind::interrupt()) else {
            return;
        };
        let Some(mut terminate) = forward_stream(SignalKind::terminate()) else {
            return;
        };
        let Some(mut hangup) = forward_stream(SignalKind::hangup()) else {
            return;
        };

        loop {
            let sig = tokio::select! {
                _ = interrupt.recv() => Signal::SIGINT,
                _ = terminate.recv() => Signal::SIGTERM,
                _ = hangup.recv() => Signal::SIGHUP,
            };
            if !shared.is_running() {
                break;
            }
            tracing::debug!(signal = ?sig, pid = child.as_raw(), "relaying signal to shell");
            let _ = kill(child, sig);
        }
    })
}

/// Watches for the terminal-resize OS notification and records it in the
/// shared `resize_pending` flag. The handler body is one atomic store;
/// the active resize path stays `ShellSession::notify_resize`.
pub(crate) fn spawn_winch_watcher(shared: Arc<SessionShared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut winch) = forward_stream(SignalKind::window_change()) else {
            return;
        };
        while winch.recv().await.is_some() {
            shared.set_resize_pending();
        }
    })
}

fn forward_stream(kind: SignalKind) -> Option<tokio::signal::unix::Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(err) => {
            tracing::warn!(error = %err, signal_kind = ?kind, "failed to register signal stream");
            None
        }
    }
}
