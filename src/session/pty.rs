//! PTY allocation and shell spawning.
//!
//! Wraps the forkpty/exec sequence that attaches a command shell to a
//! fresh pseudo-terminal, plus the small descriptor helpers the session
//! layer needs (non-blocking mode, window size, liveness probe).

use std::ffi::CStr;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::kill;
use nix::sys::termios::{cfmakeraw, tcgetattr, Termios};
use nix::unistd::{access, execv, AccessFlags, Pid};
use thiserror::Error;

/// Shell binaries probed in order when spawning a session. The first
/// executable candidate wins.
pub const SHELL_CANDIDATES: [&CStr; 2] = [c"/bin/bash", c"/bin/sh"];

/// Status the child exits with when replacing its image with the shell
/// fails, distinct from any shell's own exit codes.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Terminal allocation or fork failed; the session never became
    /// running.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// A write to the shell's terminal failed for a reason other than
    /// transient non-blocking backpressure.
    #[error("failed to write to shell: {0}")]
    WriteFailed(String),

    /// The window-size update on the pty failed.
    #[error("failed to resize terminal: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parent-side handle to a freshly spawned shell: the pty master
/// descriptor and the child process id.
pub struct ShellPty {
    /// Master side of the pty pair, already in non-blocking mode.
    pub master: OwnedFd,
    /// Process id of the shell child.
    pub child: Pid,
}

impl ShellPty {
    /// Allocates a pseudo-terminal, forks, and execs a command shell in
    /// the child with the pty slave as its controlling terminal.
    ///
    /// The child probes [`SHELL_CANDIDATES`] in order and execs the
    /// first executable one with no arguments, inheriting this process's
    /// environment; interactivity is determined purely by the attached
    /// controlling terminal. If the exec fails the child terminates with
    /// [`EXEC_FAILURE_STATUS`].
    ///
    /// The master descriptor is switched to non-blocking mode before the
    /// handle is returned.
    pub fn spawn(cols: u16, rows: u16, termios: Option<Termios>) -> Result<Self, SessionError> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: the child branch only touches pre-built C strings and
        // calls access/execv/_exit before any return path.
        let fork = unsafe { forkpty(Some(&winsize), termios.as_ref()) }
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        match fork {
            ForkptyResult::Child => {
                let mut shell = SHELL_CANDIDATES[SHELL_CANDIDATES.len() - 1];
                for candidate in SHELL_CANDIDATES {
                    if access(candidate, AccessFlags::X_OK).is_ok() {
                        shell = candidate;
                        break;
                    }
                }
                let _ = execv(shell, &[shell]);
                // SAFETY: _exit is the only safe way out of a forked
                // child whose exec failed.
                unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(master.as_fd())?;
                tracing::info!(pid = child.as_raw(), cols, rows, "spawned shell on pty");
                Ok(Self { master, child })
            }
        }
    }
}

/// Returns the caller's terminal attributes when standard input is a
/// terminal, or a raw-mode default otherwise.
pub(crate) fn terminal_attributes() -> Termios {
    match tcgetattr(io::stdin()) {
        Ok(term) => term,
        Err(_) => raw_termios(),
    }
}

fn raw_termios() -> Termios {
    // SAFETY: an all-zero termios is a valid starting point; cfmakeraw
    // overwrites every field that matters for raw mode.
    let raw: libc::termios = unsafe { std::mem::zeroed() };
    let mut term = Termios::from(raw);
    cfmakeraw(&mut term);
    term
}

/// Puts a descriptor into non-blocking mode.
fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), SessionError> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    Ok(())
}

/// Updates the pty's advertised window dimensions.
pub fn set_window_size(fd: BorrowedFd<'_>, cols: u16, rows: u16) -> Result<(), SessionError> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ with a valid winsize pointer on a valid
    // descriptor.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
    if rc < 0 {
        return Err(SessionError::ResizeFailed(
            io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

/// Reads back the pty's advertised window dimensions as `(cols, rows)`.
pub fn window_size(fd: BorrowedFd<'_>) -> Result<(u16, u16), SessionError> {
    let mut winsize = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes into the winsize we own.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize) };
    if rc < 0 {
        return Err(SessionError::ResizeFailed(
            io::Error::last_os_error().to_string(),
        ));
    }
    Ok((winsize.ws_col, winsize.ws_row))
}

/// Zero-signal liveness probe: does `pid` still exist?
pub fn process_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::sys::wait::waitpid;

    fn reap(pty: &ShellPty) {
        let _ = kill(pty.child, Signal::SIGKILL);
        let _ = waitpid(pty.child, None);
    }

    #[test]
    fn spawn_creates_live_child() {
        let pty = ShellPty::spawn(80, 24, None).expect("failed to spawn shell");
        assert!(pty.child.as_raw() > 0);
        assert!(process_alive(pty.child));
        reap(&pty);
    }

    #[test]
    fn spawn_applies_requested_dimensions() {
        let pty = ShellPty::spawn(100, 30, None).expect("failed to spawn shell");
        let (cols, rows) = window_size(pty.master.as_fd()).expect("failed to query winsize");
        assert_eq!((cols, rows), (100, 30));
        reap(&pty);
    }

    #[test]
    fn window_size_roundtrip() {
        let pty = ShellPty::spawn(80, 24, None).expect("failed to spawn shell");
        set_window_size(pty.master.as_fd(), 120, 40).expect("failed to set winsize");
        let (cols, rows) = window_size(pty.master.as_fd()).expect("failed to query winsize");
        assert_eq!((cols, rows), (120, 40));
        reap(&pty);
    }

    #[test]
    fn liveness_probe_detects_reaped_child() {
        let pty = ShellPty::spawn(80, 24, None).expect("failed to spawn shell");
        let pid = pty.child;
        reap(&pty);
        assert!(!process_alive(pid));
    }

    #[test]
    fn raw_termios_is_usable_as_template() {
        // The fallback template must at least round-trip through spawn.
        let pty = ShellPty::spawn(80, 24, Some(raw_termios())).expect("failed to spawn shell");
        assert!(process_alive(pty.child));
        reap(&pty);
    }
}
