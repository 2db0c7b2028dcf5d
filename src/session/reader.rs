//! Output reader loop.
//!
//! Multiplexes on the pty master descriptor and forwards everything the
//! shell writes to the session's output sink. Runs on the blocking pool
//! for the lifetime of one session run.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;

use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use super::controller::{OutputSink, SessionShared, NOTICE_PREFIX};

/// Upper bound for a single read from the master descriptor.
const READ_CHUNK: usize = 4096;

/// Poll timeout; bounds how long it takes the loop to observe a stop.
const POLL_INTERVAL_MS: u16 = 150;

/// Runs until the session stops, the stream ends, or the descriptor
/// reports an error/hangup condition. On exit for any reason the session
/// is marked stopped (idempotent with a concurrent `stop()`) and a
/// closed notice goes out through the sink.
pub(crate) fn output_loop(master: Arc<OwnedFd>, shared: Arc<SessionShared>, sink: OutputSink) {
    let mut buf = [0u8; READ_CHUNK];

    while shared.is_running() {
        let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
            // Timeout: re-check the running flag and go around.
            Ok(0) => continue,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(err) => {
                tracing::debug!(error = %err, "poll on pty master failed");
                break;
            }
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            tracing::debug!("pty master reported hangup");
            break;
        }
        if !revents.contains(PollFlags::POLLIN) {
            continue;
        }

        // SAFETY: reading into a valid buffer from a descriptor this
        // loop keeps open through its own clone.
        let n = unsafe {
            libc::read(
                master.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if n == 0 {
            // End of stream: the child side is gone.
            break;
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                continue;
            }
            tracing::debug!(error = %err, "read from pty master failed");
            break;
        }

        sink(String::from_utf8_lossy(&buf[..n as usize]).into_owned());
    }

    shared.mark_stopped();
    sink(format!("{NOTICE_PREFIX}pty closed\n"));
    tracing::debug!("output reader finished");
}
