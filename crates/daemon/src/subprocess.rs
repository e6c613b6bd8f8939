//! Shared child-process plumbing for the subprocess drivers.

use std::process::ExitStatus;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// How a supervised child finished.
pub(crate) enum WaitOutcome {
    /// Child exited on its own
    Exited(ExitStatus),
    /// Cancellation fired; the child was signalled and reaped
    Cancelled,
}

/// Wait for the child to exit, terminating it if the token fires first.
///
/// The child is reaped on both paths.
pub(crate) async fn wait_or_cancel(
    child: &mut Child,
    cancel: &CancellationToken,
) -> std::io::Result<WaitOutcome> {
    tokio::select! {
        status = child.wait() => Ok(WaitOutcome::Exited(status?)),
        _ = cancel.cancelled() => {
            terminate(child);
            let _ = child.wait().await;
            Ok(WaitOutcome::Cancelled)
        }
    }
}

/// Ask the child to terminate gracefully. No escalation to a forced kill;
/// media tools flush their output on termination.
#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signalling our own child process
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        log::warn!("No graceful termination on this platform for pid {}", pid);
    }
}
