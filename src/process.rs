//! Child process handles
//!
//! Handles for the processes a session forks: the target program, the
//! driver, and the input-forwarding relay unit.

use std::ffi::CString;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::libc::STDERR_FILENO;
use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::writer::write_fully;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A forked child process
#[derive(Debug)]
pub struct Child {
    pid: Pid,
}

impl Child {
    pub(crate) fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Get the child process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// A child killed by a signal reports `128 + signal`, the shell
    /// convention.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(code) = exit_code(status) {
                        return Ok(code);
                    }
                },
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(Error::Wait(e)),
            }
        }
    }

    /// Reap the child if it has already exited
    pub fn try_wait(&self) -> Result<Option<i32>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)).map_err(Error::Wait)? {
            WaitStatus::StillAlive => Ok(None),
            status => Ok(exit_code(status)),
        }
    }

    /// Wait up to `timeout` for the child to exit.
    ///
    /// Returns `None` if it is still running when the time is up.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(Some(code));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Send a signal to the child process
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.pid, signal).map_err(|source| Error::Kill { signal, source })
    }
}

/// Exit code for a terminal wait status, `None` for stop/continue events
pub fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// Build an argv vector, rejecting arguments with interior NUL bytes
pub(crate) fn to_cstrings<S: AsRef<str>>(args: &[S]) -> Result<Vec<CString>> {
    args.iter()
        .map(|arg| {
            CString::new(arg.as_ref())
                .map_err(|_| Error::InvalidArgument(format!("{:?} contains a NUL byte", arg.as_ref())))
        })
        .collect()
}

/// Report an error from inside a forked child and end that child.
///
/// Forked children never return into the orchestrator's control flow. The
/// message goes straight to descriptor 2, which is the slave or the real
/// terminal by now, bypassing any stderr capture inherited across fork.
pub(crate) fn exit_child(err: &Error) -> ! {
    let message = format!("pty: {}\n", err);
    let _ = write_fully(STDERR_FILENO, message.as_bytes());
    std::process::exit(1)
}
