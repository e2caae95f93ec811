//! Unix PTY implementation
//!
//! Allocates the pty pair and starts the target program on the slave side
//! using POSIX APIs.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::fcntl::{open, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt, PtyMaster};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, execvp, fork, setsid, ForkResult};

use crate::error::{Error, Result};
use crate::process::{exit_child, to_cstrings, Child};
use crate::signals;
use crate::terminal::{disable_echo, TerminalMode};

/// How the slave side is prepared for the target program
#[derive(Clone, Default)]
pub struct SpawnOptions {
    /// Mode and geometry to seed the slave with; pty defaults when `None`
    pub mode: Option<TerminalMode>,
    /// Turn off echo on the slave before exec
    pub suppress_echo: bool,
}

/// A pseudoterminal with the target program attached to its slave side
pub struct Pty {
    /// The PTY master file descriptor
    master: PtyMaster,
    /// Path of the slave device, e.g. /dev/pts/3
    slave_name: String,
    /// The target program
    child: Child,
}

impl Pty {
    /// Allocate a pty and run `command` on its slave side.
    ///
    /// `command[0]` is looked up on `PATH`; the rest are its arguments.
    pub fn spawn<S: AsRef<str>>(command: &[S], options: &SpawnOptions) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::InvalidArgument("no program to run".to_string()));
        }
        let argv = to_cstrings(command)?;

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(Error::OpenMaster)?;
        grantpt(&master).map_err(Error::GrantPty)?;
        unlockpt(&master).map_err(Error::UnlockPty)?;

        // SAFETY: ptsname is not thread-safe, but the session is single-threaded
        let slave_name = unsafe { ptsname(&master) }.map_err(Error::PtsName)?;

        // Open the slave here so it exists before the parent ever reads the master
        let slave = open_slave(&slave_name)?;
        if let Some(mode) = &options.mode {
            mode.apply(slave.as_raw_fd())?;
        }

        // SAFETY: the child only calls async-signal-safe functions before exec
        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Child => {
                drop(master);
                match exec_target(slave, &argv, options.suppress_echo) {
                    Ok(never) => match never {},
                    Err(err) => exit_child(&err),
                }
            },
            ForkResult::Parent { child } => {
                drop(slave);
                tracing::debug!("Spawned {} on {} (pid {})", command[0].as_ref(), slave_name, child);
                Ok(Pty {
                    master,
                    slave_name,
                    child: Child::new(child),
                })
            },
        }
    }

    /// Get the raw file descriptor of the PTY master
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Path of the slave device
    pub fn slave_name(&self) -> &str {
        &self.slave_name
    }

    /// The target program
    pub fn child(&self) -> &Child {
        &self.child
    }

    /// Close the master, handing back the target program to be reaped
    pub fn close(self) -> Result<Child> {
        close(self.master.into_raw_fd()).map_err(Error::Close)?;
        Ok(self.child)
    }
}

fn open_slave(path: &str) -> Result<OwnedFd> {
    let fd = open(path, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty()).map_err(|source| {
        Error::OpenSlave {
            path: path.to_string(),
            source,
        }
    })?;
    // SAFETY: open just returned this descriptor and nothing else owns it
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Runs in the forked child: make the slave our controlling terminal and
/// standard streams, then exec. Only returns on failure.
fn exec_target(slave: OwnedFd, argv: &[CString], suppress_echo: bool) -> Result<Infallible> {
    setsid().map_err(Error::Setsid)?;

    let slave_fd = slave.as_raw_fd();
    // SAFETY: TIOCSCTTY on a terminal we just opened, after setsid
    if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) } < 0 {
        return Err(Error::SetControllingTerminal(nix::errno::Errno::last()));
    }

    dup2(slave_fd, STDIN_FILENO).map_err(Error::Dup2)?;
    dup2(slave_fd, STDOUT_FILENO).map_err(Error::Dup2)?;
    dup2(slave_fd, STDERR_FILENO).map_err(Error::Dup2)?;
    if slave_fd > STDERR_FILENO {
        drop(slave);
    } else {
        let _ = slave.into_raw_fd();
    }

    if suppress_echo {
        disable_echo(STDIN_FILENO)?;
    }

    signals::reset_to_default(Signal::SIGPIPE)?;

    execvp(&argv[0], argv).map_err(|source| Error::Exec {
        program: argv[0].to_string_lossy().into_owned(),
        source,
    })
}
