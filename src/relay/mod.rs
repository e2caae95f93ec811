//! Relay loop
//!
//! Copies bytes between the outer endpoint (the real terminal, or the driver
//! channel) and the pty master for the lifetime of the session. The loop is
//! split across two processes that share no memory:
//!
//! - the input forwarder (a forked child) copies outer input to the master
//! - the output forwarder (this process) copies the master to outer output
//!
//! They coordinate shutdown only through SIGTERM. Whichever side finishes
//! first wakes the other: the input forwarder signals us after end of input
//! (unless end of input is ignored), and we signal it when the master reaches
//! end of file because the target program went away.

mod input;
mod output;

pub use input::{InputEnd, InputForwarder};
pub use output::{OutputEnd, OutputForwarder};

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, getpid, ForkResult};

use crate::error::{Error, Result};
use crate::process::{exit_child, Child};
use crate::pty::propagate_window_size;
use crate::signals::{self, SignalFlag};

/// Bytes moved per read
pub const BUFFER_SIZE: usize = 32768;

/// Written to the master once outer input ends, so the slave sees EOF
pub const END_OF_TRANSMISSION: u8 = 4;

/// Wait before waking the sibling unit or terminating a lingering driver
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Relay loop settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Keep relaying output after outer input ends
    pub ignore_eof: bool,
    /// Pause before the first read of outer input
    pub startup_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ignore_eof: false,
            startup_delay: Duration::from_secs(1),
        }
    }
}

/// Descriptors the relay copies between
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    /// Outer input, copied to the master
    pub input: RawFd,
    /// Outer output, receives everything read from the master
    pub output: RawFd,
    /// The pty master
    pub master: RawFd,
    /// Terminal whose geometry is copied to the master on resize
    pub geometry: RawFd,
}

impl Endpoints {
    /// Our standard streams against `master`.
    ///
    /// Geometry comes from stderr, which still points at the real terminal
    /// when a driver has taken over stdin and stdout.
    pub fn standard(master: RawFd) -> Self {
        Self {
            input: STDIN_FILENO,
            output: STDOUT_FILENO,
            master,
            geometry: STDERR_FILENO,
        }
    }
}

/// Run the relay until both halves have stopped.
///
/// Returns how the output half ended.
pub fn run(endpoints: Endpoints, config: &RelayConfig) -> Result<OutputEnd> {
    let resize = SignalFlag::resize();
    let terminate = SignalFlag::terminate();
    let resize_guard = resize.install()?;
    let terminate_guard = terminate.install()?;
    let orchestrator = getpid();

    // SAFETY: the child runs the input loop and exits without returning
    let input_unit = match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            // A termination request from the output side simply ends this
            // unit. The inherited disposition may restore the terminal, which
            // is the orchestrator's job alone.
            drop(terminate_guard);
            if let Err(e) = signals::reset_to_default(Signal::SIGTERM) {
                exit_child(&e);
            }

            let end = InputForwarder::new(endpoints, resize).run(config.startup_delay);
            tracing::debug!("Input forwarder stopped: {:?}", end);

            if !config.ignore_eof {
                std::thread::sleep(SETTLE_DELAY);
                let _ = kill(orchestrator, Signal::SIGTERM);
            }
            std::process::exit(0)
        },
        ForkResult::Parent { child } => Child::new(child),
    };

    let end = OutputForwarder::new(endpoints, resize, terminate).run();
    tracing::debug!("Output forwarder stopped: {:?}", end);

    if !terminate.is_raised() {
        if let Err(e) = input_unit.signal(Signal::SIGTERM) {
            tracing::debug!("Input forwarder already gone: {}", e);
        }
    }
    input_unit.wait()?;

    drop(terminate_guard);
    drop(resize_guard);
    Ok(end)
}

/// Copy the geometry terminal's window size to the master.
///
/// Failure is logged and otherwise ignored; the copy loop keeps running.
fn apply_resize(endpoints: &Endpoints, resize: &SignalFlag) {
    if let Err(e) = resize.rearm() {
        tracing::warn!("{}", e);
    }
    match propagate_window_size(endpoints.geometry, endpoints.master) {
        Ok(size) => tracing::debug!("Resized pty to {}x{}", size.cols, size.rows),
        Err(e) => tracing::warn!("Resize not applied: {}", e),
    }
}
