//! Session orchestration
//!
//! A [`Session`] owns everything one invocation creates: the pty with the
//! target program on its slave side, the optional driver, the raw-mode guard
//! for the controlling terminal, and the relay between them.

use std::time::Duration;

use nix::libc::STDIN_FILENO;
use nix::sys::signal::Signal;

use crate::driver::{self, DriverCommand, DriverEnvironment};
use crate::error::Result;
use crate::process::Child;
use crate::pty::{Pty, SpawnOptions};
use crate::relay::{self, Endpoints, RelayConfig, SETTLE_DELAY};
use crate::terminal::{is_terminal, RawModeGuard, TerminalMode};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Treat stdin as a human's terminal: copy its mode to the slave and
    /// switch it to raw mode. Ignored when stdin is not a terminal.
    pub interactive: bool,
    /// Keep relaying output after our input ends
    pub ignore_eof: bool,
    /// Disable echo on the slave before running the target program
    pub suppress_echo: bool,
    /// Pause before the first read of input
    pub startup_delay: Duration,
    /// Report the slave device and driver on stderr
    pub verbose: bool,
    /// Program that drives the session instead of the terminal
    pub driver: Option<DriverCommand>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interactive: false,
            ignore_eof: false,
            suppress_echo: false,
            startup_delay: Duration::from_secs(1),
            verbose: false,
            driver: None,
        }
    }
}

impl SessionConfig {
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn ignore_eof(mut self, ignore_eof: bool) -> Self {
        self.ignore_eof = ignore_eof;
        self
    }

    pub fn suppress_echo(mut self, suppress_echo: bool) -> Self {
        self.suppress_echo = suppress_echo;
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn driver(mut self, driver: Option<DriverCommand>) -> Self {
        self.driver = driver;
        self
    }

    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            ignore_eof: self.ignore_eof,
            startup_delay: self.startup_delay,
        }
    }
}

/// One run of a target program on a pseudoterminal
pub struct Session {
    config: SessionConfig,
    pty: Pty,
    /// Mode of the controlling terminal, when it was captured
    saved_mode: Option<TerminalMode>,
}

impl Session {
    /// Allocate the pty and start `command` on its slave side.
    ///
    /// When interactive and stdin is a terminal, the slave starts with the
    /// terminal's mode and window size; otherwise with pty defaults.
    pub fn start<S: AsRef<str>>(command: &[S], config: SessionConfig) -> Result<Self> {
        let saved_mode = if config.interactive && is_terminal(STDIN_FILENO) {
            Some(TerminalMode::capture(STDIN_FILENO)?)
        } else {
            None
        };

        let options = SpawnOptions {
            mode: saved_mode.clone(),
            suppress_echo: config.suppress_echo,
        };
        let pty = Pty::spawn(command, &options)?;

        if config.verbose {
            eprintln!("slave name = {}", pty.slave_name());
            if let Some(driver) = &config.driver {
                eprintln!("driver = {}", driver);
            }
        }

        Ok(Self {
            config,
            pty,
            saved_mode,
        })
    }

    pub fn slave_name(&self) -> &str {
        self.pty.slave_name()
    }

    pub fn target(&self) -> &Child {
        self.pty.child()
    }

    /// Relay until the session ends and return the target's exit code.
    pub fn run(self) -> Result<i32> {
        let Session {
            config,
            pty,
            saved_mode,
        } = self;

        // Raw mode only when a human is on the terminal; a driver owns our
        // standard streams otherwise
        let raw_guard = match (&saved_mode, &config.driver) {
            (Some(mode), None) => Some(RawModeGuard::enter(STDIN_FILENO, mode)?),
            _ => None,
        };

        let driver = match &config.driver {
            Some(command) => {
                let env = DriverEnvironment::from_parent(pty.slave_name());
                Some(driver::attach(command, &env)?)
            },
            None => None,
        };

        let end = relay::run(Endpoints::standard(pty.master_fd()), &config.relay_config())?;
        tracing::debug!("Relay finished: {:?}", end);

        let target = pty.close()?;

        if let Some(driver) = driver {
            stop_driver(&driver);
        }

        let code = target.wait()?;
        tracing::debug!("Target exited with {}", code);

        drop(raw_guard);
        Ok(code)
    }
}

/// Give a driver that is still running a moment, then ask it to stop
fn stop_driver(driver: &Child) {
    match driver.try_wait() {
        Ok(Some(code)) => {
            tracing::debug!("Driver exited with {}", code);
            return;
        },
        Ok(None) => {},
        Err(e) => {
            tracing::debug!("Driver already reaped: {}", e);
            return;
        },
    }

    std::thread::sleep(SETTLE_DELAY);
    if let Ok(None) = driver.try_wait() {
        tracing::debug!("Terminating driver (pid {})", driver.pid());
        if let Err(e) = driver.signal(Signal::SIGTERM) {
            tracing::warn!("{}", e);
            return;
        }
        match driver.wait_timeout(SETTLE_DELAY) {
            Ok(Some(code)) => tracing::debug!("Driver exited with {}", code),
            Ok(None) => tracing::warn!("Driver (pid {}) ignored SIGTERM", driver.pid()),
            Err(e) => tracing::warn!("{}", e),
        }
    }
}
