//! Driver attachment
//!
//! A driver is a program that stands in for the human at the terminal. It is
//! spliced in front of the session through a connected pair of Unix stream
//! sockets: the driver's stdin and stdout are one end, the orchestrator's
//! stdin and stdout become the other. The driver's stderr goes to the
//! orchestrator's original stdin, which is the real terminal when there is
//! one, so its diagnostics stay visible.

use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::Signal;
use nix::unistd::{dup2, execvpe, fork, ForkResult};

use crate::error::{Error, Result};
use crate::process::{exit_child, to_cstrings, Child};
use crate::signals;

/// Variable that tells the driver which slave device it is driving
pub const SLAVE_ENV_VAR: &str = "PTY_SLAVE";

/// Conventional variables copied from our environment when set
const COPIED_ENV_VARS: [&str; 5] = ["USER", "LOGNAME", "PATH", "HOME", "TERM"];

/// Optional variable passed through only when present
const PASSTHROUGH_ENV_VAR: &str = "RUST_LOG";

/// The driver program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommand {
    argv: Vec<String>,
}

impl DriverCommand {
    /// Parse a `-d` value: whitespace-separated program and arguments
    pub fn parse(command: &str) -> Result<Self> {
        let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err(Error::InvalidArgument("empty driver command".to_string()));
        }
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for DriverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// The complete environment handed to the driver.
///
/// Built once from a small whitelist; the driver gets exactly these pairs
/// and nothing else from the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEnvironment {
    vars: Vec<(OsString, OsString)>,
}

impl DriverEnvironment {
    /// Curate the driver environment from this process's environment
    pub fn from_parent(slave_name: &str) -> Self {
        Self::from_lookup(slave_name, |name| std::env::var_os(name))
    }

    /// Curate the driver environment using `lookup` to read variables.
    ///
    /// Variables `lookup` does not find are left out.
    pub fn from_lookup<F>(slave_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut vars: Vec<(OsString, OsString)> = COPIED_ENV_VARS
            .iter()
            .copied()
            .chain(std::iter::once(PASSTHROUGH_ENV_VAR))
            .filter_map(|name| lookup(name).map(|value| (OsString::from(name), value)))
            .collect();
        vars.push((SLAVE_ENV_VAR.into(), slave_name.into()));
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_os_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `NAME=value` strings for exec
    fn to_cstrings(&self) -> Result<Vec<CString>> {
        self.vars
            .iter()
            .map(|(key, value)| {
                let mut pair = key.as_bytes().to_vec();
                pair.push(b'=');
                pair.extend_from_slice(value.as_bytes());
                CString::new(pair).map_err(|_| {
                    Error::InvalidArgument(format!("environment variable {:?} contains a NUL byte", key))
                })
            })
            .collect()
    }
}

/// Start the driver and connect our stdin and stdout to it.
///
/// Must run before the relay starts, since the relay copies whatever our
/// standard streams are at that point. Returns the driver process.
pub fn attach(command: &DriverCommand, env: &DriverEnvironment) -> Result<Child> {
    let argv = to_cstrings(command.argv())?;
    let envp = env.to_cstrings()?;

    let (ours, theirs) = UnixStream::pair().map_err(Error::DriverChannel)?;
    let ours = OwnedFd::from(ours);
    let theirs = OwnedFd::from(theirs);

    // SAFETY: the child only rewires descriptors and execs
    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            drop(ours);
            match exec_driver(theirs, &argv, &envp) {
                Ok(never) => match never {},
                Err(err) => exit_child(&err),
            }
        },
        ForkResult::Parent { child } => {
            drop(theirs);
            dup2(ours.as_raw_fd(), STDIN_FILENO).map_err(Error::Dup2)?;
            dup2(ours.as_raw_fd(), STDOUT_FILENO).map_err(Error::Dup2)?;
            tracing::debug!("Driver {} attached (pid {})", command, child);
            Ok(Child::new(child))
        },
    }
}

/// Runs in the forked child. Only returns on failure.
fn exec_driver(channel: OwnedFd, argv: &[CString], envp: &[CString]) -> Result<Infallible> {
    dup2(STDIN_FILENO, STDERR_FILENO).map_err(Error::Dup2)?;
    dup2(channel.as_raw_fd(), STDIN_FILENO).map_err(Error::Dup2)?;
    dup2(channel.as_raw_fd(), STDOUT_FILENO).map_err(Error::Dup2)?;
    drop(channel);

    signals::reset_to_default(Signal::SIGPIPE)?;

    execvpe(&argv[0], argv, envp).map_err(|source| Error::Exec {
        program: argv[0].to_string_lossy().into_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_driver_command() {
        let cmd = DriverCommand::parse("  ./drive.sh --fast  5 ").unwrap();
        assert_eq!(cmd.argv(), ["./drive.sh", "--fast", "5"]);
        assert_eq!(cmd.to_string(), "./drive.sh --fast 5");
    }

    #[test]
    fn test_parse_empty_driver_command() {
        assert!(matches!(
            DriverCommand::parse("   "),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_environment_whitelist() {
        let env = DriverEnvironment::from_lookup(
            "/dev/pts/7",
            lookup_in(&[
                ("USER", "alice"),
                ("PATH", "/usr/bin:/bin"),
                ("HOME", "/home/alice"),
                ("TERM", "xterm"),
                ("SECRET_TOKEN", "hunter2"),
            ]),
        );

        assert_eq!(env.get("USER"), Some(OsStr::new("alice")));
        assert_eq!(env.get("PATH"), Some(OsStr::new("/usr/bin:/bin")));
        assert_eq!(env.get("HOME"), Some(OsStr::new("/home/alice")));
        assert_eq!(env.get("TERM"), Some(OsStr::new("xterm")));
        assert_eq!(env.get(SLAVE_ENV_VAR), Some(OsStr::new("/dev/pts/7")));
        assert_eq!(env.get("SECRET_TOKEN"), None);
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn test_missing_variables_are_omitted() {
        let env = DriverEnvironment::from_lookup("/dev/pts/1", lookup_in(&[("PATH", "/bin")]));
        assert_eq!(env.get("HOME"), None);
        assert_eq!(env.get("TERM"), None);
        assert_eq!(env.get(PASSTHROUGH_ENV_VAR), None);
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_passthrough_included_when_present() {
        let env = DriverEnvironment::from_lookup(
            "/dev/pts/1",
            lookup_in(&[(PASSTHROUGH_ENV_VAR, "debug")]),
        );
        assert_eq!(env.get(PASSTHROUGH_ENV_VAR), Some(OsStr::new("debug")));
    }

    #[test]
    fn test_environment_exec_strings() {
        let env = DriverEnvironment::from_lookup("/dev/pts/2", lookup_in(&[("HOME", "/root")]));
        let strings = env.to_cstrings().unwrap();
        assert_eq!(
            strings,
            vec![
                CString::new("HOME=/root").unwrap(),
                CString::new("PTY_SLAVE=/dev/pts/2").unwrap(),
            ]
        );
    }
}
