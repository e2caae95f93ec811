//! Command line interface
//!
//! Flags mirror the classic `pty` tool. Everything from the program name on
//! belongs to the target program, including arguments that look like flags.

use std::time::Duration;

use clap::Parser;
use nix::libc::STDIN_FILENO;

use crate::driver::DriverCommand;
use crate::error::Result;
use crate::session::SessionConfig;
use crate::terminal::is_terminal;

/// CLI arguments for pty
#[derive(Parser, Debug, Clone)]
#[command(name = "pty")]
#[command(version)]
#[command(about = "Run a program on a pseudoterminal, relayed to this terminal or a driver", long_about = None)]
#[command(override_usage = "pty [-d driver] [-einv] [-t seconds] [--] program [arg ...]")]
pub struct CliArgs {
    /// Driver/coprocess that talks to the program instead of the terminal
    #[arg(short = 'd', value_name = "CMD")]
    pub driver: Option<String>,

    /// Turn off echo on the slave pty's line discipline
    #[arg(short = 'e')]
    pub no_echo: bool,

    /// Ignore end of file on stdin
    #[arg(short = 'i')]
    pub ignore_eof: bool,

    /// Non-interactive mode, even when stdin is a terminal
    #[arg(short = 'n')]
    pub non_interactive: bool,

    /// Print the slave device name (and driver) to stderr
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Delay the first read from stdin for a clean pty setup
    #[arg(short = 't', value_name = "SECONDS", default_value_t = 1)]
    pub delay: u64,

    /// Program to run and its arguments
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, value_name = "PROGRAM")]
    pub command: Vec<String>,
}

impl CliArgs {
    /// Build the session configuration.
    ///
    /// Interactive mode is on when stdin is a terminal, unless `-n` is given.
    pub fn session_config(&self) -> Result<SessionConfig> {
        self.session_config_with(is_terminal(STDIN_FILENO))
    }

    fn session_config_with(&self, stdin_is_terminal: bool) -> Result<SessionConfig> {
        let driver = self.driver.as_deref().map(DriverCommand::parse).transpose()?;
        Ok(SessionConfig::default()
            .interactive(stdin_is_terminal && !self.non_interactive)
            .ignore_eof(self.ignore_eof)
            .suppress_echo(self.no_echo)
            .startup_delay(Duration::from_secs(self.delay))
            .verbose(self.verbose)
            .driver(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("pty").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["cat"]).unwrap();
        assert_eq!(args.command, ["cat"]);
        assert_eq!(args.delay, 1);
        assert!(args.driver.is_none());
        assert!(!args.no_echo && !args.ignore_eof && !args.non_interactive && !args.verbose);
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&["-d", "./drive.sh", "-ein", "-v", "-t", "3", "sh", "-c", "echo hi"]).unwrap();
        assert_eq!(args.driver.as_deref(), Some("./drive.sh"));
        assert!(args.no_echo && args.ignore_eof && args.non_interactive && args.verbose);
        assert_eq!(args.delay, 3);
        assert_eq!(args.command, ["sh", "-c", "echo hi"]);
    }

    #[test]
    fn test_program_flags_belong_to_program() {
        let args = parse(&["-v", "cat", "-n", "-e"]).unwrap();
        assert!(args.verbose);
        assert!(!args.no_echo);
        assert_eq!(args.command, ["cat", "-n", "-e"]);
    }

    #[test]
    fn test_double_dash() {
        let args = parse(&["-i", "--", "ls", "-l"]).unwrap();
        assert!(args.ignore_eof);
        assert_eq!(args.command, ["ls", "-l"]);
    }

    #[test]
    fn test_missing_program_is_usage_error() {
        let err = parse(&["-v"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = parse(&["-x", "cat"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["-h"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse(&["-V"]).unwrap_err().kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_session_config_mapping() {
        let args = parse(&["-e", "-t", "0", "-d", "drive --fast", "cat"]).unwrap();
        let config = args.session_config_with(true).unwrap();
        assert!(config.interactive);
        assert!(config.suppress_echo);
        assert_eq!(config.startup_delay, Duration::ZERO);
        assert_eq!(config.driver.unwrap().argv(), ["drive", "--fast"]);
    }

    #[test]
    fn test_non_interactive_flag_wins() {
        let args = parse(&["-n", "cat"]).unwrap();
        assert!(!args.session_config_with(true).unwrap().interactive);
        let args = parse(&["cat"]).unwrap();
        assert!(!args.session_config_with(false).unwrap().interactive);
    }
}
