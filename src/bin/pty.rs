//! pty - run a program on a pseudoterminal
//!
//! The target program's exit status becomes ours. Usage errors exit 2 with a
//! short message; any other failure prints one diagnostic and exits 1.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use pty_relay::cli::CliArgs;
use pty_relay::Session;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();

    match run(&args) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("pty: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(args: &CliArgs) -> pty_relay::Result<i32> {
    let config = args.session_config()?;
    tracing::debug!("Starting session: {:?}", config);

    let session = Session::start(&args.command, config)?;
    session.run()
}
