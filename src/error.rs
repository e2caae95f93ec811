//! Error types for session operations.
//!
//! Every variant names the operation that failed and carries the OS error
//! that caused it. All of them are fatal at startup; the binary reports the
//! error once and exits.

use std::io;

/// Error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    PtsName(#[source] nix::Error),

    #[error("Failed to open PTY slave {path}: {source}")]
    OpenSlave {
        path: String,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to create session: {0}")]
    Setsid(#[source] nix::Error),

    #[error("Failed to set controlling terminal: {0}")]
    SetControllingTerminal(#[source] nix::Error),

    #[error("Failed to duplicate file descriptor: {0}")]
    Dup2(#[source] nix::Error),

    #[error("Can't execute {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to get terminal attributes: {0}")]
    GetAttr(#[source] nix::Error),

    #[error("Failed to set terminal attributes: {0}")]
    SetAttr(#[source] nix::Error),

    #[error("Failed to get window size: {0}")]
    GetWinsize(#[source] nix::Error),

    #[error("Failed to set window size: {0}")]
    SetWinsize(#[source] nix::Error),

    #[error("Failed to install {signal} handler: {source}")]
    SignalHandler {
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to create driver channel: {0}")]
    DriverChannel(#[source] io::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),

    #[error("Failed to send {signal} to child: {source}")]
    Kill {
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to close PTY master: {0}")]
    Close(#[source] nix::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
