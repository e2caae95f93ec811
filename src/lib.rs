//! pty-relay
//!
//! Runs an interactive program on a pseudoterminal while the controlling
//! process is itself driven by a script, a test harness, or another program.
//!
//! - `pty`: pty allocation and starting the target program on the slave
//! - `relay`: the two-process copy loop between outer streams and the master
//! - `driver`: splicing a driver program in front of the session
//! - `session`: the orchestrator tying the pieces together
//! - `terminal`: terminal mode snapshots and the raw-mode guard
//! - `writer`: write-everything helper tolerant of broken pipes

pub mod cli;
pub mod driver;
pub mod error;
pub mod process;
pub mod pty;
pub mod relay;
pub mod session;
pub mod signals;
pub mod terminal;
pub mod writer;

pub use error::{Error, Result};
pub use session::{Session, SessionConfig};
