//! Controlling terminal mode handling
//!
//! [`TerminalMode`] is a snapshot of a terminal's line discipline settings and
//! window geometry. [`RawModeGuard`] puts the controlling terminal into raw
//! mode and restores the snapshot exactly once, whichever way the process
//! leaves: guard drop, panic, or a fatal signal.

use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Once;

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::error::{Error, Result};
use crate::pty::{get_window_size, set_window_size, WindowSize};

/// Terminal attributes and window size captured from a terminal
#[derive(Clone)]
pub struct TerminalMode {
    termios: Termios,
    size: WindowSize,
}

impl TerminalMode {
    /// Capture the current mode of the terminal on `fd`
    pub fn capture(fd: RawFd) -> Result<Self> {
        // SAFETY: the caller passes a descriptor that stays open for this call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let termios = termios::tcgetattr(borrowed).map_err(Error::GetAttr)?;
        let size = get_window_size(fd)?;
        Ok(Self { termios, size })
    }

    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Copy this mode onto another terminal, typically a fresh pty slave
    pub fn apply(&self, fd: RawFd) -> Result<()> {
        // SAFETY: the caller passes a descriptor that stays open for this call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        termios::tcsetattr(borrowed, SetArg::TCSANOW, &self.termios).map_err(Error::SetAttr)?;
        set_window_size(fd, self.size)
    }
}

/// Whether `fd` refers to a terminal
pub fn is_terminal(fd: RawFd) -> bool {
    // SAFETY: isatty only inspects the descriptor
    unsafe { libc::isatty(fd) == 1 }
}

/// Turn off echo and its line-editing companions on the terminal on `fd`
pub fn disable_echo(fd: RawFd) -> Result<()> {
    // SAFETY: the caller passes a descriptor that stays open for this call
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut attrs = termios::tcgetattr(borrowed).map_err(Error::GetAttr)?;
    attrs.local_flags.remove(
        LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHONL,
    );
    termios::tcsetattr(borrowed, SetArg::TCSANOW, &attrs).map_err(Error::SetAttr)
}

/// Mode to put back on the controlling terminal. Owned by whichever exit
/// path swaps it out first.
struct SavedMode {
    fd: RawFd,
    termios: libc::termios,
}

static SAVED_MODE: AtomicPtr<SavedMode> = AtomicPtr::new(ptr::null_mut());
static PANIC_HOOK: Once = Once::new();

/// Signals whose default action would leave the terminal raw
const FATAL_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Restore the saved mode if no other exit path has done so yet.
///
/// Async-signal-safe when `free` is false.
fn restore_saved_mode(free: bool) -> bool {
    let saved = SAVED_MODE.swap(ptr::null_mut(), Ordering::SeqCst);
    if saved.is_null() {
        return false;
    }
    // SAFETY: the pointer came from Box::into_raw and was swapped out exactly once
    unsafe {
        libc::tcsetattr((*saved).fd, libc::TCSAFLUSH, &(*saved).termios);
        if free {
            drop(Box::from_raw(saved));
        }
    }
    true
}

extern "C" fn restore_and_reraise(signo: libc::c_int) {
    restore_saved_mode(false);
    // SAFETY: signal and raise are async-signal-safe
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
        libc::raise(signo);
    }
}

/// Holds the controlling terminal in raw mode until dropped
pub struct RawModeGuard {
    previous_handlers: Vec<(Signal, SigAction)>,
}

impl RawModeGuard {
    /// Put the terminal on `fd` into raw mode.
    ///
    /// `original` is the mode restored on exit; it should have been captured
    /// from the same descriptor.
    pub fn enter(fd: RawFd, original: &TerminalMode) -> Result<Self> {
        let mut raw = original.termios.clone();
        termios::cfmakeraw(&mut raw);

        // Handlers and the saved mode are undone by this guard's drop,
        // including when a step below fails
        let mut guard = Self {
            previous_handlers: Vec::with_capacity(FATAL_SIGNALS.len()),
        };

        let saved = Box::new(SavedMode {
            fd,
            termios: libc::termios::from(original.termios.clone()),
        });
        let stale = SAVED_MODE.swap(Box::into_raw(saved), Ordering::SeqCst);
        if !stale.is_null() {
            // SAFETY: a previous guard leaked its mode without restoring; reclaim it
            drop(unsafe { Box::from_raw(stale) });
        }

        PANIC_HOOK.call_once(|| {
            let default_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                restore_saved_mode(true);
                default_hook(info);
            }));
        });

        let action = SigAction::new(
            SigHandler::Handler(restore_and_reraise),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in FATAL_SIGNALS {
            // SAFETY: the handler only performs async-signal-safe calls
            let previous = unsafe { sigaction(signal, &action) }
                .map_err(|source| Error::SignalHandler { signal, source })?;
            guard.previous_handlers.push((signal, previous));
        }

        // SAFETY: the caller passes a descriptor that stays open for the session
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        termios::tcsetattr(borrowed, SetArg::TCSAFLUSH, &raw).map_err(Error::SetAttr)?;
        tracing::debug!("Controlling terminal in raw mode");

        Ok(guard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if restore_saved_mode(true) {
            tracing::debug!("Controlling terminal mode restored");
        }
        for (signal, previous) in self.previous_handlers.drain(..) {
            // SAFETY: restoring a disposition we read back from the kernel
            let _ = unsafe { sigaction(signal, &previous) };
        }
    }
}
