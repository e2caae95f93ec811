//! Per-process signal flags
//!
//! Each relay unit runs in its own process, so the statics below are never
//! shared between units: after `fork` every process owns a private copy. A
//! handler only raises its flag; the owning loop polls the flag after a
//! blocking call returns `EINTR`.
//!
//! Handlers are installed without `SA_RESTART` so a pending signal always
//! interrupts the blocking `read` it arrives during.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

static RESIZE_PENDING: AtomicBool = AtomicBool::new(false);
static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);
static BROKEN_PIPE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_resize(_: libc::c_int) {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate(_: libc::c_int) {
    TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_broken_pipe(_: libc::c_int) {
    BROKEN_PIPE.store(true, Ordering::SeqCst);
}

/// A presence-only flag raised asynchronously by a signal handler
#[derive(Debug, Clone, Copy)]
pub struct SignalFlag {
    signal: Signal,
    raised: &'static AtomicBool,
    handler: extern "C" fn(libc::c_int),
}

impl SignalFlag {
    /// Window size of the controlling terminal changed (SIGWINCH)
    pub fn resize() -> Self {
        Self {
            signal: Signal::SIGWINCH,
            raised: &RESIZE_PENDING,
            handler: on_resize,
        }
    }

    /// Sibling relay unit asked us to stop (SIGTERM)
    pub fn terminate() -> Self {
        Self {
            signal: Signal::SIGTERM,
            raised: &TERMINATE_REQUESTED,
            handler: on_terminate,
        }
    }

    /// Peer of a descriptor we were writing to went away (SIGPIPE)
    pub fn broken_pipe() -> Self {
        Self {
            signal: Signal::SIGPIPE,
            raised: &BROKEN_PIPE,
            handler: on_broken_pipe,
        }
    }

    pub(crate) fn signal(&self) -> Signal {
        self.signal
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Install the flag-raising handler, clearing any stale flag first.
    ///
    /// The previous disposition is restored when the returned guard drops.
    pub fn install(&self) -> Result<HandlerGuard> {
        self.raised.store(false, Ordering::SeqCst);
        let previous = self.set_handler()?;
        Ok(HandlerGuard {
            signal: self.signal,
            previous,
        })
    }

    /// Clear the flag and reinstall the handler after servicing it
    pub fn rearm(&self) -> Result<()> {
        self.raised.store(false, Ordering::SeqCst);
        self.set_handler().map(|_| ())
    }

    fn set_handler(&self) -> Result<SigAction> {
        let action = SigAction::new(
            SigHandler::Handler(self.handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe
        unsafe { sigaction(self.signal, &action) }.map_err(|source| Error::SignalHandler {
            signal: self.signal,
            source,
        })
    }
}

/// Restores a signal's previous disposition on drop
#[must_use = "dropping the guard restores the previous handler immediately"]
pub struct HandlerGuard {
    signal: Signal,
    previous: SigAction,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        // SAFETY: restoring a disposition we read back from the kernel
        if let Err(e) = unsafe { sigaction(self.signal, &self.previous) } {
            tracing::warn!("Failed to restore {} handler: {}", self.signal, e);
        }
    }
}

/// Reset a signal to its default action. Used in forked children before exec.
pub fn reset_to_default(signal: Signal) -> Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL carries no handler code
    unsafe { sigaction(signal, &action) }
        .map(|_| ())
        .map_err(|source| Error::SignalHandler { signal, source })
}

/// Serializes tests that change process-wide signal dispositions.
#[cfg(test)]
pub(crate) static TEST_SIGNAL_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Current disposition of `signal`, read by swapping it out and back.
#[cfg(test)]
pub(crate) fn current_handler(signal: Signal) -> SigHandler {
    let probe = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let previous = unsafe { sigaction(signal, &probe) }.unwrap();
    unsafe { sigaction(signal, &previous) }.unwrap();
    previous.handler()
}
