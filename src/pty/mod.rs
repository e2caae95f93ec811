//! PTY (Pseudoterminal) handling
//!
//! This module allocates the pseudoterminal pair, starts the target program
//! on the slave side, and moves window geometry between descriptors.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{Pty, SpawnOptions};

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::libc;

use crate::error::{Error, Result};

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    fn to_winsize(self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.pixel_width,
            ws_ypixel: self.pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

/// Set the window size on a terminal file descriptor
pub fn set_window_size(fd: RawFd, size: WindowSize) -> Result<()> {
    let winsize = size.to_winsize();

    // SAFETY: TIOCSWINSZ reads a winsize struct that outlives the call
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(Error::SetWinsize(Errno::last()))
    } else {
        Ok(())
    }
}

/// Get the window size from a terminal file descriptor
pub fn get_window_size(fd: RawFd) -> Result<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ fills in the winsize struct we pass
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(Error::GetWinsize(Errno::last()))
    } else {
        Ok(WindowSize::from(winsize))
    }
}

/// Copy the window size of `from` onto `to`.
///
/// Used when the controlling terminal is resized: `from` is the real
/// terminal and `to` is the pty master.
pub fn propagate_window_size(from: RawFd, to: RawFd) -> Result<WindowSize> {
    let size = get_window_size(from)?;
    set_window_size(to, size)?;
    Ok(size)
}
