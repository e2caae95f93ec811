//! Reliable writer
//!
//! Writes a whole buffer to a descriptor, retrying partial writes. A broken
//! pipe ends the write early instead of killing the process: SIGPIPE is
//! caught for the duration of the call and the previous disposition is put
//! back on every exit path.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd::write;

use crate::error::Result;
use crate::signals::SignalFlag;

/// Write all of `buf` to `fd`.
///
/// Returns the number of bytes written, which is `buf.len()` on success and
/// less on a write error or a broken pipe. The caller decides whether a short
/// write is fatal. The only error returned is a failure to install the
/// SIGPIPE handler.
pub fn write_fully(fd: RawFd, buf: &[u8]) -> Result<usize> {
    let broken_pipe = SignalFlag::broken_pipe();
    let _guard = broken_pipe.install()?;

    Ok(write_with(buf, |chunk| {
        let n = write(fd, chunk)?;
        if broken_pipe.take() {
            return Err(Errno::EPIPE);
        }
        Ok(n)
    }))
}

/// Drive `write` until `buf` is consumed or it fails.
///
/// `EINTR` is retried. A zero-length write or any other error stops early.
pub fn write_with<F>(buf: &[u8], mut write: F) -> usize
where
    F: FnMut(&[u8]) -> nix::Result<usize>,
{
    let mut written = 0;
    while written < buf.len() {
        match write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::debug!("Write stopped after {} of {} bytes: {}", written, buf.len(), e);
                break;
            },
        }
    }
    written
}
