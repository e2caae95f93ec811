//! Input half of the relay: outer input to pty master

use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::read;

use super::{apply_resize, Endpoints, BUFFER_SIZE, END_OF_TRANSMISSION};
use crate::signals::SignalFlag;
use crate::writer::write_fully;

/// Why the input forwarder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEnd {
    /// Outer input reached end of file; EOT was sent to the master
    EndOfInput,
    /// Reading outer input failed
    ReadError(Errno),
    /// The master did not take everything we wrote
    WriteFailed,
}

/// Copies outer input to the pty master
pub struct InputForwarder {
    endpoints: Endpoints,
    resize: SignalFlag,
}

impl InputForwarder {
    pub fn new(endpoints: Endpoints, resize: SignalFlag) -> Self {
        Self { endpoints, resize }
    }

    /// Copy until outer input ends or fails.
    ///
    /// `startup_delay` gives the target program time to finish setting up
    /// its terminal before any input arrives.
    pub fn run(&mut self, startup_delay: Duration) -> InputEnd {
        if !startup_delay.is_zero() {
            std::thread::sleep(startup_delay);
        }

        let mut buf = vec![0u8; BUFFER_SIZE];
        let end = loop {
            self.service_resize();

            match read(self.endpoints.input, &mut buf) {
                Ok(0) => {
                    let _ = self.forward(&[END_OF_TRANSMISSION]);
                    break InputEnd::EndOfInput;
                },
                Ok(n) => {
                    if !self.forward(&buf[..n]) {
                        break InputEnd::WriteFailed;
                    }
                },
                Err(Errno::EINTR) => continue,
                Err(e) => break InputEnd::ReadError(e),
            }
        };

        self.service_resize();
        end
    }

    fn forward(&self, data: &[u8]) -> bool {
        match write_fully(self.endpoints.master, data) {
            Ok(n) => n == data.len(),
            Err(e) => {
                tracing::warn!("{}", e);
                false
            },
        }
    }

    fn service_resize(&self) {
        if self.resize.is_raised() {
            apply_resize(&self.endpoints, &self.resize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use nix::sys::signal::{raise, Signal};

    use crate::pty::{get_window_size, set_window_size, Pty, SpawnOptions, WindowSize};
    use crate::signals::TEST_SIGNAL_LOCK;

    #[test]
    fn test_copies_input_then_sends_eot() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (mut feed, input) = UnixStream::pair().unwrap();
        let (master, mut sink) = UnixStream::pair().unwrap();

        feed.write_all(b"hello\n").unwrap();
        feed.shutdown(Shutdown::Write).unwrap();

        let endpoints = Endpoints {
            input: input.as_raw_fd(),
            output: -1,
            master: master.as_raw_fd(),
            geometry: -1,
        };
        let end = InputForwarder::new(endpoints, SignalFlag::resize()).run(Duration::ZERO);
        assert_eq!(end, InputEnd::EndOfInput);
        drop(master);

        let mut out = Vec::new();
        sink.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello\n\x04");
    }

    #[test]
    fn test_write_failure_stops_forwarder() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (mut feed, input) = UnixStream::pair().unwrap();
        let (master, sink) = UnixStream::pair().unwrap();
        drop(sink);

        feed.write_all(b"lost").unwrap();

        let endpoints = Endpoints {
            input: input.as_raw_fd(),
            output: -1,
            master: master.as_raw_fd(),
            geometry: -1,
        };
        let end = InputForwarder::new(endpoints, SignalFlag::resize()).run(Duration::ZERO);
        assert_eq!(end, InputEnd::WriteFailed);
    }

    #[test]
    fn test_pending_resize_is_applied() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let controlling = Pty::spawn(&["sleep", "5"], &SpawnOptions::default()).unwrap();
        let session = Pty::spawn(&["sleep", "5"], &SpawnOptions::default()).unwrap();
        set_window_size(controlling.master_fd(), WindowSize::new(101, 33)).unwrap();

        let (feed, input) = UnixStream::pair().unwrap();
        drop(feed);

        let resize = SignalFlag::resize();
        let guard = resize.install().unwrap();
        raise(Signal::SIGWINCH).unwrap();

        let endpoints = Endpoints {
            input: input.as_raw_fd(),
            output: -1,
            master: session.master_fd(),
            geometry: controlling.master_fd(),
        };
        let end = InputForwarder::new(endpoints, resize).run(Duration::ZERO);
        assert_eq!(end, InputEnd::EndOfInput);
        assert!(!resize.is_raised());
        assert_eq!(
            get_window_size(session.master_fd()).unwrap(),
            WindowSize::new(101, 33)
        );
        drop(guard);

        for pty in [controlling, session] {
            let _ = pty.child().signal(Signal::SIGKILL);
            let child = pty.close().unwrap();
            let _ = child.wait();
        }
    }
}
