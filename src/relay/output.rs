//! Output half of the relay: pty master to outer output

use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::poll::{ppoll, PollFd, PollFlags};
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};
use nix::unistd::read;

use super::{apply_resize, Endpoints, BUFFER_SIZE};
use crate::signals::SignalFlag;
use crate::writer::write_fully;

/// Why the output forwarder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEnd {
    /// The master reached end of file: the slave side closed
    EndOfInput,
    /// The input forwarder asked us to stop
    Terminated,
    /// Reading the master failed
    ReadError(Errno),
    /// Outer output did not take everything we wrote
    WriteFailed,
}

/// Copies the pty master to outer output
pub struct OutputForwarder {
    endpoints: Endpoints,
    resize: SignalFlag,
    terminate: SignalFlag,
}

impl OutputForwarder {
    pub fn new(endpoints: Endpoints, resize: SignalFlag, terminate: SignalFlag) -> Self {
        Self {
            endpoints,
            resize,
            terminate,
        }
    }

    /// Copy until the master closes, a write fails, or termination is
    /// requested. A resize only interrupts the current wait.
    pub fn run(&mut self) -> OutputEnd {
        // Both signals stay blocked outside the wait, so one arriving between
        // the flag checks and the wait is delivered inside it
        let mut watched = SigSet::empty();
        watched.add(self.terminate.signal());
        watched.add(self.resize.signal());
        let mut unblocked = SigSet::empty();
        if let Err(e) =
            pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&watched), Some(&mut unblocked))
        {
            tracing::warn!("Failed to block relay signals: {}", e);
        }

        let end = self.copy(&unblocked);

        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&unblocked), None) {
            tracing::warn!("Failed to restore signal mask: {}", e);
        }
        end
    }

    fn copy(&self, unblocked: &SigSet) -> OutputEnd {
        let mut buf = vec![0u8; BUFFER_SIZE];
        loop {
            if self.terminate.is_raised() {
                return OutputEnd::Terminated;
            }
            if self.resize.is_raised() {
                apply_resize(&self.endpoints, &self.resize);
            }

            match self.wait_readable(unblocked) {
                Ok(()) => {},
                Err(Errno::EINTR) => continue,
                Err(e) => return OutputEnd::ReadError(e),
            }

            match read(self.endpoints.master, &mut buf) {
                Ok(0) => return OutputEnd::EndOfInput,
                Ok(n) => {
                    if !self.forward(&buf[..n]) {
                        return OutputEnd::WriteFailed;
                    }
                },
                Err(Errno::EINTR) => continue,
                // Linux reports a closed slave as EIO rather than EOF
                Err(Errno::EIO) => return OutputEnd::EndOfInput,
                Err(e) => return OutputEnd::ReadError(e),
            }
        }
    }

    /// Block until the master has data or has hung up. The watched signals
    /// are unblocked only for the duration of the wait.
    fn wait_readable(&self, unblocked: &SigSet) -> nix::Result<()> {
        // SAFETY: the master stays open for the whole relay
        let master = unsafe { BorrowedFd::borrow_raw(self.endpoints.master) };
        let mut fds = [PollFd::new(&master, PollFlags::POLLIN)];
        ppoll(&mut fds, None, Some(*unblocked)).map(|_| ())
    }

    fn forward(&self, data: &[u8]) -> bool {
        match write_fully(self.endpoints.output, data) {
            Ok(n) => n == data.len(),
            Err(e) => {
                tracing::warn!("{}", e);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::os::unix::thread::JoinHandleExt;
    use std::thread;
    use std::time::{Duration, Instant};

    use nix::sys::pthread::pthread_kill;
    use nix::sys::signal::{raise, Signal};

    use crate::pty::{get_window_size, set_window_size, Pty, SpawnOptions, WindowSize};
    use crate::signals::TEST_SIGNAL_LOCK;

    #[test]
    fn test_copies_master_until_eof() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (mut target, master) = UnixStream::pair().unwrap();
        let (output, mut sink) = UnixStream::pair().unwrap();

        target.write_all(b"ECHO: hello\r\n").unwrap();
        drop(target);

        let endpoints = Endpoints {
            input: -1,
            output: output.as_raw_fd(),
            master: master.as_raw_fd(),
            geometry: -1,
        };
        let terminate = SignalFlag::terminate();
        let _guard = terminate.install().unwrap();
        let end = OutputForwarder::new(endpoints, SignalFlag::resize(), terminate).run();
        assert_eq!(end, OutputEnd::EndOfInput);
        drop(output);

        let mut out = Vec::new();
        sink.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ECHO: hello\r\n");
    }

    #[test]
    fn test_terminate_request_stops_forwarder() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (_target, master) = UnixStream::pair().unwrap();
        let (output, _sink) = UnixStream::pair().unwrap();

        let terminate = SignalFlag::terminate();
        let guard = terminate.install().unwrap();
        raise(Signal::SIGTERM).unwrap();

        let endpoints = Endpoints {
            input: -1,
            output: output.as_raw_fd(),
            master: master.as_raw_fd(),
            geometry: -1,
        };
        let end = OutputForwarder::new(endpoints, SignalFlag::resize(), terminate).run();
        assert_eq!(end, OutputEnd::Terminated);
        drop(guard);
    }

    #[test]
    fn test_target_exit_ends_forwarder() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let pty = Pty::spawn(&["echo", "bye"], &SpawnOptions::default()).unwrap();
        let (output, mut sink) = UnixStream::pair().unwrap();

        let terminate = SignalFlag::terminate();
        let _guard = terminate.install().unwrap();
        let endpoints = Endpoints {
            input: -1,
            output: output.as_raw_fd(),
            master: pty.master_fd(),
            geometry: -1,
        };
        let end = OutputForwarder::new(endpoints, SignalFlag::resize(), terminate).run();
        assert_eq!(end, OutputEnd::EndOfInput);
        drop(output);

        let mut out = Vec::new();
        sink.read_to_end(&mut out).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("bye"));

        let child = pty.close().unwrap();
        assert_eq!(child.wait().unwrap(), 0);
    }

    #[test]
    fn test_terminate_interrupts_blocked_wait() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (_target, master) = UnixStream::pair().unwrap();
        let (output, _sink) = UnixStream::pair().unwrap();

        let terminate = SignalFlag::terminate();
        let _guard = terminate.install().unwrap();
        let endpoints = Endpoints {
            input: -1,
            output: output.as_raw_fd(),
            master: master.as_raw_fd(),
            geometry: -1,
        };
        let forwarder = thread::spawn(move || {
            OutputForwarder::new(endpoints, SignalFlag::resize(), terminate).run()
        });

        thread::sleep(Duration::from_millis(100));
        pthread_kill(forwarder.as_pthread_t(), Signal::SIGTERM).unwrap();
        assert_eq!(forwarder.join().unwrap(), OutputEnd::Terminated);
    }

    #[test]
    fn test_resize_during_blocked_wait() {
        let _lock = TEST_SIGNAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let controlling = Pty::spawn(&["sleep", "5"], &SpawnOptions::default()).unwrap();
        set_window_size(controlling.master_fd(), WindowSize::new(101, 33)).unwrap();
        let session = Pty::spawn(
            &["sh", "-c", "read line; stty size; echo tail"],
            &SpawnOptions::default(),
        )
        .unwrap();
        let (output, mut sink) = UnixStream::pair().unwrap();

        let resize = SignalFlag::resize();
        let terminate = SignalFlag::terminate();
        let _resize_guard = resize.install().unwrap();
        let _terminate_guard = terminate.install().unwrap();
        let endpoints = Endpoints {
            input: -1,
            output: output.as_raw_fd(),
            master: session.master_fd(),
            geometry: controlling.master_fd(),
        };
        let forwarder =
            thread::spawn(move || OutputForwarder::new(endpoints, resize, terminate).run());

        thread::sleep(Duration::from_millis(200));
        pthread_kill(forwarder.as_pthread_t(), Signal::SIGWINCH).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while get_window_size(session.master_fd()).unwrap() != WindowSize::new(101, 33) {
            assert!(Instant::now() < deadline, "resize was never applied");
            thread::sleep(Duration::from_millis(10));
        }
        nix::unistd::write(session.master_fd(), b"go\n").unwrap();

        assert_eq!(forwarder.join().unwrap(), OutputEnd::EndOfInput);
        drop(output);
        let mut out = Vec::new();
        sink.read_to_end(&mut out).unwrap();
        let out = String::from_utf8_lossy(&out);
        assert!(out.contains("go\r\n33 101\r\ntail\r\n"), "got: {:?}", out);

        let _ = controlling.child().signal(Signal::SIGKILL);
        let _ = controlling.close().unwrap().wait();
        assert_eq!(session.close().unwrap().wait().unwrap(), 0);
    }
}
