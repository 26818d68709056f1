//! Cooperative interruption. The engine only polls; the sources that set
//! the request live outside it.

use std::os::raw::c_int;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub trait InterruptPoll {
    /// Non-blocking: has the operator asked to stop?
    fn poll_interrupt(&mut self) -> bool;
    /// Drain the pending request so it is not seen twice.
    fn consume_interrupt_input(&mut self);
}

/// Never interrupts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterrupt;

impl InterruptPoll for NoInterrupt {
    fn poll_interrupt(&mut self) -> bool {
        false
    }

    fn consume_interrupt_input(&mut self) {}
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Zero-timeout readiness check on `fd`.
        fn input_pending(fd: c_int) -> bool {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd, no timeout.
            let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
            ready > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0
        }

        /// Read whatever is buffered on `fd`. Returns `false` once the
        /// input has reached end of file or failed.
        fn drain_input(fd: c_int) -> bool {
            let mut scratch = [0u8; 256];
            while input_pending(fd) {
                // SAFETY: `scratch` is valid for its whole length.
                let n = unsafe { libc::read(fd, scratch.as_mut_ptr().cast(), scratch.len()) };
                if n <= 0 {
                    return false;
                }
            }
            true
        }
    } else {
        fn input_pending(_fd: c_int) -> bool {
            false
        }

        fn drain_input(_fd: c_int) -> bool {
            false
        }
    }
}

/// Shared stop request, set from Ctrl+C, plus an optional input descriptor
/// whose pending bytes count as a key press.
#[derive(Debug, Default, Clone)]
pub struct StopFlag {
    requested: Arc<AtomicBool>,
    input: Option<c_int>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also stop when a line is typed on `fd`. Nothing reads from it except
    /// the engine's own polls, so the descriptor stays free once the run ends.
    pub fn with_input(mut self, fd: c_int) -> Self {
        self.input = Some(fd);
        self
    }

    /// Watch the process's standard input (descriptor 0).
    pub fn with_stdin(self) -> Self {
        self.with_input(0)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived Ctrl+C; stopping at the next checkpoint...");
            flag.request();
        })
    }
}

impl InterruptPoll for StopFlag {
    fn poll_interrupt(&mut self) -> bool {
        self.is_requested() || self.input.is_some_and(input_pending)
    }

    fn consume_interrupt_input(&mut self) {
        self.requested.store(false, Ordering::SeqCst);
        if let Some(fd) = self.input {
            if !drain_input(fd) {
                self.input = None;
            }
        }
    }
}
