//! Non-blocking multiplexed reads across every live child's stdout, stderr, and IPC channel.
//!
//! Grounded on `jpmelos-fdintercept`'s `fd.rs` (`mio::Poll` + `mio::unix::SourceFd` over raw
//! fds, non-blocking reads that treat `WouldBlock` as "nothing to do this tick"), generalized
//! from one child's three streams to a whole pool's.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;

use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::errno::Errno;

use crate::registry::{Child, ChildRegistry};

/// Which of a child's three streams a ready descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Ipc,
}

/// Maximum bytes read from a ready descriptor per dispatch, per §4.5.
pub const READ_CHUNK: usize = 8192;

pub struct IOMultiplexer {
    poll: Poll,
    events: Events,
    next_token: usize,
    tokens: HashMap<Token, (i32, StreamKind)>,
    child_tokens: HashMap<i32, Vec<Token>>,
}

impl IOMultiplexer {
    /// # Errors
    ///
    /// Returns an error if the underlying `mio::Poll` instance cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new().context("error creating poll of events")?,
            events: Events::with_capacity(64),
            next_token: 0,
            tokens: HashMap::new(),
            child_tokens: HashMap::new(),
        })
    }

    fn register_stream(&mut self, pid: i32, kind: StreamKind, fd: BorrowedFd) -> Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(
                &mut SourceFd(&fd.as_raw_fd()),
                token,
                Interest::READABLE,
            )
            .context("error registering child stream in poll of events")?;
        self.tokens.insert(token, (pid, kind));
        self.child_tokens.entry(pid).or_default().push(token);
        Ok(())
    }

    /// Registers every open stream a freshly-created child exposes. Must be called after the
    /// child is inserted into the registry, per the lifecycle invariant in §3.
    ///
    /// # Errors
    ///
    /// Returns an error if registering any of the child's open streams with the poll instance
    /// fails.
    pub fn register_child(&mut self, child: &Child) -> Result<()> {
        if let Some(stdout) = &child.stdout {
            self.register_stream(child.pid, StreamKind::Stdout, stdout.as_fd())?;
        }
        if let Some(stderr) = &child.stderr {
            self.register_stream(child.pid, StreamKind::Stderr, stderr.as_fd())?;
        }
        if let Some(ipc) = &child.ipc_channel {
            self.register_stream(child.pid, StreamKind::Ipc, ipc.as_fd())?;
        }
        Ok(())
    }

    /// Deregisters a child's streams. Must be called before its descriptors are closed.
    pub fn deregister_child(&mut self, child: &Child) {
        let Some(tokens) = self.child_tokens.remove(&child.pid) else {
            return;
        };
        for token in tokens {
            self.tokens.remove(&token);
        }
        // Deregistration is by fd, via the still-open descriptors (the caller closes them only
        // after this returns).
        for stream in [
            child.stdout.as_ref(),
            child.stderr.as_ref(),
            child.ipc_channel.as_ref(),
        ] {
            if let Some(fd) = stream {
                let _ = self
                    .poll
                    .registry()
                    .deregister(&mut SourceFd(&fd.as_raw_fd()));
            }
        }
    }

    /// Waits up to `timeout` for readiness and returns the `(pid, stream)` pairs that fired.
    /// Interruption by signal delivery or a spurious wakeup yields an empty list rather than an
    /// error, per §4.4.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying poll call fails for a reason other than being
    /// interrupted by signal delivery.
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<(i32, StreamKind)>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e).context("error polling for child stream readiness"),
        }

        Ok(self
            .events
            .iter()
            .filter_map(|event| self.tokens.get(&event.token()).copied())
            .collect())
    }

    pub fn has_any_registered(&self) -> bool {
        !self.tokens.is_empty()
    }
}

/// Reads up to [`READ_CHUNK`] bytes from `fd` without blocking.
///
/// Returns `Ok(Vec::new())` for both "nothing ready yet" (`EAGAIN`) and EOF (the descriptor will
/// be finalized once the reaper observes the child's exit, never from a stream read alone).
///
/// # Errors
///
/// Returns an error if the underlying read fails for a reason other than `EAGAIN`/`EWOULDBLOCK`.
pub fn read_nonblocking(fd: BorrowedFd) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; READ_CHUNK];
    match nix::unistd::read(fd, &mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(Errno::EAGAIN | Errno::EWOULDBLOCK) => Ok(Vec::new()),
        Err(e) => Err(e).context("error reading child stream"),
    }
}

/// Writes `bytes` to `fd` without blocking. Returns `Ok(0)` rather than erroring when the write
/// would block, mirroring [`read_nonblocking`]'s treatment of `EAGAIN` -- a stalled child is not
/// this crate's problem to solve, only to not crash over.
///
/// # Errors
///
/// Returns an error if the underlying write fails for a reason other than `EAGAIN`/`EWOULDBLOCK`.
pub fn write_nonblocking(fd: BorrowedFd, bytes: &[u8]) -> Result<usize> {
    match nix::unistd::write(fd, bytes) {
        Ok(n) => Ok(n),
        Err(Errno::EAGAIN | Errno::EWOULDBLOCK) => Ok(0),
        Err(e) => Err(e).context("error writing to child stdin"),
    }
}
