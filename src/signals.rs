//! Installs handlers for the master's signal surface and exposes them as a non-blocking poll.
//!
//! `jpmelos-fdintercept` registers the same `signal_hook::iterator::Signals` primitive and
//! drains it with `.forever()` on a dedicated thread. Since this supervisor is single-threaded
//! and cooperative (§5), the substantive work stays on the loop: every tick calls
//! `SignalGate::poll`, a non-blocking drain (`.pending()`) of whatever signals already arrived.
//! The signal_hook self-pipe underneath `Signals` is what does the actual async-signal-safe
//! bookkeeping; nothing here runs in true signal-handler context.

use anyhow::{Context, Result};
use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

/// One signal-driven event the master's event loop must react to this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// A child exited; drive the reaper.
    ChildExit,
    /// Graceful shutdown was requested (`SIGTERM` or `SIGINT`).
    Shutdown,
    /// Reload was requested (`SIGHUP`); forward to every child.
    Reload,
    /// A user signal arrived; report it to every child via `onChildSignal`.
    User(i32),
}

pub struct SignalGate {
    signals: Signals,
}

impl SignalGate {
    pub fn install() -> Result<Self> {
        let signals = Signals::new([SIGHUP, SIGINT, SIGTERM, SIGCHLD, SIGUSR1, SIGUSR2])
            .context("error registering signal handlers")?;
        Ok(Self { signals })
    }

    /// Drains every signal already delivered, without blocking.
    pub fn poll(&mut self) -> Vec<SignalEvent> {
        self.signals
            .pending()
            .map(|signum| match signum {
                SIGCHLD => SignalEvent::ChildExit,
                SIGTERM | SIGINT => SignalEvent::Shutdown,
                SIGHUP => SignalEvent::Reload,
                other => SignalEvent::User(other),
            })
            .collect()
    }
}
