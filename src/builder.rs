//! The fluent configuration surface named in §6. Deliberately thin: every setter just stashes a
//! value or callback and returns `Self`; all validation is deferred to `Config::validate`,
//! called once at the top of `run()`.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::config::{Config, Strategy};
use crate::handle::Handle;
use crate::io_mux::StreamKind;
use crate::registry::{Child, ChildRegistry, ExitReason};
use crate::supervisor::Supervisor;

/// Builds a [`Supervisor`]. `command` and `closure` are mutually exclusive -- whichever is set
/// last wins, matching the "exactly one required" rule in §3 (neither raises until `run()`).
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Config,
    callbacks: Callbacks,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the Command strategy: a shell-style command line, split with `shlex`.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.config.strategy = Some(Strategy::Command(command.into()));
        self
    }

    /// Selects the Closure strategy: `routine` runs in the forked child with its end of a Unix
    /// stream socket pair as its sole argument.
    pub fn closure(mut self, routine: impl Fn(UnixStream) + Send + Sync + 'static) -> Self {
        self.config.strategy = Some(Strategy::Closure(Arc::new(routine)));
        self
    }

    /// Sets the `[min, max]` envelope. Takes effect on the next replenish and on scale calls.
    pub fn scale_limits(mut self, min: usize, max: usize) -> Self {
        self.config.min = min;
        self.config.max = max;
        self
    }

    /// Enables a periodic callback, fired at most once per loop iteration whenever at least
    /// `interval` has elapsed since the last firing.
    pub fn heartbeat(mut self, interval: Duration, cb: impl FnMut(&Handle) + Send + 'static) -> Self {
        self.config.heartbeat_interval = interval;
        self.callbacks.heartbeat_callback = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired once per child after it is inserted into the registry.
    pub fn on_child_create(mut self, cb: impl FnMut(&Child, &Handle) + Send + 'static) -> Self {
        self.callbacks.on_child_create = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired once per child after it has been reaped during normal
    /// operation (not during shutdown) and removed from the registry.
    pub fn on_child_exit(
        mut self,
        cb: impl FnMut(&Child, ExitReason, &Handle) + Send + 'static,
    ) -> Self {
        self.callbacks.on_child_exit = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired for every live child when `SIGUSR1`/`SIGUSR2` arrives at the
    /// master.
    pub fn on_child_signal(mut self, cb: impl FnMut(&Child, i32, &Handle) + Send + 'static) -> Self {
        self.callbacks.on_child_signal = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired once per well-formed JSON line received on a child's IPC
    /// channel.
    pub fn on_child_message(
        mut self,
        cb: impl FnMut(&Child, Value, &Handle) + Send + 'static,
    ) -> Self {
        self.callbacks.on_child_message = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired with raw bytes read from a child's stdout or stderr.
    pub fn on_child_output(
        mut self,
        cb: impl FnMut(&Child, StreamKind, &[u8], &Handle) + Send + 'static,
    ) -> Self {
        self.callbacks.on_child_output = Some(Box::new(cb));
        self
    }

    /// Registers a callback fired exactly once, with the registry still fully populated, right
    /// before the shutdown orchestrator broadcasts the terminate signal.
    pub fn on_shutdown(mut self, cb: impl FnMut(&ChildRegistry, &Handle) + Send + 'static) -> Self {
        self.callbacks.on_shutdown = Some(Box::new(cb));
        self
    }

    /// Builds the [`Supervisor`]. This never fails; `NotConfigured` is only raised by `run()`,
    /// since a builder with no strategy set yet is a perfectly normal intermediate state.
    pub fn build(self) -> anyhow::Result<Supervisor> {
        Supervisor::new(self.config, self.callbacks)
    }
}
