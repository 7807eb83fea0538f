//! The master event loop: `SignalGate -> EventLoop -> {IOMultiplexer -> StreamDispatcher ->
//! MessageParser, Heartbeat, Reaper -> ScaleController} -> ShutdownOrchestrator` (§2).

use std::os::fd::AsFd;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::callbacks::Callbacks;
use crate::config::Config;
use crate::error::SupervisorError;
use crate::handle::Handle;
use crate::io_mux::{self, IOMultiplexer, StreamKind};
use crate::message::MessageParser;
use crate::reaper;
use crate::registry::{ChildRegistry, CreateReason};
use crate::scale;
use crate::shutdown;
use crate::signals::{SignalEvent, SignalGate};
use crate::spawner;

/// How long `IOMultiplexer::poll` blocks waiting for readiness when streams are registered (§4.1
/// step 2).
const READY_TIMEOUT: Duration = Duration::from_secs(1);
/// How long the loop sleeps when no streams are registered at all, to stay responsive to signals
/// without busy-waiting (§4.1 step 3).
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// The master-side supervision engine. Built via [`crate::SupervisorBuilder`]; `run()` blocks the
/// calling thread until a termination signal (or [`Handle::shutdown`]) is observed.
pub struct Supervisor {
    config: Config,
    callbacks: Callbacks,
    registry: ChildRegistry,
    mux: IOMultiplexer,
    parser: MessageParser,
    handle: Handle,
    last_heartbeat: Instant,
}

impl Supervisor {
    pub(crate) fn new(config: Config, callbacks: Callbacks) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            callbacks,
            registry: ChildRegistry::new(),
            mux: IOMultiplexer::new()?,
            parser: MessageParser::new(),
            handle: Handle::new(),
            last_heartbeat: Instant::now(),
        })
    }

    /// Returns a cloneable handle into this supervisor's live state. Must be called before
    /// `run()`, since `run()` consumes `self` and blocks until shutdown.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Convenience wrapper around `run()` for embedders whose own main thread has other work to
    /// do: moves the supervisor onto a dedicated OS thread and returns immediately. The returned
    /// `JoinHandle` yields `run()`'s result once the pool has shut down; `handle()` should be
    /// called beforehand to retain a way to drive or observe the supervisor from the caller's
    /// thread.
    pub fn run_in_background(self) -> thread::JoinHandle<Result<(), SupervisorError>> {
        thread::spawn(move || self.run())
    }

    /// Blocks the calling thread, driving the event loop until a termination signal or
    /// [`Handle::shutdown`] is observed, then runs the shutdown orchestrator and returns.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotConfigured`] if neither `command` nor `closure` was set, or
    /// a spawn-related error if the initial replenish to `min` fails outright.
    pub fn run(mut self) -> Result<(), SupervisorError> {
        self.config.validate()?;

        let mut signal_gate = SignalGate::install().map_err(|source| SupervisorError::SpawnFailed {
            command: None,
            source: std::io::Error::other(source.to_string()),
        })?;

        self.initial_replenish()?;
        info!(min = self.config.min, max = self.config.max, "supervisor pool established");

        loop {
            if let Err(e) = self.dispatch_io() {
                warn!(error = %e, "error dispatching child I/O");
            }
            self.maybe_heartbeat();

            let mut shutdown_pending = false;
            let mut child_exit_pending = false;
            for event in signal_gate.poll() {
                match event {
                    SignalEvent::ChildExit => child_exit_pending = true,
                    SignalEvent::Shutdown => shutdown_pending = true,
                    SignalEvent::Reload => self.forward_reload(),
                    SignalEvent::User(signum) => self.fan_out_user_signal(signum),
                }
            }

            if child_exit_pending {
                if let Err(e) = self.reap_and_replenish() {
                    warn!(error = %e, "error during reap/replenish");
                }
            }

            if self.drain_handle_requests() {
                shutdown_pending = true;
            }

            if shutdown_pending {
                break;
            }
        }

        self.run_shutdown();
        Ok(())
    }

    fn initial_replenish(&mut self) -> Result<(), SupervisorError> {
        while self.registry.len() < self.config.min {
            let child = self.config.spawn_one_typed(CreateReason::Initial)?;
            let pid = child.pid;
            if let Err(e) = self.mux.register_child(&child) {
                warn!(pid, error = %e, "failed to register initial child for I/O readiness");
            }
            self.registry.insert(child);
            self.fire_create(pid);
        }
        Ok(())
    }

    fn dispatch_io(&mut self) -> anyhow::Result<()> {
        if !self.mux.has_any_registered() {
            thread::sleep(IDLE_SLEEP);
            return Ok(());
        }

        let ready = self.mux.poll(READY_TIMEOUT)?;
        if ready.is_empty() {
            return Ok(());
        }

        let handle = self.handle.clone();
        let Self {
            registry,
            parser,
            callbacks,
            ..
        } = self;

        for (pid, kind) in ready {
            // `mio`/`SourceFd` readiness is edge-triggered on Linux: a single read per edge
            // would strand whatever's left past 8192 bytes until the next write or close
            // re-arms the edge. Keep reading until `WouldBlock`, the same as the teacher's
            // `inner_fd_event_readable` loop.
            loop {
                let bytes = {
                    let Some(child) = registry.get(pid) else {
                        break;
                    };
                    let fd = match kind {
                        StreamKind::Stdout => child.stdout.as_ref(),
                        StreamKind::Stderr => child.stderr.as_ref(),
                        StreamKind::Ipc => child.ipc_channel.as_ref(),
                    };
                    let Some(fd) = fd else {
                        break;
                    };
                    match io_mux::read_nonblocking(fd.as_fd()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(pid, ?kind, error = %e, "error reading child stream");
                            break;
                        }
                    }
                };
                if bytes.is_empty() {
                    break;
                }

                match kind {
                    StreamKind::Ipc => {
                        parser.feed(pid, &bytes, |value| {
                            if let (Some(child), Some(cb)) =
                                (registry.get(pid), callbacks.on_child_message.as_mut())
                            {
                                cb(child, value, &handle);
                            }
                        });
                    }
                    StreamKind::Stdout | StreamKind::Stderr => {
                        if let (Some(child), Some(cb)) =
                            (registry.get(pid), callbacks.on_child_output.as_mut())
                        {
                            cb(child, kind, &bytes, &handle);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn maybe_heartbeat(&mut self) {
        if self.config.heartbeat_interval.is_zero() {
            return;
        }
        if self.last_heartbeat.elapsed() < self.config.heartbeat_interval {
            return;
        }
        let handle = self.handle.clone();
        if let Some(cb) = self.callbacks.heartbeat_callback.as_mut() {
            cb(&handle);
        }
        self.last_heartbeat = Instant::now();
    }

    fn reap_and_replenish(&mut self) -> anyhow::Result<()> {
        let reaped = reaper::drain(&mut self.registry, &mut self.mux, &mut self.parser)?;
        if !reaped.is_empty() {
            let handle = self.handle.clone();
            let Self { callbacks, .. } = self;
            for reaped_child in &reaped {
                if let Some(cb) = callbacks.on_child_exit.as_mut() {
                    cb(
                        &reaped_child.snapshot,
                        reaped_child.snapshot.exit_reason,
                        &handle,
                    );
                }
            }
        }

        let created = scale::replenish(
            &self.config,
            &mut self.registry,
            &mut self.mux,
            CreateReason::Replacement,
        );
        for pid in created {
            self.fire_create(pid);
        }
        Ok(())
    }

    fn fire_create(&mut self, pid: i32) {
        let handle = self.handle.clone();
        let Self {
            registry,
            callbacks,
            ..
        } = self;
        if let Some(child) = registry.get(pid) {
            if let Some(cb) = callbacks.on_child_create.as_mut() {
                cb(child, &handle);
            }
        }
    }

    fn forward_reload(&self) {
        for pid in self.registry.pids() {
            if let Err(e) = spawner::send_signal(pid, nix::sys::signal::Signal::SIGHUP) {
                warn!(pid, error = %e, "failed to forward reload signal");
            }
        }
    }

    fn fan_out_user_signal(&mut self, signum: i32) {
        let handle = self.handle.clone();
        let Self {
            registry,
            callbacks,
            ..
        } = self;
        if let Some(cb) = callbacks.on_child_signal.as_mut() {
            for child in registry.iter() {
                cb(child, signum, &handle);
            }
        }
    }

    /// Drains requests a callback queued on the [`Handle`] since the last tick. Returns whether
    /// shutdown was requested.
    fn drain_handle_requests(&mut self) -> bool {
        let drained = self.handle.drain();

        for _ in 0..drained.scale_ups {
            if let Some(pid) = scale::scale_up(&self.config, &mut self.registry, &mut self.mux) {
                self.fire_create(pid);
            }
        }
        for _ in 0..drained.scale_downs {
            scale::scale_down(&mut self.registry, &self.config);
        }
        for (pid, bytes) in drained.inputs {
            self.write_child_input(pid, &bytes);
        }
        for (pid, signal) in drained.signals {
            if let Err(e) = spawner::send_signal(pid, signal) {
                warn!(pid, error = %e, "failed to deliver requested signal");
            }
        }

        drained.shutdown
    }

    fn write_child_input(&mut self, pid: i32, bytes: &[u8]) {
        let Some(child) = self.registry.get(pid) else {
            return;
        };
        let Some(stdin) = child.stdin.as_ref() else {
            return;
        };
        if let Err(e) = io_mux::write_nonblocking(stdin.as_fd(), bytes) {
            warn!(pid, error = %e, "error writing to child stdin");
        }
    }

    fn run_shutdown(&mut self) {
        let handle = self.handle.clone();
        let count = self.registry.len();
        let Self {
            callbacks,
            registry,
            ..
        } = self;
        if let Some(cb) = callbacks.on_shutdown.as_mut() {
            cb(registry, &handle);
        }

        info!(count, "shutdown: terminating pool");
        shutdown::run(&mut self.registry, &mut self.mux, &mut self.parser);
        info!("shutdown complete, registry empty");
    }
}
