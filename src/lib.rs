//! A library that supervises a pool of worker children under a single long-running master.
//!
//! A consumer describes what a worker is -- an external command, or an in-process routine invoked
//! in a forked child -- registers lifecycle callbacks on a [`SupervisorBuilder`], and calls
//! [`Supervisor::run`], which blocks the calling thread and drives the master event loop until a
//! termination signal (or [`Handle::shutdown`]) arrives.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use procpool::SupervisorBuilder;
//!
//! let supervisor = SupervisorBuilder::new()
//!     .command("sleep 30")
//!     .scale_limits(2, 4)
//!     .on_child_create(|child, _handle| println!("spawned pid {}", child.pid))
//!     .on_child_exit(|child, reason, _handle| println!("pid {} exited: {reason:?}", child.pid))
//!     .build()
//!     .expect("failed to build supervisor");
//!
//! supervisor.run().expect("supervisor failed");
//! ```
//!
//! # Concurrency model
//!
//! The master runs a single-threaded cooperative event loop (§5 of the design). All registry
//! mutation, callback invocation, and I/O dispatch happen on that one thread; the only real
//! concurrency is the children themselves (independent processes) and the kernel delivering
//! signals asynchronously. A slow callback stalls the loop. [`Supervisor::run_in_background`]
//! moves that one thread off the caller's -- it does not add any internal parallelism -- so the
//! caller can keep driving a retained [`Handle`] from wherever it is already running.
//!
//! This crate is POSIX-only: it assumes fork, exec, pipes, Unix-domain socket pairs, non-blocking
//! I/O readiness notification, and reliable delivery of child-exit and user signals to a
//! single-threaded event loop. It does not support Windows, cross-host distribution, container
//! management, or cgroup/resource limiting.

mod builder;
mod callbacks;
mod config;
pub mod error;
mod handle;
pub mod io_mux;
pub mod message;
pub mod reaper;
pub mod registry;
mod scale;
mod shutdown;
pub mod signals;
pub mod spawner;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use callbacks::{
    CreateCallback, ExitCallback, HeartbeatCallback, MessageCallback, OutputCallback,
    ShutdownCallback, SignalCallback,
};
pub use config::Strategy;
pub use error::SupervisorError;
pub use handle::Handle;
pub use io_mux::StreamKind;
pub use registry::{Child, ChildRegistry, CreateReason, ExitReason};
pub use supervisor::Supervisor;

/// The signal that requests graceful shutdown and reload-propagation, and that the reaper
/// classifies an exit against. Fixed at `SIGTERM`/`SIGINT` for shutdown (either raises the
/// shutdown flag; only `SIGTERM` is re-sent by the orchestrator), `SIGHUP` for reload.
pub const TERMINATE_SIGNAL: nix::sys::signal::Signal = nix::sys::signal::Signal::SIGTERM;

/// The signal the shutdown orchestrator sends to a survivor once the 5-second grace period
/// elapses. An exit caused by this signal is reported as `ExitReason::Killed`; any other signal
/// is `ExitReason::Signal`.
pub const FORCE_KILL_SIGNAL: nix::sys::signal::Signal = nix::sys::signal::Signal::SIGKILL;
