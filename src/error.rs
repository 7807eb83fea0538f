//! Error types surfaced at the supervisor's public boundary.
//!
//! Internal plumbing uses `anyhow::Result` for rich, ad hoc context (the way the rest of this
//! crate's helpers do). Only the two places an embedder can actually observe a failure --
//! `Supervisor::run` and the initial pool replenish it performs before entering the event loop --
//! convert that into one of the typed variants here.

use std::io;

use thiserror::Error;

/// Errors that can escape [`crate::Supervisor::run`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `run()` was called without a command or closure strategy configured.
    #[error("supervisor has no command or closure configured")]
    NotConfigured,

    /// The underlying launch (Command strategy) or fork (Closure strategy) failed.
    #[error("failed to spawn child{}: {source}", command.as_deref().map(|c| format!(" for command {c:?}")).unwrap_or_default())]
    SpawnFailed {
        /// The command line that failed to launch, if this was a Command-strategy spawn.
        command: Option<String>,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Allocating the Closure strategy's socket pair failed.
    #[error("failed to set up IPC socket pair: {source}")]
    IpcSetupFailed {
        /// The underlying `nix` error.
        source: nix::Error,
    },
}
