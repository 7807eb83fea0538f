//! The spawn-relevant configuration the event loop consumes: which strategy, and the [min, max]
//! envelope. Callbacks live separately in [`crate::callbacks::Callbacks`] (see its doc comment).

use std::io;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::error::SupervisorError;
use crate::registry::{Child, CreateReason};
use crate::spawner;

/// Which of the two child-creation strategies a [`crate::Supervisor`] uses. Exactly one must be
/// set before `run()`; selecting one is mutually exclusive with the other (§3).
pub enum Strategy {
    /// Exec a shell-style command line with four inherited descriptors.
    Command(String),
    /// Fork; the routine runs in the child with the child end of a socket pair. `Send + Sync` so
    /// `Config` -- and therefore `Supervisor` -- can move onto a dedicated thread.
    Closure(Arc<dyn Fn(UnixStream) + Send + Sync>),
}

pub struct Config {
    pub(crate) strategy: Option<Strategy>,
    pub(crate) min: usize,
    pub(crate) max: usize,
    pub(crate) heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: None,
            min: 1,
            max: 1,
            heartbeat_interval: Duration::ZERO,
        }
    }
}

impl Config {
    /// `run()`'s entry check: fails immediately if neither strategy was configured (§6).
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.strategy.is_none() {
            return Err(SupervisorError::NotConfigured);
        }
        Ok(())
    }

    /// Spawns one child under the configured strategy. Used for every spawn once the loop is
    /// already running (mid-loop replenish, `scale_up`); failures here are logged and retried
    /// rather than propagated, per §7.
    pub(crate) fn spawn_one(&self, reason: CreateReason) -> Result<Child> {
        match self.strategy.as_ref() {
            Some(Strategy::Command(command)) => spawner::spawn_command(command, reason),
            Some(Strategy::Closure(routine)) => spawner::spawn_closure(routine.as_ref(), reason),
            None => bail!("supervisor has no command or closure configured"),
        }
    }

    /// Spawns one child, surfacing a typed [`SupervisorError`] instead of swallowing the failure.
    /// Used only for the initial replenish before the loop starts (§7), where a dead-on-arrival
    /// pool is a configuration problem worth failing `run()` over rather than looping forever.
    pub(crate) fn spawn_one_typed(&self, reason: CreateReason) -> Result<Child, SupervisorError> {
        match self.strategy.as_ref() {
            Some(Strategy::Command(command)) => {
                spawner::spawn_command(command, reason).map_err(|source| {
                    SupervisorError::SpawnFailed {
                        command: Some(command.clone()),
                        source: io::Error::other(source.to_string()),
                    }
                })
            }
            Some(Strategy::Closure(routine)) => {
                let (child_end, parent_end) = spawner::make_ipc_socketpair()
                    .map_err(|source| SupervisorError::IpcSetupFailed { source })?;
                spawner::spawn_closure_with_sockets(child_end, parent_end, routine.as_ref(), reason)
                    .map_err(|source| SupervisorError::SpawnFailed {
                        command: None,
                        source: io::Error::other(source.to_string()),
                    })
            }
            None => Err(SupervisorError::NotConfigured),
        }
    }
}
