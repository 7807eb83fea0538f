//! The authoritative record of live children and the map that owns them.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::process::Child as ProcessHandle;

/// Why a [`Child`] was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateReason {
    /// Part of the initial replenish to `min` when `run()` starts.
    Initial,
    /// Spawned to replace a child that exited and left the registry below `min`.
    Replacement,
    /// Spawned by an explicit `scale_up()` call.
    ScaleUp,
}

/// Why a [`Child`] stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Still running; no exit has been observed.
    Unknown,
    /// Exited normally (any exit code, including non-zero).
    Normal,
    /// Terminated by a signal other than the force-kill signal.
    Signal,
    /// Terminated by the force-kill signal (`SIGKILL`), i.e. the orchestrator gave up waiting.
    Killed,
}

/// One process under supervision.
///
/// A `Child` exclusively owns its descriptors and process handle. Descriptors are open iff
/// `running` is true; they are taken and dropped exactly once, by the [`crate::reaper::Reaper`]
/// or the [`crate::shutdown::ShutdownOrchestrator`].
pub struct Child {
    pub pid: i32,
    pub create_reason: CreateReason,
    pub process: Option<ProcessHandle>,
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
    pub stderr: Option<OwnedFd>,
    pub ipc_channel: Option<OwnedFd>,
    pub running: bool,
    pub exit_code: i32,
    pub exit_reason: ExitReason,
    /// Set once this child has been signalled for scale-down, so it isn't picked twice.
    pub terminating: bool,
}

impl Child {
    /// Builds the by-value snapshot handed to `onChildExit`: descriptors cleared, `running` false.
    pub fn exit_snapshot(&self) -> Child {
        Child {
            pid: self.pid,
            create_reason: self.create_reason,
            process: None,
            stdin: None,
            stdout: None,
            stderr: None,
            ipc_channel: None,
            running: false,
            exit_code: self.exit_code,
            exit_reason: self.exit_reason,
            terminating: self.terminating,
        }
    }
}

/// Map from pid to [`Child`]. The sole mutator is the master loop: spawn inserts, reap and
/// shutdown remove.
#[derive(Default)]
pub struct ChildRegistry {
    children: HashMap<i32, Child>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, child: Child) {
        let previous = self.children.insert(child.pid, child);
        debug_assert!(previous.is_none(), "pid reused while still registered");
    }

    pub fn remove(&mut self, pid: i32) -> Option<Child> {
        self.children.remove(&pid)
    }

    pub fn get(&self, pid: i32) -> Option<&Child> {
        self.children.get(&pid)
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut Child> {
        self.children.get_mut(&pid)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Child> {
        self.children.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Child> {
        self.children.values_mut()
    }

    pub fn pids(&self) -> Vec<i32> {
        self.children.keys().copied().collect()
    }

    /// Picks a child not already marked `terminating`, for `scale_down`. Iteration order is
    /// unspecified but stable within a single pass, per the data model invariants.
    pub fn pick_for_scale_down(&self) -> Option<i32> {
        self.children
            .values()
            .find(|child| !child.terminating)
            .map(|child| child.pid)
    }
}
