//! Drains completed children without blocking and finalizes them.

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::debug;

use crate::io_mux::IOMultiplexer;
use crate::message::MessageParser;
use crate::registry::{Child, ChildRegistry, ExitReason};
use crate::FORCE_KILL_SIGNAL;

/// One finalized exit, ready to be handed to `onChildExit`.
pub struct ReapedChild {
    pub snapshot: Child,
}

/// Repeatedly polls for any finished child without blocking, finalizing each one. Stops when no
/// more children are reportable, per §4.7.
///
/// # Errors
///
/// Returns an error if `waitpid` fails for a reason other than `ECHILD`.
pub fn drain(
    registry: &mut ChildRegistry,
    mux: &mut IOMultiplexer,
    parser: &mut MessageParser,
) -> Result<Vec<ReapedChild>> {
    let mut reaped = Vec::new();
    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => status,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => return Err(e).context("error waiting for children"),
        };

        let (pid, exit_code, exit_reason) = match status {
            WaitStatus::Exited(pid, code) => (pid.as_raw(), code, ExitReason::Normal),
            WaitStatus::Signaled(pid, signal, _core_dumped) => {
                let reason = if signal == FORCE_KILL_SIGNAL {
                    ExitReason::Killed
                } else {
                    ExitReason::Signal
                };
                (pid.as_raw(), 0, reason)
            }
            WaitStatus::StillAlive => break,
            _ => continue,
        };

        let Some(mut child) = registry.remove(pid) else {
            debug!(pid, "reaped stale pid not present in registry");
            continue;
        };

        debug!(pid, ?exit_reason, exit_code, "child reaped");

        mux.deregister_child(&child);
        parser.forget(pid);
        close_streams(&mut child);

        child.running = false;
        child.exit_code = exit_code;
        child.exit_reason = exit_reason;
        let snapshot = child.exit_snapshot();
        reaped.push(ReapedChild { snapshot });
    }
    Ok(reaped)
}

/// Drops every descriptor and the process handle. Idempotent: dropping an already-`None` field
/// is a no-op, matching the ownership rule that closing an already-closed handle must be
/// harmless.
pub fn close_streams(child: &mut Child) {
    child.stdin.take();
    child.stdout.take();
    child.stderr.take();
    child.ipc_channel.take();
    child.process.take();
}

/// Used by callers who need to name the force-kill signal explicitly (shutdown orchestrator).
pub fn is_force_kill(signal: Signal) -> bool {
    signal == FORCE_KILL_SIGNAL
}
