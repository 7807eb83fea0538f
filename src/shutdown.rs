//! Graceful-then-forceful termination of the whole pool when the loop exits (§4.10).

use std::thread;
use std::time::{Duration, Instant};

use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::io_mux::IOMultiplexer;
use crate::message::MessageParser;
use crate::reaper;
use crate::registry::ChildRegistry;
use crate::spawner::send_signal;
use crate::{FORCE_KILL_SIGNAL, TERMINATE_SIGNAL};

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Terminates every live child, polls (without blocking) for voluntary exits for up to 5 wall
/// clock seconds, then force-kills any survivor and blocks until each is reaped. The registry is
/// guaranteed empty on return. `onChildExit` is deliberately not invoked for anything reaped
/// here -- that guarantee is only for children that die during normal operation (§4.10, §9).
pub fn run(registry: &mut ChildRegistry, mux: &mut IOMultiplexer, parser: &mut MessageParser) {
    for pid in registry.pids() {
        if let Err(e) = send_signal(pid, TERMINATE_SIGNAL) {
            warn!(pid, error = %e, "failed to send terminate signal during shutdown");
        }
    }

    let deadline = Instant::now() + DRAIN_DEADLINE;
    while !registry.is_empty() && Instant::now() < deadline {
        match reaper::drain(registry, mux, parser) {
            Ok(reaped) => {
                for reaped_child in &reaped {
                    info!(pid = reaped_child.snapshot.pid, "child reaped during graceful shutdown");
                }
            }
            Err(e) => warn!(error = %e, "error draining exits during shutdown"),
        }
        if !registry.is_empty() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    if registry.is_empty() {
        return;
    }

    let survivors = registry.pids();
    for pid in &survivors {
        if let Err(e) = send_signal(*pid, FORCE_KILL_SIGNAL) {
            warn!(pid, error = %e, "failed to force-kill survivor during shutdown");
        }
    }

    for pid in survivors {
        if let Err(e) = waitpid(Pid::from_raw(pid), None) {
            warn!(pid, error = %e, "error blocking-waiting for force-killed child");
        }
        if let Some(mut child) = registry.remove(pid) {
            mux.deregister_child(&child);
            parser.forget(pid);
            reaper::close_streams(&mut child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CreateReason;
    use crate::spawner::spawn_command;
    use std::os::unix::net::UnixStream;

    mod run {
        use super::*;

        #[test]
        fn terminates_cooperative_child_and_empties_registry() {
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            let mut parser = MessageParser::new();

            let child = spawn_command("sleep 30", CreateReason::Initial).unwrap();
            mux.register_child(&child).unwrap();
            registry.insert(child);

            run(&mut registry, &mut mux, &mut parser);

            assert!(registry.is_empty());
        }

        #[test]
        fn force_kills_a_child_that_ignores_the_terminate_signal() {
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            let mut parser = MessageParser::new();

            let child = spawn_command(
                "sh -c \"trap '' TERM; while true; do sleep 0.1; done\"",
                CreateReason::Initial,
            )
            .unwrap();
            mux.register_child(&child).unwrap();
            registry.insert(child);

            run(&mut registry, &mut mux, &mut parser);

            assert!(registry.is_empty());
        }

        #[test]
        fn closure_child_sees_no_terminate_signal_but_still_gets_force_killed() {
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            let mut parser = MessageParser::new();

            // Closure children have no signal handler installed by this crate; the routine just
            // blocks forever until SIGTERM (default disposition: terminate) or SIGKILL lands.
            let child = crate::spawner::spawn_closure(
                &|_sock: UnixStream| loop {
                    std::thread::sleep(Duration::from_millis(50));
                },
                CreateReason::Initial,
            )
            .unwrap();
            mux.register_child(&child).unwrap();
            registry.insert(child);

            run(&mut registry, &mut mux, &mut parser);

            assert!(registry.is_empty());
        }
    }
}
