//! Enforces the [min, max] envelope: replenishes on loss, services explicit scale requests.

use tracing::{info, warn};

use crate::config::Config;
use crate::io_mux::IOMultiplexer;
use crate::registry::{ChildRegistry, CreateReason};
use crate::spawner::send_signal;
use crate::TERMINATE_SIGNAL;

/// Spawns children up to `min`, tagged `reason`. Returns the pids created, in creation order, so
/// the caller can fire `onChildCreate` for each (the registry insert must happen before that
/// callback runs, per the Child lifecycle in §3).
///
/// A spawn failure is logged and stops this round rather than propagated: a transient fork/exec
/// error shouldn't abort a pool that's already running (§7). The next child-exit tick, or the
/// next explicit scale call, tries again.
pub fn replenish(
    config: &Config,
    registry: &mut ChildRegistry,
    mux: &mut IOMultiplexer,
    reason: CreateReason,
) -> Vec<i32> {
    let mut created = Vec::new();
    while registry.len() < config.min {
        match config.spawn_one(reason) {
            Ok(child) => {
                if let Err(e) = mux.register_child(&child) {
                    warn!(pid = child.pid, error = %e, "failed to register replenished child for I/O readiness");
                }
                let pid = child.pid;
                info!(pid, ?reason, "child spawned");
                registry.insert(child);
                created.push(pid);
            }
            Err(e) => {
                warn!(error = %e, "replenish spawn failed, will retry next tick");
                break;
            }
        }
    }
    created
}

/// Services an explicit `scale_up()`: spawns one child tagged `ScaleUp` iff size < max.
/// No-op (returns `None`) otherwise, or if the spawn itself fails.
pub fn scale_up(config: &Config, registry: &mut ChildRegistry, mux: &mut IOMultiplexer) -> Option<i32> {
    if registry.len() >= config.max {
        return None;
    }
    match config.spawn_one(CreateReason::ScaleUp) {
        Ok(child) => {
            if let Err(e) = mux.register_child(&child) {
                warn!(pid = child.pid, error = %e, "failed to register scaled-up child for I/O readiness");
            }
            let pid = child.pid;
            info!(pid, "child scaled up");
            registry.insert(child);
            Some(pid)
        }
        Err(e) => {
            warn!(error = %e, "scale_up spawn failed");
            None
        }
    }
}

/// Services an explicit `scale_down()`: marks one non-terminating child and sends it the
/// terminate signal, iff size > min. The eventual exit flows through the reaper and does not
/// trigger a replacement, since size after that exit is still >= min (§4.8). No-op if the
/// envelope forbids it or every child is already marked `terminating`.
pub fn scale_down(registry: &mut ChildRegistry, config: &Config) -> bool {
    if registry.len() <= config.min {
        return false;
    }
    let Some(pid) = registry.pick_for_scale_down() else {
        return false;
    };
    if let Some(child) = registry.get_mut(pid) {
        child.terminating = true;
    }
    if let Err(e) = send_signal(pid, TERMINATE_SIGNAL) {
        warn!(pid, error = %e, "failed to signal child for scale-down");
    }
    info!(pid, "child marked for scale-down");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn idle_closure_config(min: usize, max: usize) -> Config {
        let mut config = Config::default();
        config.min = min;
        config.max = max;
        config.strategy = Some(crate::config::Strategy::Closure(std::sync::Arc::new(
            |mut sock: UnixStream| {
                use std::io::Read;
                let mut buf = [0u8; 1];
                let _ = sock.read(&mut buf);
            },
        )));
        config
    }

    fn reap_all(registry: &mut ChildRegistry) {
        for pid in registry.pids() {
            let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), crate::FORCE_KILL_SIGNAL);
            let _ = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None);
        }
    }

    mod replenish {
        use super::*;

        #[test]
        fn spawns_up_to_min() {
            let config = idle_closure_config(3, 3);
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();

            let created = replenish(&config, &mut registry, &mut mux, CreateReason::Initial);
            assert_eq!(created.len(), 3);
            assert_eq!(registry.len(), 3);

            reap_all(&mut registry);
        }
    }

    mod scale_up {
        use super::*;

        #[test]
        fn refuses_past_max() {
            let config = idle_closure_config(1, 1);
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            replenish(&config, &mut registry, &mut mux, CreateReason::Initial);

            assert_eq!(scale_up(&config, &mut registry, &mut mux), None);

            reap_all(&mut registry);
        }

        #[test]
        fn spawns_below_max() {
            let config = idle_closure_config(1, 2);
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            replenish(&config, &mut registry, &mut mux, CreateReason::Initial);

            let pid = scale_up(&config, &mut registry, &mut mux).unwrap();
            assert_eq!(registry.len(), 2);
            assert_eq!(
                registry.get(pid).unwrap().create_reason,
                CreateReason::ScaleUp
            );

            reap_all(&mut registry);
        }
    }

    mod scale_down {
        use super::*;

        #[test]
        fn refuses_at_min() {
            let config = idle_closure_config(1, 1);
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            replenish(&config, &mut registry, &mut mux, CreateReason::Initial);

            assert!(!scale_down(&mut registry, &config));

            reap_all(&mut registry);
        }

        #[test]
        fn marks_terminating_and_distinct_across_calls() {
            let config = idle_closure_config(1, 3);
            let mut registry = ChildRegistry::new();
            let mut mux = IOMultiplexer::new().unwrap();
            replenish(&config, &mut registry, &mut mux, CreateReason::Initial);
            scale_up(&config, &mut registry, &mut mux);
            scale_up(&config, &mut registry, &mut mux);
            assert_eq!(registry.len(), 3);

            assert!(scale_down(&mut registry, &config));
            assert!(scale_down(&mut registry, &config));
            // Marking doesn't remove from the registry -- that's the reaper's job once the
            // terminate signal actually takes the process down.
            assert_eq!(registry.len(), 3);

            let terminating: Vec<i32> = registry
                .iter()
                .filter(|c| c.terminating)
                .map(|c| c.pid)
                .collect();
            assert_eq!(terminating.len(), 2);

            reap_all(&mut registry);
        }
    }
}
