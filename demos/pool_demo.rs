//! A small hard-coded demonstration of the Command strategy: a pool of `sh` workers that each
//! print a line, sleep, and occasionally emit a structured heartbeat message over their IPC
//! channel. Run with `cargo run --bin pool_demo` and send it `SIGUSR1`/`SIGTERM` from another
//! terminal to see the signal surface react.

use std::time::Duration;

use procpool::SupervisorBuilder;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let supervisor = SupervisorBuilder::new()
        .command(
            "sh -c 'i=0; while true; do \
                i=$((i+1)); \
                echo \"tick $i\"; \
                printf \"{\\\"tick\\\":%d}\\n\" \"$i\" >&3; \
                sleep 1; \
            done'",
        )
        .scale_limits(2, 4)
        .heartbeat(Duration::from_secs(5), |_handle| {
            tracing::info!("heartbeat");
        })
        .on_child_create(|child, _handle| {
            tracing::info!(pid = child.pid, reason = ?child.create_reason, "child created");
        })
        .on_child_exit(|child, reason, _handle| {
            tracing::info!(pid = child.pid, ?reason, "child exited");
        })
        .on_child_message(|child, value, _handle| {
            tracing::info!(pid = child.pid, %value, "child message");
        })
        .on_child_output(|child, kind, bytes, _handle| {
            let text = String::from_utf8_lossy(bytes);
            tracing::info!(pid = child.pid, ?kind, %text, "child output");
        })
        .on_shutdown(|registry, _handle| {
            tracing::info!(count = registry.len(), "shutting down pool");
        })
        .build()?;

    tracing::info!("starting pool, send SIGTERM or SIGINT to stop");
    supervisor.run()?;
    Ok(())
}
