//! Spawns children under either the Command or Closure strategy.
//!
//! Grounded on `jpmelos-fdintercept`'s `fd.rs::register_fd_into_poll` for the non-blocking-fd
//! setup and `process.rs` for the RAII-over-a-process-handle idiom, and on the fork/socketpair
//! plumbing in the pack's `datadog-crashtracker` collector (`other_examples/.../collector_manager.rs`)
//! for the Closure strategy.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{Context, Result, bail};
use nix::fcntl::{self, OFlag};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use nix::unistd::{self, ForkResult, Pid};

use crate::registry::{Child, CreateReason, ExitReason};

/// Sets a descriptor non-blocking, the way `register_fd_into_poll` does for every fd handed to
/// `mio`.
///
/// # Errors
///
/// Returns an error if reading or setting the fd's flags via `fcntl` fails.
pub fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let flags = fcntl::fcntl(fd, fcntl::F_GETFL).context("error getting fd flags")?;
    fcntl::fcntl(
        fd,
        fcntl::F_SETFL(OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK),
    )
    .context("error setting fd non-blocking")?;
    Ok(())
}

fn dup2_and_close(src: RawFd, dst: RawFd) -> io::Result<()> {
    if src != dst {
        unistd::dup2(src, dst).map_err(io::Error::from)?;
        let _ = unistd::close(src);
    }
    Ok(())
}

/// Spawns a Command-strategy child: four freshly-allocated pipes become the child's fds 0-3.
///
/// The master keeps the other end of each pipe, set non-blocking, and the command is launched
/// with a `pre_exec` hook that `dup2`s each pipe end into place right before `exec`, closing the
/// originals and the master's own copies inside the forked child.
///
/// # Errors
///
/// Returns an error if `command_line` fails to parse, names no executable, if allocating or
/// configuring any of the four pipes fails, or if the underlying launch fails.
pub fn spawn_command(command_line: &str, reason: CreateReason) -> Result<Child> {
    let mut parts = shlex::split(command_line)
        .with_context(|| format!("error parsing command line {command_line:?}"))?;
    if parts.is_empty() {
        bail!("command line {command_line:?} has no executable");
    }
    let program = parts.remove(0);

    // `pipe2(O_CLOEXEC)` rather than plain `pipe()`: in a pool, the master still holds every
    // previously-spawned sibling's master-side fds open when this child forks, and plain `pipe()`
    // fds would all be inherited across this child's `exec` too. `dup2` always clears
    // `FD_CLOEXEC` on the destination fd (POSIX), so the four descriptors this child actually
    // needs at fds 0-3 still survive `exec`; every sibling's (and this spawn's own) master-side
    // copy does not.
    let (stdin_read, stdin_write) =
        unistd::pipe2(OFlag::O_CLOEXEC).context("error creating stdin pipe")?;
    let (stdout_read, stdout_write) =
        unistd::pipe2(OFlag::O_CLOEXEC).context("error creating stdout pipe")?;
    let (stderr_read, stderr_write) =
        unistd::pipe2(OFlag::O_CLOEXEC).context("error creating stderr pipe")?;
    let (ipc_read, ipc_write) =
        unistd::pipe2(OFlag::O_CLOEXEC).context("error creating IPC pipe")?;

    set_nonblocking(&stdin_write)?;
    set_nonblocking(&stdout_read)?;
    set_nonblocking(&stderr_read)?;
    set_nonblocking(&ipc_read)?;

    // Raw fds captured by value into the `pre_exec` closure, which runs in the forked child
    // (after fork, before exec) and therefore owns its own copy of every fd the parent had open.
    let child_stdin = stdin_read.as_raw_fd();
    let child_stdout = stdout_write.as_raw_fd();
    let child_stderr = stderr_write.as_raw_fd();
    let child_ipc = ipc_write.as_raw_fd();
    let master_stdin = stdin_write.as_raw_fd();
    let master_stdout = stdout_read.as_raw_fd();
    let master_stderr = stderr_read.as_raw_fd();
    let master_ipc = ipc_read.as_raw_fd();

    let mut command = Command::new(&program);
    command.args(parts);
    // SAFETY: the closure only calls `dup2`/`close`, both async-signal-safe, and touches no
    // Rust-managed allocator state.
    unsafe {
        command.pre_exec(move || {
            dup2_and_close(child_stdin, 0)?;
            dup2_and_close(child_stdout, 1)?;
            dup2_and_close(child_stderr, 2)?;
            dup2_and_close(child_ipc, 3)?;
            for fd in [master_stdin, master_stdout, master_stderr, master_ipc] {
                let _ = unistd::close(fd);
            }
            Ok(())
        });
    }

    let process = command
        .spawn()
        .with_context(|| format!("error starting command {command_line:?}"))?;
    let pid = process
        .id()
        .try_into()
        .context("child pid does not fit in i32")?;

    // Dropping these `OwnedFd`s closes the master's copies of the child-side pipe ends, which is
    // what lets the master observe EOF once the child exits.
    drop(stdin_read);
    drop(stdout_write);
    drop(stderr_write);
    drop(ipc_write);

    Ok(Child {
        pid,
        create_reason: reason,
        process: Some(process),
        stdin: Some(stdin_write),
        stdout: Some(stdout_read),
        stderr: Some(stderr_read),
        ipc_channel: Some(ipc_read),
        running: true,
        exit_code: 0,
        exit_reason: ExitReason::Unknown,
        terminating: false,
    })
}

/// Spawns a Closure-strategy child: fork, with the child and parent sharing one end each of a
/// freshly-allocated Unix stream socket pair.
///
/// # Safety
///
/// This calls `fork()`. The caller (the event loop, which is single-threaded per the
/// supervisor's concurrency model) must not hold locks across the fork that the child would need
/// but cannot safely re-acquire.
///
/// # Errors
///
/// Returns an error if allocating the socket pair or forking fails.
pub fn spawn_closure(
    routine: &(dyn Fn(UnixStream) + 'static),
    reason: CreateReason,
) -> Result<Child> {
    let (child_end, parent_end) =
        make_ipc_socketpair().context("error creating socket pair")?;
    spawn_closure_with_sockets(child_end, parent_end, routine, reason)
}

/// Allocates the Unix-domain stream socket pair backing a Closure child's IPC channel, split out
/// from [`spawn_closure`] so the boundary (`Supervisor::run`'s initial replenish) can classify a
/// failure here as `IpcSetupFailed` rather than the generic `SpawnFailed`.
///
/// # Errors
///
/// Returns the underlying `nix` error if `socketpair` fails.
pub fn make_ipc_socketpair() -> std::result::Result<(OwnedFd, OwnedFd), nix::Error> {
    socket::socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
}

/// Forks a Closure-strategy child given an already-allocated socket pair.
///
/// # Errors
///
/// Returns an error if forking fails, or if setting the parent's end of the socket pair
/// non-blocking fails.
///
/// # Safety
///
/// Same caveats as [`spawn_closure`]: this calls `fork()` from a single-threaded event loop.
pub fn spawn_closure_with_sockets(
    child_end: OwnedFd,
    parent_end: OwnedFd,
    routine: &(dyn Fn(UnixStream) + 'static),
    reason: CreateReason,
) -> Result<Child> {
    // SAFETY: single-threaded event loop; the child side only runs `routine` and exits.
    match unsafe { unistd::fork() }.context("error forking closure child")? {
        ForkResult::Child => {
            drop(parent_end);
            // SAFETY: `child_end` is a valid, open fd owned by this process alone past this point.
            let stream = unsafe { UnixStream::from_raw_fd(child_end.as_raw_fd()) };
            std::mem::forget(child_end); // ownership now lives in `stream`
            routine(stream);
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            drop(child_end);
            set_nonblocking(&parent_end)?;
            Ok(Child {
                pid: child.as_raw(),
                create_reason: reason,
                process: None,
                stdin: None,
                stdout: None,
                stderr: None,
                ipc_channel: Some(parent_end),
                running: true,
                exit_code: 0,
                exit_reason: ExitReason::Unknown,
                terminating: false,
            })
        }
    }
}

/// Sends a POSIX signal to an arbitrary pid. Used by `signal(pid, sig)`, reload fan-out, and the
/// shutdown orchestrator's terminate/force-kill broadcasts.
///
/// # Errors
///
/// Returns an error if the kernel rejects the signal delivery (e.g. no such pid, or the signal
/// number is invalid).
pub fn send_signal(pid: i32, signal: nix::sys::signal::Signal) -> Result<()> {
    nix::sys::signal::kill(Pid::from_raw(pid), signal)
        .with_context(|| format!("error sending {signal} to pid {pid}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    mod spawn_command {
        use super::*;

        #[test]
        fn runs_and_relays_streams() {
            let child = spawn_command("cat", CreateReason::Initial).unwrap();
            assert!(child.running);
            assert!(child.stdin.is_some());
            assert!(child.ipc_channel.is_some());

            let mut stdin = std::fs::File::from(child.stdin.unwrap());
            stdin.write_all(b"hi\n").unwrap();
            drop(stdin);

            // The write end is closed, so `cat` will see EOF and exit; reap it directly here
            // since this unit test doesn't run the full reaper.
            let mut process = child.process.unwrap();
            let status = process.wait().unwrap();
            assert!(status.success());
        }

        #[test]
        fn rejects_empty_command() {
            assert!(spawn_command("   ", CreateReason::Initial).is_err());
        }
    }

    mod spawn_closure {
        use super::*;

        #[test]
        fn child_writes_to_socket() {
            let child = spawn_closure(
                &|mut sock: UnixStream| {
                    let _ = sock.write_all(b"{\"hello\":\"world\"}\n");
                },
                CreateReason::Initial,
            )
            .unwrap();

            let mut file = std::fs::File::from(child.ipc_channel.unwrap());
            // The parent end is non-blocking; give the child a moment to run.
            std::thread::sleep(std::time::Duration::from_millis(50));
            let mut buf = Vec::new();
            let _ = file.read_to_end(&mut buf);
            assert_eq!(buf, b"{\"hello\":\"world\"}\n");

            nix::sys::wait::waitpid(Pid::from_raw(child.pid), None).unwrap();
        }
    }
}
