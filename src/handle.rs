//! The cloneable, callback-facing reference into a running supervisor's live registry.
//!
//! Every callback is invoked synchronously from the event loop thread while the registry is
//! already borrowed, so a `Handle` cannot mutate it directly. Instead it queues requests
//! (`scale_up`, `send_child_input`, ...) into a side buffer that the loop drains on its next turn
//! -- the same signal-to-flag deferral pattern `SignalGate` uses (§9), generalized from "a signal
//! arrived" to "a callback asked for something".
//!
//! Backed by `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>`: an embedder typically calls
//! `Supervisor::handle` before moving the supervisor itself onto a dedicated thread via `run` or
//! `run_in_background`, then keeps driving that handle from whatever thread it started on. The
//! mutex is never contended in practice -- the event loop thread only ever drains it between
//! ticks -- it exists purely so the type is `Send + Sync`.

use std::sync::{Arc, Mutex};

use nix::sys::signal::Signal;

/// Requests accumulated by a [`Handle`] since the loop last drained it.
#[derive(Default)]
pub(crate) struct DrainedRequests {
    pub scale_ups: u32,
    pub scale_downs: u32,
    pub inputs: Vec<(i32, Vec<u8>)>,
    pub signals: Vec<(i32, Signal)>,
    pub shutdown: bool,
}

#[derive(Default)]
struct Inner {
    scale_up_requests: u32,
    scale_down_requests: u32,
    inputs: Vec<(i32, Vec<u8>)>,
    signals: Vec<(i32, Signal)>,
    shutdown_requested: bool,
}

/// A cloneable reference into the running [`crate::Supervisor`]'s live state, handed to every
/// callback and also obtainable by the caller via [`crate::Supervisor::handle`] before `run()` is
/// called (since `run()` blocks and consumes the supervisor by value).
#[derive(Clone, Default)]
pub struct Handle {
    inner: Arc<Mutex<Inner>>,
}

impl Handle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Requests one scale-up, serviced on the loop's next turn if size < max (§4.8).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (another thread panicked while holding the lock).
    pub fn scale_up(&self) {
        self.inner.lock().unwrap().scale_up_requests += 1;
    }

    /// Requests one scale-down, serviced on the loop's next turn if size > min (§4.8).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (another thread panicked while holding the lock).
    pub fn scale_down(&self) {
        self.inner.lock().unwrap().scale_down_requests += 1;
    }

    /// Queues bytes to write to a child's stdin. A no-op if the child has no stdin (Closure
    /// strategy) or is no longer registered by the time the loop drains this request.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (another thread panicked while holding the lock).
    pub fn send_child_input(&self, pid: i32, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().inputs.push((pid, bytes.into()));
    }

    /// Queues a signal to deliver to an arbitrary pid.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (another thread panicked while holding the lock).
    pub fn signal(&self, pid: i32, signal: Signal) {
        self.inner.lock().unwrap().signals.push((pid, signal));
    }

    /// Requests graceful shutdown, as if the master had received its terminate signal. The
    /// programmatic equivalent of sending `SIGTERM` to the master process from a callback.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (another thread panicked while holding the lock).
    pub fn shutdown(&self) {
        self.inner.lock().unwrap().shutdown_requested = true;
    }

    pub(crate) fn drain(&self) -> DrainedRequests {
        let mut inner = self.inner.lock().unwrap();
        DrainedRequests {
            scale_ups: std::mem::take(&mut inner.scale_up_requests),
            scale_downs: std::mem::take(&mut inner.scale_down_requests),
            inputs: std::mem::take(&mut inner.inputs),
            signals: std::mem::take(&mut inner.signals),
            shutdown: std::mem::take(&mut inner.shutdown_requested),
        }
    }
}
