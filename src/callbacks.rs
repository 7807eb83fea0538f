//! The optional lifecycle callbacks an embedder registers on a [`crate::SupervisorBuilder`].

use serde_json::Value;

use crate::handle::Handle;
use crate::io_mux::StreamKind;
use crate::registry::{Child, ChildRegistry, ExitReason};

// `+ Send` on every alias (not `Sync`: each callback only ever runs on the event loop's own
// thread) lets `Supervisor` as a whole be `Send`, so an embedder can move it onto a dedicated
// thread via `Supervisor::run_in_background`.
pub type CreateCallback = Box<dyn FnMut(&Child, &Handle) + Send>;
pub type ExitCallback = Box<dyn FnMut(&Child, ExitReason, &Handle) + Send>;
pub type SignalCallback = Box<dyn FnMut(&Child, i32, &Handle) + Send>;
pub type MessageCallback = Box<dyn FnMut(&Child, Value, &Handle) + Send>;
pub type OutputCallback = Box<dyn FnMut(&Child, StreamKind, &[u8], &Handle) + Send>;
pub type HeartbeatCallback = Box<dyn FnMut(&Handle) + Send>;
pub type ShutdownCallback = Box<dyn FnMut(&ChildRegistry, &Handle) + Send>;

/// The callback set, kept separate from [`crate::config::Config`] so the event loop can borrow
/// spawn parameters (strategy, min, max) and the callbacks independently -- a callback that
/// itself triggers a spawn (e.g. `onChildCreate` calling `scale_up`) would otherwise need two
/// conflicting mutable borrows of the same struct.
#[derive(Default)]
pub struct Callbacks {
    pub on_child_create: Option<CreateCallback>,
    pub on_child_exit: Option<ExitCallback>,
    pub on_child_signal: Option<SignalCallback>,
    pub on_child_message: Option<MessageCallback>,
    pub on_child_output: Option<OutputCallback>,
    pub heartbeat_callback: Option<HeartbeatCallback>,
    pub on_shutdown: Option<ShutdownCallback>,
}
