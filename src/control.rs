//! The external interface used by bridges/UIs: register a `(device, port)`
//! tuple and set its desired state. Safe to call concurrently with inform
//! handling; never blocks on network I/O.

use std::sync::Arc;

use crate::queue::CommandQueue;
use crate::state::{StateError, StateTree};

#[derive(Clone)]
pub struct ControlSurface {
    state: Arc<StateTree>,
    queue: Arc<CommandQueue>,
}

impl ControlSurface {
    pub fn new(state: Arc<StateTree>, queue: Arc<CommandQueue>) -> Self {
        ControlSurface { state, queue }
    }

    /// Register a `(device, port)` tuple. Idempotent; also ensures the
    /// device's command queue exists so the reconciler can push to it the
    /// first time it sees this device.
    pub fn register(&self, mac: &str, port: usize) {
        self.state.register(mac, port);
        self.queue.ensure_device(mac);
    }

    pub fn set_desired(&self, mac: &str, port: usize, desired: bool) -> Result<(), StateError> {
        self.state.set_desired(mac, port, desired)
    }
}
