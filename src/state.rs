//! The per-(device,port) `(initialized, observed, desired)` state tree.
//!
//! Structural mutation (adding a device or port) takes the tree's write
//! lock; reading/writing state fields for an already-registered port takes
//! only that port's own mutex, so concurrent informs for different ports on
//! the same device never block each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, RwLock};

#[derive(Debug)]
pub enum StateError {
    UnknownDevice(String),
    UnknownPort(String, usize),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::UnknownDevice(mac) => write!(f, "Unknown device: {mac}"),
            StateError::UnknownPort(mac, port) => write!(f, "Unknown port {port} on device {mac}"),
        }
    }
}

impl std::error::Error for StateError {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub initialized: bool,
    pub observed: bool,
    pub desired: bool,
}

/// Result of reconciling one fresh observation against prior state. See
/// the reconciler (`crate::reconcile`) for how each variant is produced and
/// acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First observation since registration; `observed`/`initialized` were
    /// just set, no command should be generated.
    First,
    /// The sensor agrees with the current desired state; nothing to do.
    Agrees,
    /// The sensor disagrees but hasn't changed since the last observation —
    /// the controller's desired state (carried here) should be
    /// (re-)asserted.
    DisagreesControllerWants(bool),
    /// The sensor's value changed since the last observation — sensor wins,
    /// `desired` is updated to match and no command is emitted.
    DisagreesSensorChanged,
}

struct PortState {
    lock: Mutex<DeviceState>,
}

struct DeviceEntry {
    ports: HashMap<usize, PortState>,
}

/// `mac -> port -> DeviceState`, guarded by a coarse read/write lock for
/// structural changes (new devices/ports), then a per-port mutex for
/// state mutation.
#[derive(Default)]
pub struct StateTree {
    devices: RwLock<HashMap<String, DeviceEntry>>,
}

impl StateTree {
    pub fn new() -> Self {
        StateTree {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: creates the device entry and the port entry with
    /// `initialized=false, observed=false, desired=false` if either is
    /// missing. Takes the structural write lock.
    pub fn register(&self, mac: &str, port: usize) {
        {
            let devices = self.devices.read().expect("state tree lock poisoned");
            if let Some(entry) = devices.get(mac) {
                if entry.ports.contains_key(&port) {
                    return;
                }
            }
        }

        let mut devices = self.devices.write().expect("state tree lock poisoned");
        let entry = devices.entry(mac.to_owned()).or_insert_with(|| DeviceEntry {
            ports: HashMap::new(),
        });
        entry.ports.entry(port).or_insert_with(|| PortState {
            lock: Mutex::new(DeviceState::default()),
        });
    }

    fn with_port<T>(
        &self,
        mac: &str,
        port: usize,
        f: impl FnOnce(&mut DeviceState) -> T,
    ) -> Result<T, StateError> {
        let devices = self.devices.read().expect("state tree lock poisoned");
        let entry = devices
            .get(mac)
            .ok_or_else(|| StateError::UnknownDevice(mac.to_owned()))?;
        let port_state = entry
            .ports
            .get(&port)
            .ok_or_else(|| StateError::UnknownPort(mac.to_owned(), port))?;
        let mut state = port_state.lock.lock().expect("port lock poisoned");
        Ok(f(&mut state))
    }

    /// Set the controller's desired state for a registered port.
    pub fn set_desired(&self, mac: &str, port: usize, desired: bool) -> Result<(), StateError> {
        self.with_port(mac, port, |state| state.desired = desired)
    }

    pub fn get(&self, mac: &str, port: usize) -> Result<DeviceState, StateError> {
        self.with_port(mac, port, |state| *state)
    }

    /// Fold a fresh sensor reading into the port's state and classify it.
    /// Updates `observed` (and `desired` on a sensor-side change) before
    /// returning.
    pub fn observe(&self, mac: &str, port: usize, output_state: bool) -> Result<Observation, StateError> {
        self.with_port(mac, port, |state| {
            if !state.initialized {
                state.observed = output_state;
                state.initialized = true;
                return Observation::First;
            }

            let result = if state.observed == output_state {
                if state.desired != output_state {
                    Observation::DisagreesControllerWants(state.desired)
                } else {
                    Observation::Agrees
                }
            } else {
                state.desired = output_state;
                Observation::DisagreesSensorChanged
            };

            state.observed = output_state;
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        let state = tree.get("aa:bb:cc:dd:ee:ff", 1).unwrap();
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn set_desired_on_unknown_port_errors() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        match tree.set_desired("aa:bb:cc:dd:ee:ff", 2, true) {
            Err(StateError::UnknownPort(_, 2)) => {}
            other => panic!("expected UnknownPort, got {other:?}"),
        }
        match tree.set_desired("11:22:33:44:55:66", 1, true) {
            Err(StateError::UnknownDevice(_)) => {}
            other => panic!("expected UnknownDevice, got {other:?}"),
        }
    }

    #[test]
    fn first_observation_initializes_without_command() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        let result = tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        assert_eq!(result, Observation::First);
        let state = tree.get("aa:bb:cc:dd:ee:ff", 1).unwrap();
        assert!(state.initialized);
        assert!(!state.observed);
    }

    #[test]
    fn steady_state_agreement_emits_nothing() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        tree.set_desired("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        let result = tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        assert_eq!(result, Observation::Agrees);
    }

    #[test]
    fn disagreement_without_sensor_change_wants_toggle() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        tree.set_desired("aa:bb:cc:dd:ee:ff", 1, true).unwrap();
        let result = tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        assert_eq!(result, Observation::DisagreesControllerWants(true));
    }

    #[test]
    fn sensor_change_updates_desired_and_wins() {
        let tree = StateTree::new();
        tree.register("aa:bb:cc:dd:ee:ff", 1);
        tree.observe("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        tree.set_desired("aa:bb:cc:dd:ee:ff", 1, false).unwrap();
        let result = tree.observe("aa:bb:cc:dd:ee:ff", 1, true).unwrap();
        assert_eq!(result, Observation::DisagreesSensorChanged);
        let state = tree.get("aa:bb:cc:dd:ee:ff", 1).unwrap();
        assert!(state.desired);
        assert!(state.observed);
    }
}
