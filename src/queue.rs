//! Per-device FIFO of pending outbound commands, drained one command per
//! inform round. Insertion is at the front (the reconciler's "latest wish
//! supersedes older ones" policy); the queue is effectively a stack of
//! recent intents bounded by the device's port count.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use crate::message::CommandMessage;

#[derive(Debug)]
pub enum QueueError {
    /// A device MAC has no queue — should be impossible once a device has
    /// been registered, since registration lazily creates one.
    QueueUnavailable(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::QueueUnavailable(mac) => write!(f, "No command queue for device {mac}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Per-device command FIFOs, one `Mutex<VecDeque<_>>` per device so that
/// draining one device's queue never contends with another's.
#[derive(Default)]
pub struct CommandQueue {
    queues: Mutex<HashMap<String, Mutex<VecDeque<CommandMessage>>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Lazily create the device's queue if it doesn't exist yet. Called by
    /// the control surface's `register` and safe to call redundantly.
    pub fn ensure_device(&self, mac: &str) {
        let mut queues = self.queues.lock().expect("queue map lock poisoned");
        queues
            .entry(mac.to_owned())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
    }

    /// Push `cmd` to the front of the device's queue, superseding any
    /// older pending wish for the same port on the next drain.
    pub fn push_front(&self, mac: &str, cmd: CommandMessage) {
        self.ensure_device(mac);
        let queues = self.queues.lock().expect("queue map lock poisoned");
        let queue = queues.get(mac).expect("ensure_device just inserted it");
        queue.lock().expect("device queue lock poisoned").push_front(cmd);
    }

    /// Pop the front command for `mac`, if any, refreshing its timestamps
    /// before returning — a command may have sat in the queue for several
    /// poll cycles and devices validate freshness.
    pub fn pop_front(&self, mac: &str) -> Result<Option<CommandMessage>, QueueError> {
        let queues = self.queues.lock().expect("queue map lock poisoned");
        let queue = queues
            .get(mac)
            .ok_or_else(|| QueueError::QueueUnavailable(mac.to_owned()))?;
        let mut queue = queue.lock().expect("device queue lock poisoned");
        Ok(queue.pop_front().map(|mut cmd| {
            cmd.freshen();
            cmd
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_unregistered_device_errors() {
        let q = CommandQueue::new();
        match q.pop_front("aa:bb:cc:dd:ee:ff") {
            Err(QueueError::QueueUnavailable(_)) => {}
            other => panic!("expected QueueUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn pop_on_empty_registered_queue_is_none() {
        let q = CommandQueue::new();
        q.ensure_device("aa:bb:cc:dd:ee:ff");
        assert!(q.pop_front("aa:bb:cc:dd:ee:ff").unwrap().is_none());
    }

    #[test]
    fn push_front_supersedes_in_lifo_order() {
        let q = CommandQueue::new();
        q.ensure_device("aa:bb:cc:dd:ee:ff");
        q.push_front("aa:bb:cc:dd:ee:ff", CommandMessage::new_output_command(1, 0, 0));
        q.push_front("aa:bb:cc:dd:ee:ff", CommandMessage::new_output_command(1, 1, 0));

        let first = q.pop_front("aa:bb:cc:dd:ee:ff").unwrap().unwrap();
        assert_eq!(first.val, 1, "most recently pushed command drains first");
        let second = q.pop_front("aa:bb:cc:dd:ee:ff").unwrap().unwrap();
        assert_eq!(second.val, 0);
        assert!(q.pop_front("aa:bb:cc:dd:ee:ff").unwrap().is_none());
    }

    #[test]
    fn pop_refreshes_timestamps() {
        let q = CommandQueue::new();
        q.ensure_device("aa:bb:cc:dd:ee:ff");
        let mut cmd = CommandMessage::new_output_command(1, 1, 0);
        cmd.datetime = "stale".to_owned();
        q.push_front("aa:bb:cc:dd:ee:ff", cmd);

        let fresh = q.pop_front("aa:bb:cc:dd:ee:ff").unwrap().unwrap();
        assert_ne!(fresh.datetime, "stale");
    }
}
