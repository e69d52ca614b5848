//! The reconciler: the single entry point per inform. Consults the
//! per-device queue first; if empty, diffs observed vs. desired for each
//! reported port and enqueues at most one toggle per disagreement, then
//! drains the queue (or replies with a no-op) before encoding the reply.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use crate::codec::{self, CodecError, Frame};
use crate::control::ControlSurface;
use crate::keybag::KeyBag;
use crate::message::{self, CommandMessage, MessageError, NoopMessage};
use crate::queue::{CommandQueue, QueueError};
use crate::state::{Observation, StateError, StateTree};

/// Distinguishes the decode-time rejections the HTTP adapter reports as
/// 400 from the reply-building failures it reports as 500. Both wrap the
/// same underlying error kinds; what differs is which side of the
/// request/response boundary they occurred on.
#[derive(Debug)]
pub enum ReconcileError {
    /// Frame decode or status-JSON parse failed — the request itself is
    /// bad.
    Request(RequestError),
    /// Reply construction failed after the request was accepted — an
    /// internal error, never the device's fault.
    Internal(InternalError),
}

#[derive(Debug)]
pub enum RequestError {
    Codec(CodecError),
    Message(MessageError),
}

#[derive(Debug)]
pub enum InternalError {
    Codec(CodecError),
    Queue(QueueError),
    Json(String),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Request(e) => write!(f, "{e}"),
            ReconcileError::Internal(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Codec(e) => write!(f, "{e}"),
            RequestError::Message(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalError::Codec(e) => write!(f, "{e}"),
            InternalError::Queue(e) => write!(f, "{e}"),
            InternalError::Json(msg) => write!(f, "Failed to serialize reply: {msg}"),
        }
    }
}

impl std::error::Error for ReconcileError {}
impl std::error::Error for RequestError {}
impl std::error::Error for InternalError {}

impl ReconcileError {
    /// True for a decode/parse failure on the incoming request (→ HTTP
    /// 400); false for a failure building or encoding the reply (→ HTTP
    /// 500).
    pub fn is_request_error(&self) -> bool {
        matches!(self, ReconcileError::Request(_))
    }
}

impl From<RequestError> for ReconcileError {
    fn from(e: RequestError) -> Self {
        ReconcileError::Request(e)
    }
}

impl From<InternalError> for ReconcileError {
    fn from(e: InternalError) -> Self {
        ReconcileError::Internal(e)
    }
}

pub struct Reconciler {
    state: Arc<StateTree>,
    queue: Arc<CommandQueue>,
    keys: Arc<dyn KeyBag>,
    noop_interval: i64,
}

impl Reconciler {
    pub fn new(keys: Arc<dyn KeyBag>, noop_interval: i64) -> Self {
        Reconciler {
            state: Arc::new(StateTree::new()),
            queue: Arc::new(CommandQueue::new()),
            keys,
            noop_interval,
        }
    }

    /// A cheap-to-clone handle bridges/UIs use to register ports and set
    /// desired state, independent of inform handling.
    pub fn control_surface(&self) -> ControlSurface {
        ControlSurface::new(self.state.clone(), self.queue.clone())
    }

    /// Decode one inform request, reconcile, and encode the reply. This is
    /// the only entry point the HTTP adapter (C8) calls.
    pub fn handle(&self, request: &[u8]) -> Result<Vec<u8>, ReconcileError> {
        let mut cursor = Cursor::new(request);
        let frame = codec::decode(&mut cursor, self.keys.as_ref()).map_err(RequestError::Codec)?;
        let status = message::parse_incoming(&frame.payload).map_err(RequestError::Message)?;
        let mac = frame.formatted_mac();

        let mut reply = Frame::new(frame.mac);
        reply.set_encrypted(true);

        if let Some(cmd) = self.pop_front(&mac)? {
            reply.payload = encode_command(&cmd)?;
            return Ok(self.encode_reply(&reply)?);
        }

        for output in &status.outputs {
            self.reconcile_port(&mac, output.port, output.output_state);
        }

        reply.payload = match self.pop_front(&mac)? {
            Some(cmd) => encode_command(&cmd)?,
            None => serde_json::to_vec(&NoopMessage::new(self.noop_interval))
                .map_err(|e| InternalError::Json(e.to_string()))?,
        };

        Ok(self.encode_reply(&reply)?)
    }

    fn pop_front(&self, mac: &str) -> Result<Option<CommandMessage>, InternalError> {
        self.queue.pop_front(mac).map_err(InternalError::Queue)
    }

    fn encode_reply(&self, reply: &Frame) -> Result<Vec<u8>, InternalError> {
        codec::encode(reply, self.keys.as_ref()).map_err(InternalError::Codec)
    }

    fn reconcile_port(&self, mac: &str, port: usize, output_state: bool) {
        match self.state.observe(mac, port, output_state) {
            Ok(Observation::DisagreesControllerWants(desired)) => {
                let cmd = CommandMessage::new_output_command(port, desired as i64, 0);
                self.queue.push_front(mac, cmd);
            }
            Ok(Observation::First | Observation::Agrees | Observation::DisagreesSensorChanged) => {}
            Err(StateError::UnknownDevice(_)) | Err(StateError::UnknownPort(_, _)) => {
                tracing::warn!(mac, port, "inform reported an unregistered port; skipping");
            }
        }
    }
}

fn encode_command(cmd: &CommandMessage) -> Result<Vec<u8>, InternalError> {
    serde_json::to_vec(cmd).map_err(|e| InternalError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Frame as WireFrame, FLAG_ENCRYPTED};
    use crate::keybag::MapKeyBag;
    use crate::message::DeviceMessage;

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    const MAC_STR: &str = "aa:bb:cc:dd:ee:ff";
    const HEX_KEY: &str = "00112233445566778899aabbccddeeff";

    fn keybag() -> Arc<dyn KeyBag> {
        let mut bag = MapKeyBag::new();
        bag.insert(MAC_STR, HEX_KEY);
        Arc::new(bag)
    }

    fn status_frame(output_state: bool) -> Vec<u8> {
        let payload = serde_json::json!({
            "mac": MAC_STR,
            "model": "mFi-mPort",
            "alarm": [{"sId": "s1", "entries": [{"tag": "output", "val": if output_state {1} else {0}}]}]
        });
        let mut frame = WireFrame::new(MAC);
        frame.flags = FLAG_ENCRYPTED;
        frame.payload = serde_json::to_vec(&payload).unwrap();
        codec::encode(&frame, &*keybag()).unwrap()
    }

    fn decode_reply(bytes: &[u8]) -> WireFrame {
        let mut cursor = Cursor::new(bytes);
        codec::decode(&mut cursor, &*keybag()).unwrap()
    }

    #[test]
    fn initial_observation_is_noop_and_initializes() {
        let recon = Reconciler::new(keybag(), 10);
        let surface = recon.control_surface();
        surface.register(MAC_STR, 1);
        surface.set_desired(MAC_STR, 1, true).unwrap();

        let reply = recon.handle(&status_frame(false)).unwrap();
        let frame = decode_reply(&reply);
        let value: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(value["_type"], "noop");

        let state = recon.state.get(MAC_STR, 1).unwrap();
        assert!(state.initialized);
        assert!(!state.observed);
        assert!(state.desired);
    }

    #[test]
    fn second_round_emits_toggle_command() {
        let recon = Reconciler::new(keybag(), 10);
        let surface = recon.control_surface();
        surface.register(MAC_STR, 1);
        surface.set_desired(MAC_STR, 1, true).unwrap();

        recon.handle(&status_frame(false)).unwrap(); // First
        let reply = recon.handle(&status_frame(false)).unwrap(); // DisagreesControllerWants

        let frame = decode_reply(&reply);
        let cmd: CommandMessage = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(cmd.cmd, "mfi-output");
        assert_eq!(cmd.port, 1);
        assert_eq!(cmd.val, 1);
    }

    #[test]
    fn sensor_wins_after_device_flips_on() {
        let recon = Reconciler::new(keybag(), 10);
        let surface = recon.control_surface();
        surface.register(MAC_STR, 1);
        surface.set_desired(MAC_STR, 1, true).unwrap();

        recon.handle(&status_frame(false)).unwrap();
        recon.handle(&status_frame(false)).unwrap();
        let reply = recon.handle(&status_frame(true)).unwrap();

        let frame = decode_reply(&reply);
        let value: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(value["_type"], "noop");

        let state = recon.state.get(MAC_STR, 1).unwrap();
        assert!(state.desired);
        assert!(state.observed);
    }

    fn two_port_status_frame() -> Vec<u8> {
        let payload = serde_json::json!({
            "mac": MAC_STR,
            "model": "mFi-mPort",
            "alarm": [
                {"sId": "s1", "entries": [{"tag": "output", "val": 0}]},
                {"sId": "s2", "entries": [{"tag": "output", "val": 1}]}
            ]
        });
        let mut frame = WireFrame::new(MAC);
        frame.flags = FLAG_ENCRYPTED;
        frame.payload = serde_json::to_vec(&payload).unwrap();
        codec::encode(&frame, &*keybag()).unwrap()
    }

    #[test]
    fn unregistered_port_is_skipped_not_fatal() {
        let recon = Reconciler::new(keybag(), 10);
        let surface = recon.control_surface();
        surface.register(MAC_STR, 1); // port 2 deliberately left unregistered

        let reply = recon.handle(&two_port_status_frame());
        assert!(reply.is_ok(), "an unregistered port must not fail the whole request");

        let state = recon.state.get(MAC_STR, 1).unwrap();
        assert!(state.initialized);
        assert!(recon.state.get(MAC_STR, 2).is_err(), "port 2 was never registered");
    }

    #[test]
    fn handle_on_entirely_unregistered_device_errors() {
        let recon = Reconciler::new(keybag(), 10);
        let reply = recon.handle(&status_frame(false));
        assert!(reply.is_err(), "queue is unavailable for a device never registered");
    }

    #[test]
    fn parses_device_message_alias() {
        let json = br#"{"mac": "aa:bb:cc:dd:ee:ff", "alarm": []}"#;
        let msg: DeviceMessage = message::parse_incoming(json).unwrap();
        assert_eq!(msg.mac_addr, MAC_STR);
    }
}
