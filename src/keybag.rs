use std::collections::HashMap;
use std::fmt;

/// Read-only MAC-address → AES key lookup consulted by the codec on every
/// encrypt/decrypt. The origin of the mapping (JSON file, secret manager,
/// in-memory map) is irrelevant to the core; callers inject an implementation.
pub trait KeyBag: Send + Sync {
    /// Look up the hex-encoded AES key for a device, keyed by its
    /// lowercase colon-separated MAC address (e.g. `"aa:bb:cc:dd:ee:ff"`).
    fn key_for(&self, mac: &str) -> Option<&str>;
}

/// An in-memory `KeyBag` backed by a plain map, suitable for tests and for
/// the JSON-file-backed loader in `devicekeys.rs`.
#[derive(Debug, Default, Clone)]
pub struct MapKeyBag {
    keys: HashMap<String, String>,
}

impl MapKeyBag {
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    pub fn insert(&mut self, mac: impl Into<String>, hex_key: impl Into<String>) {
        self.keys.insert(mac.into(), hex_key.into());
    }

    pub fn from_map(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }
}

impl KeyBag for MapKeyBag {
    fn key_for(&self, mac: &str) -> Option<&str> {
        self.keys.get(mac).map(String::as_str)
    }
}

/// Format a raw 6-byte MAC address as lowercase colon-separated hex, the
/// canonical KeyBag lookup key.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[derive(Debug)]
pub enum KeyBagError {
    FileNotFound(String),
    ParseError(String),
}

impl fmt::Display for KeyBagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyBagError::FileNotFound(path) => write!(f, "Key bag file not found: {path}"),
            KeyBagError::ParseError(msg) => write!(f, "Failed to parse key bag: {msg}"),
        }
    }
}

impl std::error::Error for KeyBagError {}
