//! JSON-file-backed key bag loader, shaped like the reference controller's
//! `device_keys.json`: a map keyed by the device's lowercase colon-separated
//! MAC address, each value carrying the hex AES key plus enough device
//! metadata to bulk-register its ports at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::keybag::{KeyBagError, MapKeyBag};

#[derive(Debug, Deserialize)]
pub struct PortDescriptor {
    pub label: String,
    pub port: usize,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRecord {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub ports: Vec<PortDescriptor>,
}

pub type DeviceMap = HashMap<String, DeviceRecord>;

/// Load a `device_keys.json`-shaped file into its raw `DeviceMap` form.
pub fn load_device_map(path: &Path) -> Result<DeviceMap, KeyBagError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| KeyBagError::FileNotFound(path.display().to_string()))?;
    serde_json::from_str(&contents).map_err(|e| KeyBagError::ParseError(e.to_string()))
}

/// Reduce a `DeviceMap` to the `mac -> hex_key` mapping the `KeyBag`
/// interface needs.
pub fn key_bag_from_device_map(devices: &DeviceMap) -> MapKeyBag {
    let mut bag = MapKeyBag::new();
    for (mac, record) in devices {
        bag.insert(mac.clone(), record.key.clone());
    }
    bag
}
