//! Typed JSON shapes carried inside a decoded [`crate::codec::Frame`]
//! payload, plus the timestamp helpers outbound messages need.
//!
//! Two families exist: device→controller status (`DeviceMessage`, aliased
//! as `IncomingMessage`) and controller→device (`CommandMessage`,
//! `NoopMessage`). `DeviceMessage` needs a custom two-stage parse because
//! the wire schema nests port telemetry under `alarm[].entries[]` as
//! `(tag, val)` pairs that must be demultiplexed into named fields.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug)]
pub enum MessageError {
    MalformedJSON(String),
    MissingType,
    UnsupportedType(String),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::MalformedJSON(msg) => write!(f, "Malformed JSON: {msg}"),
            MessageError::MissingType => write!(f, "Message is missing a \"_type\" field"),
            MessageError::UnsupportedType(t) => write!(f, "Unsupported message type: {t}"),
        }
    }
}

impl std::error::Error for MessageError {}

/// Read the `_type` discriminant out of a JSON value, for messages that are
/// expected to carry one (`CommandMessage`, `NoopMessage`).
pub fn message_type(value: &serde_json::Value) -> Result<&str, MessageError> {
    value
        .get("_type")
        .and_then(|v| v.as_str())
        .ok_or(MessageError::MissingType)
}

// -- Device → controller status --

/// Per-port telemetry, demultiplexed from one `alarm[]` entry's
/// `entries[].{tag,val}` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub id: String,
    /// 1-based, equal to the alarm entry's 1-based index.
    pub port: usize,
    pub output_state: bool,
    pub energy_sum: f64,
    pub voltage_rms: f64,
    pub power_factor: f64,
    pub current_rms: f64,
    pub watts: f64,
    pub this_month: f64,
    pub last_month: f64,
    pub dimmer: bool,
    pub dimmer_level: i64,
    pub dimmer_lock_setting: i64,
}

/// Device status report. Aliased as `IncomingMessage` — the wire protocol
/// has one inbound shape and the original reference's two names for it
/// (`IncomingMessage` in one revision, `DeviceMessage` in another) describe
/// the same message.
#[derive(Debug, Clone, Default)]
pub struct DeviceMessage {
    pub is_default: bool,
    pub ip: String,
    pub mac_addr: String,
    pub model_number: String,
    pub model_name: String,
    pub serial: String,
    pub firmware_version: String,
    pub hostname: String,
    pub uptime: i64,
    pub time: i64,
    pub cfgversion: String,
    pub outputs: Vec<OutputInfo>,
}

pub type IncomingMessage = DeviceMessage;

#[derive(serde::Deserialize)]
struct RawAlarmEntry {
    tag: String,
    val: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct RawAlarm {
    #[serde(default)]
    entries: Vec<RawAlarmEntry>,
    #[serde(rename = "sId", default)]
    sensor_id: String,
}

#[derive(serde::Deserialize)]
struct RawDeviceMessage {
    #[serde(default)]
    default: bool,
    #[serde(default)]
    ip: String,
    #[serde(rename = "mac", default)]
    mac_addr: String,
    #[serde(rename = "model", default)]
    model_number: String,
    #[serde(rename = "model_display", default)]
    model_name: String,
    #[serde(default)]
    serial: String,
    #[serde(rename = "version", default)]
    firmware_version: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    uptime: i64,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    cfgversion: String,
    #[serde(default)]
    alarm: Vec<RawAlarm>,
}

impl<'de> Deserialize<'de> for DeviceMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawDeviceMessage::deserialize(deserializer)?;
        let dimmer = raw.model_number == "IWD1U";

        let outputs = raw
            .alarm
            .into_iter()
            .enumerate()
            .map(|(i, alarm)| {
                let mut output = OutputInfo {
                    id: alarm.sensor_id,
                    port: i + 1,
                    output_state: false,
                    energy_sum: 0.0,
                    voltage_rms: 0.0,
                    power_factor: 0.0,
                    current_rms: 0.0,
                    watts: 0.0,
                    this_month: 0.0,
                    last_month: 0.0,
                    dimmer,
                    dimmer_level: 0,
                    dimmer_lock_setting: 0,
                };

                for entry in alarm.entries {
                    let v = entry.val.as_f64().unwrap_or(0.0);
                    match entry.tag.as_str() {
                        "output" => output.output_state = v == 1.0,
                        "pf" => output.power_factor = v,
                        "energy_sum" => output.energy_sum = v,
                        "v_rms" => output.voltage_rms = v,
                        "i_rms" => output.current_rms = v,
                        "active_pwr" => output.watts = v,
                        "thismonth" => output.this_month = v,
                        "lastmonth" => output.last_month = v,
                        "dimmer_level" => output.dimmer_level = v as i64,
                        "dimmer_lock_setting" => output.dimmer_lock_setting = v as i64,
                        _ => {}
                    }
                }

                output
            })
            .collect();

        Ok(DeviceMessage {
            is_default: raw.default,
            ip: raw.ip,
            mac_addr: raw.mac_addr,
            model_number: raw.model_number,
            model_name: raw.model_name,
            serial: raw.serial,
            firmware_version: raw.firmware_version,
            hostname: raw.hostname,
            uptime: raw.uptime,
            time: raw.time,
            cfgversion: raw.cfgversion,
            outputs,
        })
    }
}

/// Parse a decoded frame payload as a device status report. Rejects a
/// payload carrying an explicit `_type` tag (that would be a misdirected
/// controller→device message, not a status report).
pub fn parse_incoming(bytes: &[u8]) -> Result<DeviceMessage, MessageError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| MessageError::MalformedJSON(e.to_string()))?;

    if let Some(t) = value.get("_type").and_then(|v| v.as_str()) {
        return Err(MessageError::UnsupportedType(t.to_owned()));
    }

    serde_json::from_value(value).map_err(|e| MessageError::MalformedJSON(e.to_string()))
}

// -- Controller → device --

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminMetadata {
    #[serde(rename = "_id")]
    pub id: String,
    pub lang: String,
    pub name: String,
    pub x_password: String,
}

/// A queued outbound command. `mfi-output` toggles a port; `_admin` is
/// modeled but never populated by this core (no admin-push feature is in
/// scope) so an externally-built admin command still round-trips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    #[serde(rename = "_admin", skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<AdminMetadata>,
    #[serde(rename = "_id", skip_serializing_if = "String::is_empty", default)]
    pub id: String,
    #[serde(rename = "_type")]
    pub message_type: String,
    pub cmd: String,
    pub datetime: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub device_id: String,
    #[serde(rename = "mac", skip_serializing_if = "String::is_empty", default)]
    pub mac_address: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub model: String,
    #[serde(rename = "off_volt", skip_serializing_if = "Option::is_none", default)]
    pub off_voltage: Option<i64>,
    pub port: usize,
    #[serde(rename = "sId", skip_serializing_if = "String::is_empty", default)]
    pub sensor_id: String,
    pub server_time_in_utc: String,
    pub time: i64,
    pub timer: i64,
    pub val: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub volt: Option<i64>,
}

impl CommandMessage {
    /// Build a fresh `mfi-output` command for `port`, carrying `val`
    /// (0 or 1) and the given `timer` (seconds, 0 = no timer).
    pub fn new_output_command(port: usize, val: i64, timer: i64) -> Self {
        let mut cmd = CommandMessage {
            metadata: None,
            id: String::new(),
            message_type: "cmd".to_owned(),
            cmd: "mfi-output".to_owned(),
            datetime: String::new(),
            device_id: String::new(),
            mac_address: String::new(),
            model: String::new(),
            off_voltage: None,
            port,
            sensor_id: String::new(),
            server_time_in_utc: String::new(),
            time: 0,
            timer,
            val,
            volt: None,
        };
        cmd.freshen();
        cmd
    }

    /// Rewrite timestamps on a queued command so a reply delayed by several
    /// poll cycles still looks recent to the device.
    pub fn freshen(&mut self) {
        self.datetime = rfc3339_local_now();
        self.server_time_in_utc = ms_since_epoch_utc_string();
        self.time = ms_since_epoch_pst();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoopMessage {
    #[serde(rename = "_type")]
    pub message_type: String,
    pub interval: i64,
    pub server_time_in_utc: String,
}

impl NoopMessage {
    pub fn new(interval: i64) -> Self {
        NoopMessage {
            message_type: "noop".to_owned(),
            interval,
            server_time_in_utc: ms_since_epoch_utc_string(),
        }
    }
}

// -- Timestamp helpers --
//
// `ms_since_epoch_pst` reproduces a historical quirk of the protocol's
// reference controller: devices expect a "PST" millisecond counter even
// though `chrono_tz::America::Los_Angeles` is actually US Pacific local
// time (PST or PDT depending on the date). Unlike the Go reference, the
// timezone here is resolved at compile time via `chrono-tz`'s static
// database, so there is no runtime lookup that can silently fall back to
// UTC — a bad date can't happen, only a call site bug could misuse it.

pub fn ms_since_epoch_pst() -> i64 {
    let now_utc = chrono::Utc::now();
    let pst = now_utc.with_timezone(&chrono_tz::America::Los_Angeles);
    pst.timestamp_millis()
}

pub fn ms_since_epoch_pst_string() -> String {
    ms_since_epoch_pst().to_string()
}

pub fn ms_since_epoch_utc_string() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// RFC 3339 timestamp in the host's local time, for `CommandMessage.datetime`.
pub fn rfc3339_local_now() -> String {
    chrono::Local::now().to_rfc3339()
}
