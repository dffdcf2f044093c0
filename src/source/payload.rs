//! Wire types for the push channel and the HTTP API.
//!
//! These match the JSON emitted by the telemetry backend. Every push message
//! is an envelope `{"event": "<name>", "data": {...}}`; the poll endpoint
//! returns a bare [`ReadingPayload`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::Status;
use crate::error::DecodeError;

/// Device identifier as sent by the backend: numeric database ids and
/// string ids both occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Number(i64),
    Text(String),
}

impl DeviceId {
    /// Canonical string form, or `None` for a blank text id.
    pub fn normalized(&self) -> Option<String> {
        match self {
            DeviceId::Number(n) => Some(n.to_string()),
            DeviceId::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Number(n) => write!(f, "{}", n),
            DeviceId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::Text(s.to_string())
    }
}

impl From<i64> for DeviceId {
    fn from(n: i64) -> Self {
        DeviceId::Number(n)
    }
}

/// Source timestamp: ISO 8601 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Millis(ms) => write!(f, "{}", ms),
            RawTimestamp::Text(s) => f.write_str(s),
        }
    }
}

/// A unified sensor reading, shared by the push topics and `/api/data/latest`.
///
/// Every field is optional on the wire; an absent reading means "not
/// reported this tick", never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<RawTimestamp>,
    /// Dashboard counter of devices currently reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices_online: Option<u32>,
    /// Explicit connectivity flag (`deviceConnected` / `isConnected` in
    /// older payloads).
    #[serde(
        default,
        alias = "deviceConnected",
        alias = "isConnected",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_connected: Option<bool>,
}

/// Per-device status change, without readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusPayload {
    pub device_id: DeviceId,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<RawTimestamp>,
}

/// Broker connection state reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connected,
    Disconnected,
}

/// Payload of the `mqtt_status` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatusPayload {
    pub status: TransportStatus,
}

/// A device record from `GET /api/devices`, used to seed the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Stored status text; not every backend value maps onto [`Status`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, alias = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<RawTimestamp>,
}

/// Push topics that carry a [`ReadingPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingTopic {
    SensorData,
    DeviceDataUpdate,
    DashboardUpdate,
}

impl ReadingTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingTopic::SensorData => "sensor_data",
            ReadingTopic::DeviceDataUpdate => "device_data_update",
            ReadingTopic::DashboardUpdate => "dashboard_update",
        }
    }

    fn from_event(name: &str) -> Option<Self> {
        match name {
            "sensor_data" => Some(ReadingTopic::SensorData),
            "device_data_update" => Some(ReadingTopic::DeviceDataUpdate),
            "dashboard_update" => Some(ReadingTopic::DashboardUpdate),
            _ => None,
        }
    }
}

/// A decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Reading {
        topic: ReadingTopic,
        payload: ReadingPayload,
    },
    DeviceStatus(DeviceStatusPayload),
    TransportStatus(TransportStatusPayload),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushEvent {
    /// Decode one envelope from raw JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Self::from_parts(&envelope.event, envelope.data)
    }

    /// Build an event from its name and JSON payload.
    ///
    /// Unknown names and payloads that do not fit the event's schema are
    /// rejected here so nothing ambiguous reaches the engine.
    pub fn from_parts(event: &str, data: serde_json::Value) -> Result<Self, DecodeError> {
        if data.is_null() {
            return Err(DecodeError::EmptyPayload(event.to_string()));
        }

        let invalid = |source| DecodeError::InvalidPayload {
            event: event.to_string(),
            source,
        };

        if let Some(topic) = ReadingTopic::from_event(event) {
            let payload = serde_json::from_value(data).map_err(invalid)?;
            return Ok(PushEvent::Reading { topic, payload });
        }

        match event {
            "device_status" => Ok(PushEvent::DeviceStatus(
                serde_json::from_value(data).map_err(invalid)?,
            )),
            "mqtt_status" => Ok(PushEvent::TransportStatus(
                serde_json::from_value(data).map_err(invalid)?,
            )),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::Reading { topic, .. } => topic.as_str(),
            PushEvent::DeviceStatus(_) => "device_status",
            PushEvent::TransportStatus(_) => "mqtt_status",
        }
    }
}
