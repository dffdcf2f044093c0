//! Canonical telemetry samples and the normalizer that produces them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roster::DeviceEntity;
use super::timestamp::parse_timestamp;
use crate::error::Rejection;
use crate::source::ReadingPayload;

/// Self-reported device status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    #[default]
    Offline,
    Warning,
}

impl Status {
    /// Whether this status counts as a sign of life for the watchdog.
    ///
    /// A device in warning is still reporting, so it qualifies.
    pub fn is_live(&self) -> bool {
        matches!(self, Status::Online | Status::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
            Status::Warning => "warning",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Status::Online),
            "offline" => Ok(Status::Offline),
            "warning" => Ok(Status::Warning),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// The three numeric channels a device reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Readings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

impl Readings {
    /// True if no channel has a value.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.pressure.is_none()
    }

    /// Field-by-field fallback: keep our value, else take `fallback`'s.
    pub fn or(self, fallback: &Readings) -> Readings {
        Readings {
            temperature: self.temperature.or(fallback.temperature),
            humidity: self.humidity.or(fallback.humidity),
            pressure: self.pressure.or(fallback.pressure),
        }
    }

    /// Sticky merge: present incoming values overwrite, absent ones don't.
    pub fn merge_from(&mut self, incoming: &Readings) {
        *self = incoming.or(self);
    }
}

/// A single normalized observation.
///
/// Immutable once built; only [`normalize`] constructs one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    device_id: Option<String>,
    device_name: Option<String>,
    readings: Readings,
    status: Status,
    observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    devices_online: Option<u32>,
}

impl Sample {
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Source time of the observation (arrival time if the source sent none).
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn devices_online(&self) -> Option<u32> {
        self.devices_online
    }

    /// Same source timestamp.
    ///
    /// Used to recognise a polled reading that was already seen via push.
    /// Identity fields are not compared: the poll endpoint may report a
    /// device by name only while the push feed carries its id.
    pub fn same_observation(&self, other: &Sample) -> bool {
        self.observed_at == other.observed_at
    }
}

/// Convert a raw reading into a [`Sample`].
///
/// Pure: the payload is only borrowed and `previous` (the roster entry the
/// payload resolves to, if any) only supplies fallback readings. Each
/// reading falls back from the incoming value to the previous known value
/// to unknown.
pub fn normalize(
    raw: &ReadingPayload,
    previous: Option<&DeviceEntity>,
    received_at: DateTime<Utc>,
) -> Result<Sample, Rejection> {
    let device_id = raw.device_id.as_ref().and_then(|id| id.normalized());
    let device_name = raw
        .device_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    if device_id.is_none() && device_name.is_none() {
        return Err(Rejection::MissingIdentity);
    }

    let incoming = Readings {
        temperature: raw.temperature.filter(|v| v.is_finite()),
        humidity: raw.humidity.filter(|v| v.is_finite()),
        pressure: raw.pressure.filter(|v| v.is_finite()),
    };

    if incoming.is_empty()
        && raw.status.is_none()
        && raw.is_connected.is_none()
        && raw.devices_online.is_none()
    {
        let label = device_id.clone().or(device_name.clone()).unwrap_or_default();
        return Err(Rejection::NoUsableField(label));
    }

    let observed_at = match &raw.timestamp {
        Some(ts) => {
            parse_timestamp(ts).ok_or_else(|| Rejection::InvalidTimestamp(ts.to_string()))?
        }
        None => received_at,
    };

    let readings = match previous {
        Some(entity) => incoming.or(&entity.last_known),
        None => incoming,
    };

    Ok(Sample {
        device_id,
        device_name,
        readings,
        status: raw.status.unwrap_or_else(|| derive_status(raw)),
        observed_at,
        devices_online: raw.devices_online,
    })
}

fn derive_status(raw: &ReadingPayload) -> Status {
    let flagged = raw.is_connected == Some(true);
    let counted = raw.devices_online.is_some_and(|n| n > 0);
    if flagged || counted {
        Status::Online
    } else {
        Status::Offline
    }
}
