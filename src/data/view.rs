//! Published snapshots.
//!
//! A [`ViewModel`] is built from engine state after every change and handed
//! to subscribers by value. Readings of stale streams are masked here, so
//! the engine can keep the last known values without leaking them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::roster::DeviceEntity;
use super::sample::{Readings, Sample, Status};
use super::watchdog::Connectivity;
use crate::engine::Mode;

/// Diagnostic counters.
///
/// Not part of the device, history or connectivity state: a rejected or
/// coalesced input bumps a counter here but publishes no snapshot, so the
/// new value only shows up alongside the next real change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Readings that made it into the roster.
    pub accepted: u64,
    /// Readings refused by the normalizer.
    pub rejected: u64,
    /// Polled readings dropped as duplicates of the newest table row.
    pub coalesced: u64,
    /// Status events for devices not in the roster.
    pub ignored_status: u64,
}

/// One roster entry as shown to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub status: Option<Status>,
    pub connectivity: Connectivity,
    /// Masked to all-`None` while the device is stale.
    pub readings: Readings,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<&DeviceEntity> for DeviceView {
    fn from(entity: &DeviceEntity) -> Self {
        let readings = if entity.connectivity.is_live() {
            entity.last_known
        } else {
            Readings::default()
        };
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            host: entity.host.clone(),
            status: entity.status,
            connectivity: entity.connectivity,
            readings,
            last_seen_at: entity.last_seen_at,
        }
    }
}

/// The most recent accepted reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentReading {
    pub device_id: String,
    pub device_name: String,
    pub readings: Readings,
    pub status: Status,
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices_online: Option<u32>,
}

impl CurrentReading {
    /// Build from a sample and the entity it merged into.
    pub fn new(sample: &Sample, entity: &DeviceEntity) -> Self {
        Self {
            device_id: entity.id.clone(),
            device_name: entity.name.clone(),
            readings: *sample.readings(),
            status: sample.status(),
            observed_at: Some(sample.observed_at()),
            devices_online: sample.devices_online(),
        }
    }

    /// Drop numbers and time, keep identity, show offline.
    pub fn mark_stale(&mut self) {
        self.readings = Readings::default();
        self.observed_at = None;
        self.status = Status::Offline;
    }
}

/// Immutable snapshot of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewModel {
    pub revision: u64,
    pub mode: Mode,
    /// Transport status as last reported.
    pub connected: bool,
    /// Connection-level watchdog verdict.
    pub connectivity: Connectivity,
    pub current: Option<CurrentReading>,
    pub devices: Vec<DeviceView>,
    /// Oldest first.
    pub chart: Vec<Sample>,
    /// Newest first.
    pub table: Vec<Sample>,
    /// Diagnostics, see [`EngineStats`].
    pub stats: EngineStats,
}

impl ViewModel {
    pub fn device(&self, id: &str) -> Option<&DeviceView> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn live_devices(&self) -> usize {
        self.devices.iter().filter(|d| d.connectivity.is_live()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(connectivity: Connectivity) -> DeviceEntity {
        let mut entity = DeviceEntity::new("1", "boiler");
        entity.last_known = Readings {
            temperature: Some(21.5),
            humidity: Some(40.0),
            pressure: None,
        };
        entity.connectivity = connectivity;
        entity
    }

    #[test]
    fn test_live_device_shows_readings() {
        let view = DeviceView::from(&entity(Connectivity::Live));
        assert_eq!(view.readings.temperature, Some(21.5));
    }

    #[test]
    fn test_stale_device_masks_readings_keeps_identity() {
        let view = DeviceView::from(&entity(Connectivity::Stale));
        assert!(view.readings.is_empty());
        assert_eq!(view.id, "1");
        assert_eq!(view.name, "boiler");
    }

    #[test]
    fn test_current_mark_stale() {
        let mut current = CurrentReading {
            device_id: "1".to_string(),
            device_name: "boiler".to_string(),
            readings: entity(Connectivity::Live).last_known,
            status: Status::Online,
            observed_at: Some(Utc::now()),
            devices_online: Some(1),
        };
        current.mark_stale();
        assert!(current.readings.is_empty());
        assert_eq!(current.observed_at, None);
        assert_eq!(current.status, Status::Offline);
        assert_eq!(current.device_name, "boiler");
    }

    #[test]
    fn test_view_model_serializes() {
        let view = ViewModel {
            devices: vec![DeviceView::from(&entity(Connectivity::Live))],
            ..Default::default()
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["connectivity"], "stale");
        assert_eq!(json["mode"], "summary");
        assert_eq!(json["devices"][0]["connectivity"], "live");
        assert_eq!(json["devices"][0]["readings"]["temperature"], 21.5);
        assert_eq!(view.live_devices(), 1);
        assert!(view.device("1").is_some());
    }
}
