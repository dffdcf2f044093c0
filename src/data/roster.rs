//! Device roster and the identity merge resolver.

use chrono::{DateTime, Utc};

use super::sample::{Readings, Sample, Status};
use super::timestamp::parse_timestamp;
use super::watchdog::Connectivity;
use crate::source::DeviceRecord;

/// Display name for a device nobody has named yet.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

const LOCAL_ID_PREFIX: &str = "local-";

/// One resolved device and its merged state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntity {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
    /// Last reported value of each channel, individually sticky.
    pub last_known: Readings,
    pub status: Option<Status>,
    pub connectivity: Connectivity,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// The id was made up locally and may still be upgraded to a real one.
    pub(crate) synthesized: bool,
}

impl DeviceEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: None,
            last_known: Readings::default(),
            status: None,
            connectivity: Connectivity::Stale,
            last_seen_at: None,
            synthesized: false,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen_at = Some(self.last_seen_at.map_or(at, |prev| prev.max(at)));
    }
}

/// What [`Roster::merge`] did with a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Resolved id of the entity the sample landed on.
    pub id: String,
    /// A new entity was appended.
    pub created: bool,
    /// The entity's local id was upgraded; holds the old id.
    pub renamed_from: Option<String>,
}

/// What [`Roster::seed`] did with a batch of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    /// New entities appended.
    pub added: usize,
    /// Local ids replaced by a record's id, as `(old, new)`.
    pub upgraded: Vec<(String, String)>,
}

impl SeedOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || !self.upgraded.is_empty()
    }
}

/// The set of known devices, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entities: Vec<DeviceEntity>,
    next_local_id: u64,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntity> {
        self.entities.iter()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Resolve an identity: exact id first, then name.
    pub fn find(&self, id: Option<&str>, name: Option<&str>) -> Option<&DeviceEntity> {
        self.position(id, name).map(|idx| &self.entities[idx])
    }

    fn position(&self, id: Option<&str>, name: Option<&str>) -> Option<usize> {
        id.and_then(|id| self.entities.iter().position(|e| e.id == id))
            .or_else(|| name.and_then(|name| self.entities.iter().position(|e| e.name == name)))
    }

    fn next_local_id(&mut self) -> String {
        self.next_local_id += 1;
        format!("{}{}", LOCAL_ID_PREFIX, self.next_local_id)
    }

    /// Merge a sample into the roster.
    ///
    /// Present fields overwrite, absent ones keep the old value. An unmatched
    /// sample creates a new entity. Connectivity is left alone; the caller
    /// sets it from the watchdog.
    pub fn merge(&mut self, sample: &Sample) -> MergeOutcome {
        let (idx, created) = match self.position(sample.device_id(), sample.device_name()) {
            Some(idx) => (idx, false),
            None => {
                let (id, synthesized) = match sample.device_id() {
                    Some(id) => (id.to_string(), false),
                    None => (self.next_local_id(), true),
                };
                let name = sample.device_name().unwrap_or(UNKNOWN_DEVICE_NAME);
                let mut entity = DeviceEntity::new(id, name);
                entity.synthesized = synthesized;
                self.entities.push(entity);
                (self.entities.len() - 1, true)
            }
        };

        let entity = &mut self.entities[idx];
        let mut renamed_from = None;

        if let Some(real_id) = sample.device_id() {
            if entity.synthesized && entity.id != real_id {
                renamed_from = Some(std::mem::replace(&mut entity.id, real_id.to_string()));
                entity.synthesized = false;
            }
        }
        if let Some(name) = sample.device_name() {
            entity.name = name.to_string();
        }
        entity.last_known.merge_from(sample.readings());
        entity.status = Some(sample.status());
        entity.touch(sample.observed_at());

        MergeOutcome {
            id: entity.id.clone(),
            created,
            renamed_from,
        }
    }

    /// Seed the roster from device records.
    ///
    /// Records resolve like samples do, id first and then name. A record
    /// matching a locally named entity upgrades its id; any other match is
    /// left alone. Unmatched records are added and start stale.
    pub fn seed(&mut self, records: &[DeviceRecord]) -> SeedOutcome {
        let mut outcome = SeedOutcome::default();
        for record in records {
            let Some(id) = record.id.normalized() else {
                continue;
            };
            let name = record.name.trim();
            let name = (!name.is_empty()).then_some(name);

            if let Some(idx) = self.position(Some(id.as_str()), name) {
                let entity = &mut self.entities[idx];
                if entity.synthesized && entity.id != id {
                    let old = std::mem::replace(&mut entity.id, id.clone());
                    entity.synthesized = false;
                    if entity.host.is_none() {
                        entity.host = record.host.clone();
                    }
                    outcome.upgraded.push((old, id));
                }
                continue;
            }

            let mut entity = DeviceEntity::new(id, name.unwrap_or(UNKNOWN_DEVICE_NAME));
            entity.host = record.host.clone();
            entity.status = record.status.as_deref().and_then(|s| s.parse().ok());
            entity.last_seen_at = record.last_seen.as_ref().and_then(parse_timestamp);
            self.entities.push(entity);
            outcome.added += 1;
        }
        outcome
    }

    /// Set an entity's connectivity. Returns false for an unknown id.
    pub fn set_connectivity(&mut self, id: &str, connectivity: Connectivity) -> bool {
        match self.entities.iter_mut().find(|e| e.id == id) {
            Some(entity) => {
                entity.connectivity = connectivity;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_stale(&mut self) {
        for entity in &mut self.entities {
            entity.connectivity = Connectivity::Stale;
        }
    }

    /// Apply a status-only update. Returns false for an unknown id.
    pub fn record_status(
        &mut self,
        id: &str,
        status: Status,
        last_seen: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(entity) = self.entities.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        entity.status = Some(status);
        if let Some(at) = last_seen {
            entity.touch(at);
        }
        true
    }

    /// Devices whose watchdog stream is currently live.
    pub fn live_count(&self) -> usize {
        self.entities.iter().filter(|e| e.connectivity.is_live()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::normalize;
    use crate::source::{DeviceId, RawTimestamp, ReadingPayload};
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, secs).unwrap()
    }

    fn sample(id: Option<&str>, name: Option<&str>, readings: Readings) -> Sample {
        let raw = ReadingPayload {
            device_id: id.map(DeviceId::from),
            device_name: name.map(str::to_string),
            temperature: readings.temperature,
            humidity: readings.humidity,
            pressure: readings.pressure,
            status: Some(Status::Online),
            ..Default::default()
        };
        normalize(&raw, None, at(0)).unwrap()
    }

    fn temp(v: f64) -> Readings {
        Readings {
            temperature: Some(v),
            ..Default::default()
        }
    }

    #[test]
    fn test_unmatched_sample_creates_entity() {
        let mut roster = Roster::new();
        let outcome = roster.merge(&sample(Some("A"), Some("boiler"), temp(20.0)));

        assert_eq!(
            outcome,
            MergeOutcome {
                id: "A".to_string(),
                created: true,
                renamed_from: None
            }
        );
        let entity = roster.get("A").unwrap();
        assert_eq!(entity.name, "boiler");
        assert_eq!(entity.status, Some(Status::Online));
        assert_eq!(entity.connectivity, Connectivity::Stale);
    }

    #[test]
    fn test_id_match_wins_and_name_updates() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("A"), Some("X"), temp(20.0)));
        roster.merge(&sample(Some("B"), Some("Y"), temp(20.0)));

        let outcome = roster.merge(&sample(Some("A"), Some("Y"), temp(21.0)));
        assert_eq!(outcome.id, "A");
        assert!(!outcome.created);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get("A").unwrap().name, "Y");
        assert_eq!(roster.get("B").unwrap().last_known.temperature, Some(20.0));
    }

    #[test]
    fn test_name_match_when_id_missing() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("A"), Some("boiler"), temp(20.0)));

        let outcome = roster.merge(&sample(None, Some("boiler"), temp(22.0)));
        assert_eq!(outcome.id, "A");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("A").unwrap().last_known.temperature, Some(22.0));
    }

    #[test]
    fn test_sticky_fields() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("A"), None, temp(21.5)));
        roster.merge(&sample(
            Some("A"),
            None,
            Readings {
                humidity: Some(40.0),
                ..Default::default()
            },
        ));

        let entity = roster.get("A").unwrap();
        assert_eq!(
            entity.last_known,
            Readings {
                temperature: Some(21.5),
                humidity: Some(40.0),
                pressure: None,
            }
        );
        assert_eq!(entity.name, UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn test_local_ids_are_deterministic() {
        let mut roster = Roster::new();
        assert_eq!(roster.merge(&sample(None, Some("a"), temp(1.0))).id, "local-1");
        assert_eq!(roster.merge(&sample(None, Some("b"), temp(1.0))).id, "local-2");
        assert_eq!(roster.merge(&sample(None, Some("a"), temp(2.0))).id, "local-1");
        assert!(roster.get("local-1").unwrap().is_synthesized());
    }

    #[test]
    fn test_local_id_upgraded_once() {
        let mut roster = Roster::new();
        roster.merge(&sample(None, Some("boiler"), temp(1.0)));

        let outcome = roster.merge(&sample(Some("42"), Some("boiler"), temp(2.0)));
        assert_eq!(outcome.id, "42");
        assert_eq!(outcome.renamed_from.as_deref(), Some("local-1"));
        assert!(roster.get("local-1").is_none());
        assert!(!roster.get("42").unwrap().is_synthesized());

        // A real id is never replaced, even when the name matches.
        let outcome = roster.merge(&sample(Some("43"), Some("boiler"), temp(3.0)));
        assert_eq!(outcome.id, "42");
        assert_eq!(outcome.renamed_from, None);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let mut roster = Roster::new();
        let newer = ReadingPayload {
            device_id: Some(DeviceId::from("A")),
            temperature: Some(1.0),
            timestamp: Some(RawTimestamp::Text("2025-01-10T12:00:30Z".to_string())),
            ..Default::default()
        };
        let older = ReadingPayload {
            timestamp: Some(RawTimestamp::Text("2025-01-10T12:00:10Z".to_string())),
            ..newer.clone()
        };
        roster.merge(&normalize(&newer, None, at(0)).unwrap());
        roster.merge(&normalize(&older, None, at(0)).unwrap());

        assert_eq!(roster.get("A").unwrap().last_seen_at, Some(at(30)));
    }

    #[test]
    fn test_seed_skips_known_ids() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("1"), Some("live"), temp(1.0)));

        let records = vec![
            DeviceRecord {
                id: DeviceId::Number(1),
                name: "seeded".to_string(),
                host: None,
                status: None,
                is_connected: None,
                last_seen: None,
            },
            DeviceRecord {
                id: DeviceId::Number(2),
                name: "roof".to_string(),
                host: Some("10.0.0.9".to_string()),
                status: Some("online".to_string()),
                is_connected: Some(true),
                last_seen: Some(RawTimestamp::Text("2025-01-10T12:00:05".to_string())),
            },
        ];

        assert_eq!(roster.seed(&records).added, 1);
        assert_eq!(roster.get("1").unwrap().name, "live");

        let roof = roster.get("2").unwrap();
        assert_eq!(roof.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(roof.status, Some(Status::Online));
        assert_eq!(roof.last_seen_at, Some(at(5)));
        assert_eq!(roof.connectivity, Connectivity::Stale);
    }

    #[test]
    fn test_seed_upgrades_local_id_by_name() {
        let mut roster = Roster::new();
        roster.merge(&sample(None, Some("boiler"), temp(1.0)));

        let records = vec![DeviceRecord {
            id: DeviceId::Number(1),
            name: "boiler".to_string(),
            host: Some("10.0.0.4".to_string()),
            status: None,
            is_connected: None,
            last_seen: None,
        }];
        let outcome = roster.seed(&records);

        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.upgraded, vec![("local-1".to_string(), "1".to_string())]);
        assert_eq!(roster.len(), 1);

        let boiler = roster.get("1").unwrap();
        assert!(!boiler.is_synthesized());
        assert_eq!(boiler.host.as_deref(), Some("10.0.0.4"));
        assert_eq!(boiler.last_known.temperature, Some(1.0));

        // Seeding again is a no-op.
        assert!(!roster.seed(&records).changed());
    }

    #[test]
    fn test_mark_all_stale_keeps_identity() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("A"), Some("a"), temp(1.0)));
        roster.merge(&sample(Some("B"), Some("b"), temp(1.0)));
        roster.set_connectivity("A", Connectivity::Live);
        roster.set_connectivity("B", Connectivity::Live);
        assert_eq!(roster.live_count(), 2);

        roster.mark_all_stale();
        assert_eq!(roster.live_count(), 0);
        assert_eq!(roster.get("A").unwrap().name, "a");
        assert_eq!(roster.get("A").unwrap().last_known.temperature, Some(1.0));
    }

    #[test]
    fn test_record_status() {
        let mut roster = Roster::new();
        roster.merge(&sample(Some("A"), None, temp(1.0)));

        assert!(roster.record_status("A", Status::Warning, Some(at(20))));
        let entity = roster.get("A").unwrap();
        assert_eq!(entity.status, Some(Status::Warning));
        assert_eq!(entity.last_seen_at, Some(at(20)));

        assert!(!roster.record_status("nope", Status::Online, None));
    }
}
