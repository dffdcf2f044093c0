//! Synchronous ingestion state.
//!
//! The [`Engine`] owns the roster, the history buffers and the watchdog and
//! applies one [`Input`] at a time. It never blocks and never spawns; the
//! session loop feeds it and publishes its snapshots.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::{
    normalize, parse_timestamp, Connectivity, CurrentReading, DeviceEntity, DeviceView,
    EngineStats, History, Roster, StreamKey, ViewModel, Watchdog, CHART_CAPACITY,
    REARM_DELAY, STALENESS_TIMEOUT, TABLE_CAPACITY,
};
use crate::source::{
    DeviceRecord, DeviceStatusPayload, PushEvent, ReadingPayload, TransportStatus,
};

/// Default interval between polls in [`Mode::Live`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which view the session serves.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dashboard: push only.
    #[default]
    Summary,
    /// Detailed page: push plus periodic polling.
    Live,
}

impl Mode {
    pub fn polls(&self) -> bool {
        matches!(self, Mode::Live)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Summary => f.write_str("summary"),
            Mode::Live => f.write_str("live"),
        }
    }
}

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: Mode,
    pub poll_interval: Duration,
    pub staleness_timeout: Duration,
    pub rearm_delay: Duration,
    pub chart_capacity: usize,
    pub table_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            staleness_timeout: STALENESS_TIMEOUT,
            rearm_delay: REARM_DELAY,
            chart_capacity: CHART_CAPACITY,
            table_capacity: TABLE_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything that can change engine state.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A decoded push envelope.
    Push(PushEvent),
    /// A reading fetched by the poll task.
    Poll(ReadingPayload),
    /// The push link came up.
    LinkUp,
    /// The push link ended.
    LinkDown,
    /// Device records to seed the roster with.
    Bootstrap(Vec<DeviceRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Push,
    Poll,
}

/// Roster, history, watchdog and the current reading of one session.
#[derive(Debug)]
pub struct Engine {
    mode: Mode,
    roster: Roster,
    history: History,
    watchdog: Watchdog,
    current: Option<CurrentReading>,
    connected: bool,
    stats: EngineStats,
    revision: u64,
}

impl Engine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            mode: config.mode,
            roster: Roster::new(),
            history: History::new(config.chart_capacity, config.table_capacity),
            watchdog: Watchdog::new(config.staleness_timeout, config.rearm_delay),
            current: None,
            connected: false,
            stats: EngineStats::default(),
            revision: 0,
        }
    }

    /// Apply one input. Returns true if anything visible changed.
    pub fn handle(&mut self, input: Input, now: Instant, received_at: DateTime<Utc>) -> bool {
        match input {
            Input::Push(PushEvent::Reading { topic, payload }) => {
                debug!(topic = topic.as_str(), "push reading");
                self.ingest(&payload, Origin::Push, now, received_at)
            }
            Input::Push(PushEvent::DeviceStatus(payload)) => self.apply_device_status(&payload, now),
            Input::Push(PushEvent::TransportStatus(payload)) => self.apply_transport(payload.status),
            Input::Poll(payload) => self.ingest(&payload, Origin::Poll, now, received_at),
            Input::LinkUp => self.set_connected(true),
            Input::LinkDown => self.set_connected(false),
            Input::Bootstrap(records) => self.seed(&records),
        }
    }

    fn ingest(
        &mut self,
        raw: &ReadingPayload,
        origin: Origin,
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> bool {
        let sample = match normalize(raw, self.previous_for(raw), received_at) {
            Ok(sample) => sample,
            Err(rejection) => {
                self.stats.rejected += 1;
                warn!(origin = ?origin, %rejection, "dropping reading");
                return false;
            }
        };

        if origin == Origin::Poll && self.history.is_duplicate_of_latest(&sample) {
            self.stats.coalesced += 1;
            debug!(observed_at = %sample.observed_at(), "poll repeats newest reading");
            return false;
        }

        let outcome = self.roster.merge(&sample);
        if let Some(old) = &outcome.renamed_from {
            debug!(from = %old, to = %outcome.id, "device id resolved");
            self.watchdog
                .rename(&StreamKey::device(old.as_str()), StreamKey::device(outcome.id.as_str()));
        }
        if outcome.created {
            info!(id = %outcome.id, name = sample.device_name().unwrap_or_default(), "new device");
        }

        let qualifies = sample.status().is_live();
        let connectivity =
            self.watchdog.observe(StreamKey::device(outcome.id.as_str()), qualifies, now);
        self.watchdog.observe(StreamKey::Connection, qualifies, now);
        self.roster.set_connectivity(&outcome.id, connectivity);

        // An offline sample never enters history, even while the device's
        // watchdog window is still open.
        let recordable = if qualifies { connectivity } else { Connectivity::Stale };
        let recorded = self.history.record(&sample, recordable);
        debug!(
            id = %outcome.id,
            status = %sample.status(),
            ?connectivity,
            recorded,
            "reading accepted"
        );

        if let Some(entity) = self.roster.get(&outcome.id) {
            self.current = Some(CurrentReading::new(&sample, entity));
        }
        self.stats.accepted += 1;
        true
    }

    fn seed(&mut self, records: &[DeviceRecord]) -> bool {
        let outcome = self.roster.seed(records);
        for (old, new) in &outcome.upgraded {
            debug!(from = %old, to = %new, "device id resolved from device list");
            self.watchdog
                .rename(&StreamKey::device(old.as_str()), StreamKey::device(new.as_str()));
        }
        info!(
            offered = records.len(),
            added = outcome.added,
            upgraded = outcome.upgraded.len(),
            "roster seeded"
        );
        outcome.changed()
    }

    /// Roster entry a payload resolves to, for reading fallback.
    fn previous_for(&self, raw: &ReadingPayload) -> Option<&DeviceEntity> {
        let id = raw.device_id.as_ref().and_then(|id| id.normalized());
        let name = raw.device_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        self.roster.find(id.as_deref(), name)
    }

    fn apply_device_status(&mut self, payload: &DeviceStatusPayload, now: Instant) -> bool {
        let id = payload.device_id.normalized().unwrap_or_default();
        if self.roster.get(&id).is_none() {
            self.stats.ignored_status += 1;
            debug!(device_id = %payload.device_id, "status for unknown device");
            return false;
        }

        let last_seen = payload.last_seen.as_ref().and_then(parse_timestamp);
        self.roster.record_status(&id, payload.status, last_seen);

        let key = StreamKey::device(id.as_str());
        let connectivity = if payload.status.is_live() {
            self.watchdog.accept(key, now)
        } else {
            if self.watchdog.mark_stale_if_silent(&key, now) {
                info!(id = %id, "device reported offline");
            }
            self.watchdog.connectivity(&key)
        };
        self.roster.set_connectivity(&id, connectivity);
        true
    }

    fn apply_transport(&mut self, status: TransportStatus) -> bool {
        match status {
            TransportStatus::Connected => {
                info!("transport connected");
                self.set_connected(true)
            }
            TransportStatus::Disconnected => {
                let expired = self.watchdog.force_stale_all();
                self.roster.mark_all_stale();
                self.connected = false;
                warn!(streams = expired.len(), "transport disconnected, all streams stale");
                true
            }
        }
    }

    fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }

    /// Fire every watchdog timer due at `now`.
    ///
    /// Returns true if any stream went stale.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired = self.watchdog.fire_due(now);
        for key in &expired {
            match key {
                StreamKey::Device(id) => {
                    self.roster.set_connectivity(id, Connectivity::Stale);
                    info!(id = %id, "device stale");
                }
                StreamKey::Connection => info!("connection stale"),
            }
        }
        !expired.is_empty()
    }

    /// Earliest pending watchdog deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.watchdog.next_deadline()
    }

    /// Cancel every watchdog timer, returning how many were armed.
    pub fn cancel_timers(&mut self) -> usize {
        self.watchdog.cancel_all()
    }

    /// Build the next published snapshot.
    pub fn snapshot(&mut self) -> ViewModel {
        self.revision += 1;
        let connectivity = self.watchdog.connectivity(&StreamKey::Connection);

        let current = self.current.clone().map(|mut current| {
            if !connectivity.is_live() {
                current.mark_stale();
            }
            current
        });

        ViewModel {
            revision: self.revision,
            mode: self.mode,
            connected: self.connected,
            connectivity,
            current,
            devices: self.roster.iter().map(DeviceView::from).collect(),
            chart: self.history.chart().to_vec(),
            table: self.history.table().to_vec(),
            stats: self.stats,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}
