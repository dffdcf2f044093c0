//! Telemetry data models and the state they feed.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "5s", "500ms")
//! - [`timestamp`]: Source timestamp parsing
//! - [`sample`]: Normalized samples ([`Sample`], [`Readings`], [`Status`])
//! - [`roster`]: Device identities and the merge resolver ([`Roster`])
//! - [`watchdog`]: Per-stream liveness ([`Watchdog`], [`Timer`])
//! - [`history`]: Bounded chart and table buffers ([`History`])
//! - [`view`]: Published snapshots ([`ViewModel`])
//!
//! ## Data Flow
//!
//! ```text
//! ReadingPayload (raw JSON)
//!        │
//!        ▼
//! normalize() ──▶ Sample
//!        │
//!        ├──▶ Roster::merge()     (identity, sticky readings)
//!        ├──▶ Watchdog::observe() (live / stale)
//!        └──▶ History::record()   (only while live)
//!                   │
//!                   ▼
//!               ViewModel
//! ```

pub mod duration;
pub mod history;
pub mod roster;
pub mod sample;
pub mod timestamp;
pub mod view;
pub mod watchdog;

pub use history::{History, HistoryBuffer, Order, CHART_CAPACITY, TABLE_CAPACITY};
pub use roster::{DeviceEntity, MergeOutcome, Roster, SeedOutcome, UNKNOWN_DEVICE_NAME};
pub use sample::{normalize, Readings, Sample, Status};
pub use timestamp::parse_timestamp;
pub use view::{CurrentReading, DeviceView, EngineStats, ViewModel};
pub use watchdog::{Connectivity, StreamKey, Timer, Watchdog, REARM_DELAY, STALENESS_TIMEOUT};
