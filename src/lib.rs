//! # sensorwatch
//!
//! A telemetry reconciliation engine for sensor networks that report over
//! two channels at once: a push feed of JSON envelopes and a polled HTTP
//! endpoint.
//!
//! Samples from both channels are normalized, merged into a roster of
//! devices, checked for liveness by a per-stream watchdog and recorded in
//! bounded chart and table buffers. Each change publishes an immutable
//! [`ViewModel`] snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                             │
//! │  ┌─────────┐    ┌───────────────────────────┐   ┌─────────┐  │
//! │  │ source  │───▶│          engine           │──▶│  view   │  │
//! │  │ (input) │    │ normalize → roster merge  │   │(watch ch)│ │
//! │  └─────────┘    │ → watchdog → history      │   └─────────┘  │
//! │   PushStream    └───────────────────────────┘                │
//! │   ApiClient                                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: wire types, the [`PushStream`] reader and the
//!   [`ApiClient`] behind the [`LatestReading`] trait
//! - **[`data`]**: samples, roster, watchdog, history and snapshots
//! - **[`engine`]**: the synchronous state machine ([`Engine`])
//! - **[`session`]**: the async loop, polling and teardown ([`Session`])
//! - **[`settings`]**: file and environment configuration ([`Settings`])
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Follow a push feed and print every snapshot as JSON
//! sensorwatch --connect 127.0.0.1:7000 --json
//!
//! # Detailed mode: push plus polling every 5s
//! sensorwatch --connect 127.0.0.1:7000 --mode live --api http://127.0.0.1:5000
//! ```
//!
//! ### As a library with an in-process channel
//!
//! ```
//! use sensorwatch::{PushEvent, PushStream, Session, SessionConfig};
//!
//! # tokio_test::block_on(async {
//! let (tx, push) = PushStream::channel("bridge", 16);
//! let session = Session::spawn(SessionConfig::default(), Some(push), None);
//!
//! let event = PushEvent::decode(
//!     br#"{"event":"sensor_data","data":{"device_id":1,"temperature":21.5,"status":"online"}}"#,
//! ).unwrap();
//! tx.send(event).await.unwrap();
//!
//! let mut views = session.subscribe();
//! let view = views.wait_for(|v| !v.devices.is_empty()).await.unwrap().clone();
//! assert_eq!(view.devices[0].readings.temperature, Some(21.5));
//!
//! session.shutdown().await;
//! # });
//! ```

pub mod data;
pub mod engine;
pub mod error;
pub mod session;
pub mod settings;
pub mod source;

// Re-export main types for convenience
pub use data::{
    Connectivity, CurrentReading, DeviceEntity, DeviceView, EngineStats, Readings, Roster,
    Sample, Status, ViewModel,
};
pub use engine::{Engine, Input, Mode, SessionConfig};
pub use error::{DecodeError, Rejection, SessionClosed, SourceError};
pub use session::{Session, TeardownReport, TeardownStep};
pub use settings::Settings;
pub use source::{
    ApiClient, DeviceRecord, LatestReading, PushEvent, PushStream, ReadingPayload,
};
