//! Ingestion sources.
//!
//! Two channels feed a session:
//!
//! - **push**: a [`PushStream`] of decoded envelopes, read from a TCP socket
//!   or any async reader, or fed in-process through [`PushStream::channel`]
//! - **poll**: anything implementing [`LatestReading`], normally the
//!   [`ApiClient`]
//!
//! Sources only decode and forward. All state lives in the engine.

mod channel;
mod http;
mod payload;
mod stream;

pub use http::{ApiClient, ApiClientBuilder};
pub use payload::{
    DeviceId, DeviceRecord, DeviceStatusPayload, PushEvent, RawTimestamp, ReadingPayload,
    ReadingTopic, TransportStatus, TransportStatusPayload,
};
pub use stream::PushStream;

use async_trait::async_trait;

use crate::error::SourceError;

/// Trait for fetching the newest reading on demand.
///
/// The poll task calls this on every tick. Implementations should not
/// retry; a failed tick is logged and the next one tries again.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use sensorwatch::{LatestReading, ReadingPayload, SourceError};
///
/// struct Fixed(ReadingPayload);
///
/// #[async_trait]
/// impl LatestReading for Fixed {
///     async fn fetch_latest(&self) -> Result<Option<ReadingPayload>, SourceError> {
///         Ok(Some(self.0.clone()))
///     }
///
///     fn description(&self) -> &str {
///         "fixed"
///     }
/// }
/// ```
#[async_trait]
pub trait LatestReading: Send + Sync {
    /// Fetch the newest reading, `None` if the source has nothing yet.
    async fn fetch_latest(&self) -> Result<Option<ReadingPayload>, SourceError>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}
