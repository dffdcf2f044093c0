//! Error types for the ingestion boundaries.
//!
//! None of these are fatal to a session: rejected payloads are dropped,
//! source errors are logged and the previous state is kept.

use thiserror::Error;

/// Why the normalizer refused a reading payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Neither `device_id` nor `device_name` was present.
    #[error("payload has no device id or device name")]
    MissingIdentity,

    /// The payload names a device but carries nothing to apply.
    #[error("payload for {0} carries no readings or status")]
    NoUsableField(String),

    /// The `timestamp` field could not be parsed.
    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Errors raised while decoding a push envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The envelope was not valid JSON.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The event name is not one the engine understands.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The event carried a null or missing payload.
    #[error("event {0} has no payload")]
    EmptyPayload(String),

    /// The payload did not match the schema for its event.
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur when talking to the HTTP API.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed or returned a non-success status.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_connect() {
            SourceError::Connection(err.to_string())
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Http(err.to_string())
        }
    }
}

/// Returned when a control message is sent to a session that has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session has already shut down")]
pub struct SessionClosed;
