//! Push channel reader.
//!
//! Receives push envelopes from an async byte stream, one JSON object per
//! line. This covers TCP connections and anything else that can be bridged
//! to a reader or a bytes channel.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::payload::PushEvent;

const PUSH_BUFFER: usize = 64;

/// Decoded push events, produced by a background reader task.
///
/// The reader only decodes and forwards; malformed lines are logged and
/// skipped so one bad envelope never ends the stream.
///
/// # Example with a byte stream
///
/// ```
/// use std::io::Cursor;
/// use sensorwatch::PushStream;
///
/// # tokio_test::block_on(async {
/// let data = br#"{"event":"mqtt_status","data":{"status":"connected"}}"#;
/// let mut stream = PushStream::spawn(Cursor::new(data.to_vec()), "example");
/// assert!(stream.recv().await.is_some());
/// # });
/// ```
#[derive(Debug)]
pub struct PushStream {
    receiver: mpsc::Receiver<PushEvent>,
    description: String,
    task: Option<JoinHandle<()>>,
}

impl PushStream {
    pub(crate) fn from_parts(
        receiver: mpsc::Receiver<PushEvent>,
        description: String,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            description,
            task,
        }
    }

    /// Spawn a background task that reads from the given async reader.
    ///
    /// The reader should provide newline-delimited JSON envelopes. The
    /// stream ends at EOF or on a read error.
    pub fn spawn<R>(reader: R, description: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        let desc = description.to_string();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(source = %desc, "push stream closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match PushEvent::decode(trimmed.as_bytes()) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(source = %desc, error = %e, "dropping push message"),
                        }
                    }
                    Err(e) => {
                        warn!(source = %desc, error = %e, "push stream read failed");
                        break;
                    }
                }
            }
        });

        Self::from_parts(rx, format!("stream: {}", description), Some(task))
    }

    /// Create a PushStream from a raw bytes channel.
    ///
    /// Each message is one complete envelope. Useful when bytes arrive from
    /// a transport that already frames messages.
    pub fn from_bytes_channel(mut rx: mpsc::Receiver<Vec<u8>>, description: &str) -> Self {
        let (tx, event_rx) = mpsc::channel(PUSH_BUFFER);
        let desc = description.to_string();

        let task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match PushEvent::decode(&bytes) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(source = %desc, error = %e, "dropping push message"),
                }
            }
        });

        Self::from_parts(event_rx, format!("stream: {}", description), Some(task))
    }

    /// Wait for the next event. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.receiver.recv().await
    }

    /// Close the receiver and stop the reader task.
    ///
    /// Returns true if a reader task was still running.
    pub fn close(&mut self) -> bool {
        self.receiver.close();
        match self.task.take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
