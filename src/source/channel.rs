//! In-process push channel.
//!
//! Lets a producer in the same process (another task, a bridge to a message
//! broker, a test) hand already-decoded events to a session.

use tokio::sync::mpsc;

use super::payload::PushEvent;
use super::stream::PushStream;

impl PushStream {
    /// Create a channel pair for sending events to a session.
    ///
    /// Returns (sender, stream). Dropping every sender ends the stream.
    ///
    /// # Example
    ///
    /// ```
    /// use sensorwatch::PushStream;
    ///
    /// let (tx, stream) = PushStream::channel("bridge", 16);
    /// assert_eq!(stream.description(), "channel: bridge");
    /// ```
    pub fn channel(source_description: &str, buffer: usize) -> (mpsc::Sender<PushEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let stream = Self::from_parts(rx, format!("channel: {}", source_description), None);
        (tx, stream)
    }
}
