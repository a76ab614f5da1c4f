//! Outbound seam between the match state machine and whatever carries
//! messages to the peer.

use crate::protocol::Message;
use derive_more::{Display, Error};
use tracing::instrument;

/// Something that can deliver a message to the peer.
///
/// The transport implements this; tests use `Vec<Message>` as an outbox.
pub trait MessageSink {
    /// Queues one message for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the connection is gone.
    fn send(&mut self, message: Message) -> Result<(), SinkError>;
}

impl MessageSink for Vec<Message> {
    fn send(&mut self, message: Message) -> Result<(), SinkError> {
        self.push(message);
        Ok(())
    }
}

/// Failure to hand a message to the peer, with location tracking.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Send failed: {} at {}:{}", message, file, line)]
pub struct SinkError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl SinkError {
    /// Creates a new sink error with caller location tracking.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}
