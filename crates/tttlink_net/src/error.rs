//! Transport error types.

use derive_more::{Display, Error};
use tracing::instrument;

/// What went wrong on the network.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum TransportErrorKind {
    /// Binding or listening on the local address failed.
    #[display("Hosting error: {}", _0)]
    Bind(String),

    /// Waiting for the peer failed.
    #[display("Accept error: {}", _0)]
    Accept(String),

    /// The host name did not resolve.
    #[display("Address error connecting to {}. Check IP.", _0)]
    AddressResolution(String),

    /// The peer did not answer within the dial timeout.
    #[display("Connection timed out to {}.", _0)]
    ConnectTimeout(String),

    /// The peer actively refused the connection.
    #[display("Connection refused by {}. Is host running?", _0)]
    ConnectionRefused(String),

    /// Any other dial failure.
    #[display("Connection error: {}. Is host running?", _0)]
    Connect(String),

    /// No non-loopback local address could be found.
    #[display("Could not determine a local network address")]
    NoLocalAddress,

    /// There is no open connection to send on.
    #[display("Not connected")]
    NotConnected,
}

/// Transport error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("{} at {}:{}", kind, file, line)]
pub struct TransportError {
    /// What went wrong.
    pub kind: TransportErrorKind,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl TransportError {
    /// Creates a new transport error with caller location tracking.
    #[track_caller]
    #[instrument]
    pub fn new(kind: TransportErrorKind) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// User-facing description without the source location.
    pub fn reason(&self) -> String {
        self.kind.to_string()
    }
}

impl From<TransportErrorKind> for TransportError {
    #[track_caller]
    fn from(kind: TransportErrorKind) -> Self {
        Self::new(kind)
    }
}
