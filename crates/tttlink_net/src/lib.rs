//! Networking for two-peer tic-tac-toe.
//!
//! # Architecture
//!
//! - **Transport**: one TCP connection per match, as listener or dialer,
//!   driven by a background tokio task
//! - **Session**: single foreground loop that owns the [`tttlink_game::Match`]
//!   and feeds it user commands and transport events in order
//! - **Config**: ports, timeouts and framing limits from TOML

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod addr;
mod config;
mod error;
mod session;
mod transport;

// Crate-level exports - Configuration
pub use config::{ConfigError, DEFAULT_PORT, NetConfig};

// Crate-level exports - Errors
pub use error::{TransportError, TransportErrorKind};

// Crate-level exports - Address discovery
pub use addr::detect_local_ip;

// Crate-level exports - Transport
pub use transport::{AttemptId, LinkEvent, Transport, TransportEvent};

// Crate-level exports - Session driver
pub use session::{Command, Presenter, Session};
